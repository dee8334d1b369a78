// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;

use crate::context::JobContext;
use crate::error::JobError;
use crate::types::JobOutput;

#[async_trait]
pub trait Job: Send + Sync {
	fn id(&self) -> &str;
	fn name(&self) -> &str;
	fn description(&self) -> &str;

	/// Runs one pass. Implementations should watch
	/// `ctx.cancellation_token` and return [`JobError::Cancelled`] when it fires.
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError>;
}
