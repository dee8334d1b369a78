// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use tokio_util::sync::CancellationToken;

use crate::types::TriggerSource;

#[derive(Debug, Clone)]
pub struct JobContext {
	pub run_id: String,
	pub triggered_by: TriggerSource,
	pub retry_count: u32,
	pub cancellation_token: CancellationToken,
}
