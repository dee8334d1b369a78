// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::Serialize;
use spindle_server_iac::{AgentInfo, ExecutionLog, WorkspaceState};

use crate::error::WorkspaceError;

/// Distinct results reported to callers. They are never collapsed: a
/// conflict is retryable, a malformed request is not, and a missing
/// workspace is not a server failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
	Success,
	MalformedRequest,
	Conflict,
	NotFound,
	ServerError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
	OperationInProgress,
	AlreadyCreated,
}

/// What a lifecycle operation left behind.
#[derive(Debug, Clone)]
pub struct LifecycleResult {
	pub workspace_id: i64,
	pub state: WorkspaceState,
	pub agent: Option<AgentInfo>,
	pub volume_id: Option<i64>,
	pub log: ExecutionLog,
}

impl LifecycleResult {
	pub(crate) fn unchanged(workspace_id: i64, state: WorkspaceState) -> Self {
		Self {
			workspace_id,
			state,
			agent: None,
			volume_id: None,
			log: ExecutionLog::default(),
		}
	}
}

#[derive(Debug, Clone)]
pub struct Outcome {
	pub kind: OutcomeKind,
	pub conflict: Option<ConflictReason>,
	pub message: Option<String>,
	pub result: Option<LifecycleResult>,
}

impl Outcome {
	pub fn success(result: LifecycleResult) -> Self {
		Self {
			kind: OutcomeKind::Success,
			conflict: None,
			message: None,
			result: Some(result),
		}
	}

	pub fn from_error(err: &WorkspaceError) -> Self {
		Self {
			kind: err.kind(),
			conflict: err.conflict_reason(),
			message: Some(err.to_string()),
			result: None,
		}
	}

	pub fn is_success(&self) -> bool {
		self.kind == OutcomeKind::Success
	}
}

impl From<Result<LifecycleResult, WorkspaceError>> for Outcome {
	fn from(result: Result<LifecycleResult, WorkspaceError>) -> Self {
		match result {
			Ok(result) => Outcome::success(result),
			Err(e) => Outcome::from_error(&e),
		}
	}
}
