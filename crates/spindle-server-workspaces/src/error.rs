// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use spindle_server_coordination::CoordinationError;
use spindle_server_db::DbError;
use spindle_server_iac::IacError;
use spindle_server_pool::PoolError;
use thiserror::Error;

use crate::outcome::{ConflictReason, OutcomeKind};

pub type Result<T> = std::result::Result<T, WorkspaceError>;

#[derive(Error, Debug)]
pub enum WorkspaceError {
	#[error("malformed request: {0}")]
	Malformed(String),

	#[error("another operation is already active for workspace {id}")]
	OperationInProgress { id: i64 },

	#[error("workspace {id} already created")]
	AlreadyCreated { id: i64 },

	#[error("workspace {id} not found")]
	NotFound { id: i64 },

	#[error(transparent)]
	Iac(#[from] IacError),

	#[error(transparent)]
	Pool(#[from] PoolError),

	#[error("coordination error: {0}")]
	Coordination(#[from] CoordinationError),

	#[error("database error: {0}")]
	Db(#[from] DbError),
}

impl WorkspaceError {
	/// The provisioning error underneath, whether raised directly or by a pool.
	pub fn as_iac(&self) -> Option<&IacError> {
		match self {
			WorkspaceError::Iac(e) => Some(e),
			WorkspaceError::Pool(e) => e.as_iac(),
			_ => None,
		}
	}

	/// Whether tearing down what this operation created is safe.
	pub fn is_compensable(&self) -> bool {
		self.as_iac().map_or(true, IacError::is_compensable)
	}

	pub fn kind(&self) -> OutcomeKind {
		match self {
			WorkspaceError::Malformed(_) => OutcomeKind::MalformedRequest,
			WorkspaceError::OperationInProgress { .. } | WorkspaceError::AlreadyCreated { .. } => {
				OutcomeKind::Conflict
			}
			WorkspaceError::NotFound { .. } => OutcomeKind::NotFound,
			other if other.as_iac().is_some_and(IacError::is_not_found) => OutcomeKind::NotFound,
			_ => OutcomeKind::ServerError,
		}
	}

	pub fn conflict_reason(&self) -> Option<ConflictReason> {
		match self {
			WorkspaceError::OperationInProgress { .. } => Some(ConflictReason::OperationInProgress),
			WorkspaceError::AlreadyCreated { .. } => Some(ConflictReason::AlreadyCreated),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use spindle_server_iac::IacOperation;

	#[test]
	fn test_kinds() {
		assert_eq!(
			WorkspaceError::Malformed("x".into()).kind(),
			OutcomeKind::MalformedRequest
		);
		assert_eq!(
			WorkspaceError::OperationInProgress { id: 1 }.kind(),
			OutcomeKind::Conflict
		);
		assert_eq!(WorkspaceError::NotFound { id: 1 }.kind(), OutcomeKind::NotFound);
		assert_eq!(
			WorkspaceError::Iac(IacError::NotFound("modules/1".into())).kind(),
			OutcomeKind::NotFound
		);
		assert_eq!(
			WorkspaceError::Iac(IacError::Cancelled {
				operation: IacOperation::Apply
			})
			.kind(),
			OutcomeKind::ServerError
		);
	}

	#[test]
	fn test_log_parse_through_pool_is_not_compensable() {
		let err = WorkspaceError::Pool(PoolError::Iac(IacError::LogParse {
			operation: IacOperation::Apply,
			line: 1,
			message: "x".into(),
		}));
		assert!(!err.is_compensable());
		assert!(WorkspaceError::NotFound { id: 1 }.is_compensable());
	}
}
