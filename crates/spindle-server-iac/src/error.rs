// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use thiserror::Error;

use crate::runner::IacOperation;

pub type Result<T> = std::result::Result<T, IacError>;

#[derive(Error, Debug)]
pub enum IacError {
	#[error("not found: {0}")]
	NotFound(String),

	#[error("conflict: {0}")]
	Conflict(String),

	/// The engine exited zero, so its change is committed, but a line of its
	/// output was not a JSON object.
	#[error("{operation} succeeded but output line {line} could not be parsed: {message}")]
	LogParse {
		operation: IacOperation,
		line: usize,
		message: String,
	},

	#[error("{operation} failed with exit code {exit_code}: {stderr}")]
	CommandFailed {
		operation: IacOperation,
		exit_code: i32,
		stderr: String,
	},

	#[error("{operation} cancelled")]
	Cancelled { operation: IacOperation },

	#[error("{operation} timed out after {timeout:?}")]
	TimedOut {
		operation: IacOperation,
		timeout: Duration,
	},

	#[error("validation failed: {0}")]
	Validation(String),

	#[error("statefile parse error: {0}")]
	StatefileParse(String),

	#[error("state backend error: {0}")]
	Backend(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("blob storage error: {0}")]
	Blob(#[from] spindle_server_blob::BlobError),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

impl IacError {
	/// Whether a compensating destroy is safe after this error.
	///
	/// A log-parse failure means the infrastructure change already committed,
	/// so tearing it down would destroy a resource that was created correctly.
	pub fn is_compensable(&self) -> bool {
		!matches!(self, IacError::LogParse { .. })
	}

	pub fn is_not_found(&self) -> bool {
		matches!(self, IacError::NotFound(_))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_only_log_parse_is_not_compensable() {
		let log_parse = IacError::LogParse {
			operation: IacOperation::Apply,
			line: 3,
			message: "expected value".to_string(),
		};
		assert!(!log_parse.is_compensable());

		let failed = IacError::CommandFailed {
			operation: IacOperation::Apply,
			exit_code: 1,
			stderr: String::new(),
		};
		assert!(failed.is_compensable());
		assert!(IacError::Cancelled {
			operation: IacOperation::Destroy
		}
		.is_compensable());
	}

	#[test]
	fn test_display_includes_operation() {
		let err = IacError::CommandFailed {
			operation: IacOperation::Destroy,
			exit_code: 2,
			stderr: "boom".to_string(),
		};
		assert_eq!(err.to_string(), "destroy failed with exit code 2: boom");
	}
}
