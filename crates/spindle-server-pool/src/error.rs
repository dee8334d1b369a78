// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use spindle_server_db::DbError;
use spindle_server_iac::IacError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PoolError>;

#[derive(Error, Debug)]
pub enum PoolError {
	#[error("database error: {0}")]
	Db(#[from] DbError),

	#[error(transparent)]
	Iac(#[from] IacError),

	#[error("reconcile task failed: {0}")]
	Task(String),
}

impl PoolError {
	/// The provisioning error underneath, if any.
	pub fn as_iac(&self) -> Option<&IacError> {
		match self {
			PoolError::Iac(e) => Some(e),
			_ => None,
		}
	}
}
