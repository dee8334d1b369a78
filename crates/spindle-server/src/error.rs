// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
	#[error(transparent)]
	Config(#[from] spindle_server_config::ConfigError),

	#[error(transparent)]
	Db(#[from] spindle_server_db::DbError),

	#[error(transparent)]
	Iac(#[from] spindle_server_iac::IacError),

	#[error(transparent)]
	S3(#[from] spindle_common_s3::S3Error),

	#[error(transparent)]
	Pool(#[from] spindle_server_pool::PoolError),

	#[error(transparent)]
	Coordination(#[from] spindle_server_coordination::CoordinationError),

	#[error(transparent)]
	Job(#[from] spindle_server_jobs::JobError),

	#[error("failed to read template {path}: {source}")]
	Template {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("logging initialisation failed: {0}")]
	Logging(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
