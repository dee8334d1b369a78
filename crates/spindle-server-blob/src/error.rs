// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BlobError>;

#[derive(Error, Debug)]
pub enum BlobError {
	#[error("invalid blob key: {0:?}")]
	InvalidKey(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("object storage error: {0}")]
	S3(#[from] spindle_common_s3::S3Error),
}
