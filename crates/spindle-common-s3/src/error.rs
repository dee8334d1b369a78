// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

pub type Result<T> = std::result::Result<T, S3Error>;

#[derive(Error, Debug)]
pub enum S3Error {
	#[error("invalid endpoint: {0}")]
	InvalidEndpoint(String),

	#[error("invalid object key: {0}")]
	InvalidKey(String),

	#[error("http error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("{method} {key} failed with status {status}: {body}")]
	UnexpectedStatus {
		method: &'static str,
		key: String,
		status: u16,
		body: String,
	},
}
