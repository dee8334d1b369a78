// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoordinationError>;

#[derive(Error, Debug)]
pub enum CoordinationError {
	#[error("kubernetes API error: {0}")]
	Kube(#[from] kube::Error),

	#[error("invalid coordination key: {0}")]
	InvalidKey(String),
}
