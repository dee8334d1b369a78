// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Key/value byte storage used to persist serialized modules and, through the
//! same backends, IaC statefiles.

pub mod error;
pub mod local;
pub mod memory;
pub mod s3;

pub use error::{BlobError, Result};
pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;
pub use s3::S3BlobStore;

use async_trait::async_trait;
use bytes::Bytes;

#[async_trait]
pub trait BlobStore: Send + Sync {
	async fn put(&self, key: &str, data: Bytes) -> Result<()>;

	/// `Ok(None)` when the key does not exist.
	async fn get(&self, key: &str) -> Result<Option<Bytes>>;

	/// Deleting an absent key succeeds.
	async fn delete(&self, key: &str) -> Result<()>;

	async fn exists(&self, key: &str) -> Result<bool>;
}

/// Rejects keys that could escape a filesystem root or confuse an object
/// store: empty, absolute, backslashes, empty or dot segments.
pub fn validate_key(key: &str) -> Result<()> {
	let invalid = key.is_empty()
		|| key.starts_with('/')
		|| key.contains('\\')
		|| key
			.split('/')
			.any(|segment| segment.is_empty() || segment == "." || segment == "..");

	if invalid {
		return Err(BlobError::InvalidKey(key.to_string()));
	}
	Ok(())
}
