// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use bytes::Bytes;
use spindle_common_s3::S3Client;

use crate::{validate_key, BlobStore, Result};

/// Blob store over an S3-compatible bucket, with an optional key prefix so
/// modules and statefiles can share one bucket.
#[derive(Debug, Clone)]
pub struct S3BlobStore {
	client: S3Client,
	prefix: String,
}

impl S3BlobStore {
	pub fn new(client: S3Client) -> Self {
		Self {
			client,
			prefix: String::new(),
		}
	}

	pub fn with_prefix(client: S3Client, prefix: impl Into<String>) -> Self {
		let mut prefix = prefix.into();
		if !prefix.is_empty() && !prefix.ends_with('/') {
			prefix.push('/');
		}
		Self { client, prefix }
	}

	fn object_key(&self, key: &str) -> Result<String> {
		validate_key(key)?;
		Ok(format!("{}{key}", self.prefix))
	}
}

#[async_trait]
impl BlobStore for S3BlobStore {
	async fn put(&self, key: &str, data: Bytes) -> Result<()> {
		let key = self.object_key(key)?;
		Ok(self.client.put_object(&key, data.to_vec()).await?)
	}

	async fn get(&self, key: &str) -> Result<Option<Bytes>> {
		let key = self.object_key(key)?;
		Ok(self.client.get_object(&key).await?)
	}

	async fn delete(&self, key: &str) -> Result<()> {
		let key = self.object_key(key)?;
		Ok(self.client.delete_object(&key).await?)
	}

	async fn exists(&self, key: &str) -> Result<bool> {
		let key = self.object_key(key)?;
		Ok(self.client.head_object(&key).await?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use spindle_common_s3::S3Config;

	fn client() -> S3Client {
		S3Client::new(S3Config {
			endpoint: "http://minio:9000".to_string(),
			region: "us-east-1".to_string(),
			bucket: "spindle".to_string(),
			access_key: "AKID".to_string(),
			secret_key: "secret".into(),
			path_style: true,
		})
		.unwrap()
	}

	#[test]
	fn test_prefix_gets_trailing_slash() {
		let store = S3BlobStore::with_prefix(client(), "blobs");
		assert_eq!(store.object_key("modules/1").unwrap(), "blobs/modules/1");
	}

	#[test]
	fn test_no_prefix() {
		let store = S3BlobStore::new(client());
		assert_eq!(store.object_key("modules/1").unwrap(), "modules/1");
	}

	#[test]
	fn test_invalid_key_rejected_before_request() {
		let store = S3BlobStore::new(client());
		assert!(store.object_key("../x").is_err());
	}
}
