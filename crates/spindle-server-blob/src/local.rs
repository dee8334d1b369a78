// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::{validate_key, BlobStore, Result};

/// Stores each key as a file under a root directory. Writes go through a
/// temporary file and a rename so readers never see a partial blob.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
	root: PathBuf,
}

impl LocalBlobStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn path(&self, key: &str) -> Result<PathBuf> {
		validate_key(key)?;
		Ok(self.root.join(key))
	}
}

#[async_trait]
impl BlobStore for LocalBlobStore {
	async fn put(&self, key: &str, data: Bytes) -> Result<()> {
		let path = self.path(key)?;
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}

		let mut tmp = path.clone().into_os_string();
		tmp.push(".tmp");
		tokio::fs::write(&tmp, &data).await?;
		tokio::fs::rename(&tmp, &path).await?;

		debug!(key, size = data.len(), path = %path.display(), "stored blob");
		Ok(())
	}

	async fn get(&self, key: &str) -> Result<Option<Bytes>> {
		let path = self.path(key)?;
		match tokio::fs::read(&path).await {
			Ok(data) => Ok(Some(Bytes::from(data))),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	async fn delete(&self, key: &str) -> Result<()> {
		let path = self.path(key)?;
		match tokio::fs::remove_file(&path).await {
			Ok(()) => {
				debug!(key, "deleted blob");
				Ok(())
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool> {
		let path = self.path(key)?;
		Ok(tokio::fs::try_exists(&path).await?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn create_test_store() -> (LocalBlobStore, TempDir) {
		let tmp = TempDir::new().unwrap();
		(LocalBlobStore::new(tmp.path()), tmp)
	}

	#[tokio::test]
	async fn test_put_get_nested_key() {
		let (store, tmp) = create_test_store();
		store.put("modules/42", Bytes::from_static(b"{}")).await.unwrap();

		assert_eq!(store.get("modules/42").await.unwrap().unwrap(), "{}");
		assert!(tmp.path().join("modules/42").exists());
		assert!(!tmp.path().join("modules/42.tmp").exists());
	}

	#[tokio::test]
	async fn test_missing_key_is_none() {
		let (store, _tmp) = create_test_store();
		assert!(store.get("modules/1").await.unwrap().is_none());
		assert!(!store.exists("modules/1").await.unwrap());
	}

	#[tokio::test]
	async fn test_delete_is_idempotent() {
		let (store, _tmp) = create_test_store();
		store.put("states/1", Bytes::from_static(b"x")).await.unwrap();
		store.delete("states/1").await.unwrap();
		store.delete("states/1").await.unwrap();
		assert!(!store.exists("states/1").await.unwrap());
	}

	#[tokio::test]
	async fn test_put_overwrites() {
		let (store, _tmp) = create_test_store();
		store.put("k", Bytes::from_static(b"one")).await.unwrap();
		store.put("k", Bytes::from_static(b"two")).await.unwrap();
		assert_eq!(store.get("k").await.unwrap().unwrap(), "two");
	}

	#[tokio::test]
	async fn test_traversal_rejected() {
		let (store, _tmp) = create_test_store();
		assert!(store.get("../outside").await.is_err());
	}
}
