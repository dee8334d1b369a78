// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::{validate_key, BlobStore, Result};

/// Process-local store for tests and single-node development.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
	entries: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

impl MemoryBlobStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// All keys currently stored, in order.
	pub async fn keys(&self) -> Vec<String> {
		self.entries.read().await.keys().cloned().collect()
	}
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
	async fn put(&self, key: &str, data: Bytes) -> Result<()> {
		validate_key(key)?;
		self.entries.write().await.insert(key.to_string(), data);
		Ok(())
	}

	async fn get(&self, key: &str) -> Result<Option<Bytes>> {
		validate_key(key)?;
		Ok(self.entries.read().await.get(key).cloned())
	}

	async fn delete(&self, key: &str) -> Result<()> {
		validate_key(key)?;
		self.entries.write().await.remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool> {
		validate_key(key)?;
		Ok(self.entries.read().await.contains_key(key))
	}
}
