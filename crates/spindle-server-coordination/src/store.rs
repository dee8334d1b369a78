// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::Result;

/// Shared key/value registry visible to every node.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
	fn name(&self) -> &'static str;

	async fn get(&self, key: &str) -> Result<Option<String>>;

	async fn put(&self, key: &str, value: &str) -> Result<()>;

	/// Writes `value` only if `key` does not exist. Returns whether it wrote.
	async fn put_if_absent(&self, key: &str, value: &str) -> Result<bool>;

	/// Writes `value` only if `key` currently holds `expected`. Returns
	/// whether it wrote. An absent key never matches.
	async fn replace(&self, key: &str, expected: &str, value: &str) -> Result<bool>;

	/// Deleting an absent key succeeds.
	async fn delete(&self, key: &str) -> Result<()>;
}

/// Process-local store for single-node deployments and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryCoordinationStore {
	entries: Arc<Mutex<BTreeMap<String, String>>>,
	yield_after_read: bool,
}

impl MemoryCoordinationStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Yields to the scheduler after every `get`, so concurrent callers
	/// interleave between a read and the write that follows it.
	pub fn with_yielding_reads(mut self) -> Self {
		self.yield_after_read = true;
		self
	}

	pub fn keys(&self) -> Vec<String> {
		self.lock().keys().cloned().collect()
	}

	fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
		self.entries.lock().unwrap_or_else(|e| e.into_inner())
	}
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
	fn name(&self) -> &'static str {
		"memory"
	}

	async fn get(&self, key: &str) -> Result<Option<String>> {
		let value = self.lock().get(key).cloned();
		if self.yield_after_read {
			tokio::task::yield_now().await;
		}
		Ok(value)
	}

	async fn put(&self, key: &str, value: &str) -> Result<()> {
		self.lock().insert(key.to_string(), value.to_string());
		Ok(())
	}

	async fn put_if_absent(&self, key: &str, value: &str) -> Result<bool> {
		let mut entries = self.lock();
		if entries.contains_key(key) {
			return Ok(false);
		}
		entries.insert(key.to_string(), value.to_string());
		Ok(true)
	}

	async fn replace(&self, key: &str, expected: &str, value: &str) -> Result<bool> {
		let mut entries = self.lock();
		match entries.get_mut(key) {
			Some(current) if current == expected => {
				*current = value.to_string();
				Ok(true)
			}
			_ => Ok(false),
		}
	}

	async fn delete(&self, key: &str) -> Result<()> {
		self.lock().remove(key);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_put_if_absent_only_writes_once() {
		let store = MemoryCoordinationStore::new();
		assert!(store.put_if_absent("a", "1").await.unwrap());
		assert!(!store.put_if_absent("a", "2").await.unwrap());
		assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
	}

	#[tokio::test]
	async fn test_replace_requires_expected_value() {
		let store = MemoryCoordinationStore::new();
		assert!(!store.replace("a", "", "1").await.unwrap());
		assert!(store.get("a").await.unwrap().is_none());

		store.put("a", "").await.unwrap();
		assert!(!store.replace("a", "0", "1").await.unwrap());
		assert!(store.replace("a", "", "1").await.unwrap());
		assert!(!store.replace("a", "", "2").await.unwrap());
		assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
	}

	#[tokio::test]
	async fn test_delete_absent_is_ok() {
		let store = MemoryCoordinationStore::new();
		store.delete("missing").await.unwrap();
		store.put("a", "1").await.unwrap();
		store.delete("a").await.unwrap();
		assert!(store.get("a").await.unwrap().is_none());
	}
}
