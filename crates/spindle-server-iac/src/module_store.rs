// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use bytes::Bytes;
use spindle_server_blob::BlobStore;
use tracing::{debug, instrument};

use crate::error::{IacError, Result};
use crate::module::Module;

/// Blob key of the persisted module for a resource id.
pub fn module_key(id: i64) -> String {
	format!("modules/{id}")
}

/// Persists modules after a successful apply.
///
/// Entries whose keys are in `strip_keys` (transition markers, backend
/// credentials) are removed before the module is written.
#[derive(Clone)]
pub struct ModuleStore {
	blobs: Arc<dyn BlobStore>,
	strip_keys: Vec<String>,
}

impl ModuleStore {
	pub fn new(blobs: Arc<dyn BlobStore>, strip_keys: Vec<String>) -> Self {
		Self { blobs, strip_keys }
	}

	#[instrument(skip(self, module), fields(module_id = module.id))]
	pub async fn save(&self, module: &Module) -> Result<()> {
		let bytes = module.sanitized(&self.strip_keys).to_bytes()?;
		self.blobs.put(&module_key(module.id), Bytes::from(bytes)).await?;
		debug!("persisted module");
		Ok(())
	}

	/// Loads a module. A missing module is [`IacError::NotFound`].
	#[instrument(skip(self))]
	pub async fn load(&self, id: i64) -> Result<Module> {
		let key = module_key(id);
		let bytes = self
			.blobs
			.get(&key)
			.await?
			.ok_or_else(|| IacError::NotFound(key))?;
		Module::from_bytes(&bytes)
	}

	#[instrument(skip(self))]
	pub async fn delete(&self, id: i64) -> Result<()> {
		self.blobs.delete(&module_key(id)).await?;
		Ok(())
	}

	pub async fn exists(&self, id: i64) -> Result<bool> {
		Ok(self.blobs.exists(&module_key(id)).await?)
	}
}

impl std::fmt::Debug for ModuleStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ModuleStore")
			.field("strip_keys", &self.strip_keys)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use spindle_server_blob::MemoryBlobStore;

	#[tokio::test]
	async fn test_save_strips_keys_and_round_trips() {
		let blobs = MemoryBlobStore::new();
		let store = ModuleStore::new(
			Arc::new(blobs.clone()),
			vec!["TRANSITION".to_string(), "AWS_SECRET_ACCESS_KEY".to_string()],
		);
		let mut module = Module::new(42, "resource \"a\" \"b\" {}");
		module.push_env("TRANSITION", "start");
		module.push_env("AWS_SECRET_ACCESS_KEY", "hunter2");
		module.push_env("IMAGE", "x/y");

		store.save(&module).await.unwrap();
		assert_eq!(blobs.keys().await, vec!["modules/42".to_string()]);

		let loaded = store.load(42).await.unwrap();
		assert_eq!(loaded.configuration, module.configuration);
		assert!(!loaded.has_env("TRANSITION"));
		assert!(!loaded.has_env("AWS_SECRET_ACCESS_KEY"));
		assert_eq!(loaded.env_value("IMAGE"), Some("x/y"));
	}

	#[tokio::test]
	async fn test_missing_module_is_not_found() {
		let store = ModuleStore::new(Arc::new(MemoryBlobStore::new()), Vec::new());
		assert!(store.load(7).await.unwrap_err().is_not_found());
		assert!(!store.exists(7).await.unwrap());
	}

	#[tokio::test]
	async fn test_delete_is_idempotent() {
		let store = ModuleStore::new(Arc::new(MemoryBlobStore::new()), Vec::new());
		store.save(&Module::new(1, "x")).await.unwrap();
		store.delete(1).await.unwrap();
		store.delete(1).await.unwrap();
		assert!(!store.exists(1).await.unwrap());
	}
}
