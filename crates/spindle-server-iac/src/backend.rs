// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Where the IaC engine keeps its statefiles.
//!
//! A backend produces the engine-native `backend` block injected into each
//! module, the credential environment the engine needs to reach it, and
//! direct access to the statefiles for interpretation and cleanup.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use spindle_common_s3::{S3Client, S3Config};
use spindle_server_blob::{BlobStore, LocalBlobStore, S3BlobStore};
use tracing::debug;

use crate::error::{IacError, Result};
use crate::module::EnvEntry;

/// Suffix of the copy the engine keeps of the previous state.
pub const BACKUP_SUFFIX: &str = ".backup";

/// Statefile path for a resource id.
pub fn state_path(id: i64) -> String {
	format!("states/{id}")
}

#[async_trait]
pub trait StateBackend: Send + Sync {
	fn name(&self) -> &'static str;

	/// The `terraform { backend ... }` block for the statefile at `state_path`.
	fn configuration(&self, state_path: &str) -> String;

	/// Environment the engine needs to reach the backend.
	fn credentials(&self) -> Vec<EnvEntry>;

	async fn get_statefile(&self, path: &str) -> Result<Option<Bytes>>;

	/// Removes the statefile and its backup. Absent files are not an error.
	async fn remove_statefile(&self, path: &str) -> Result<()>;
}

fn hcl_quote(value: &str) -> String {
	serde_json::Value::String(value.to_string()).to_string()
}

/// Statefiles on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalBackend {
	root: PathBuf,
	store: LocalBlobStore,
}

impl LocalBackend {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		let root = root.into();
		Self {
			store: LocalBlobStore::new(root.clone()),
			root,
		}
	}

	pub fn root(&self) -> &Path {
		&self.root
	}
}

#[async_trait]
impl StateBackend for LocalBackend {
	fn name(&self) -> &'static str {
		"local"
	}

	fn configuration(&self, state_path: &str) -> String {
		let path = self.root.join(state_path);
		format!(
			"terraform {{\n  backend \"local\" {{\n    path = {}\n  }}\n}}\n",
			hcl_quote(&path.display().to_string())
		)
	}

	fn credentials(&self) -> Vec<EnvEntry> {
		Vec::new()
	}

	async fn get_statefile(&self, path: &str) -> Result<Option<Bytes>> {
		Ok(self.store.get(path).await?)
	}

	async fn remove_statefile(&self, path: &str) -> Result<()> {
		self.store.delete(path).await?;
		self.store.delete(&format!("{path}{BACKUP_SUFFIX}")).await?;
		debug!(path, backend = "local", "removed statefile");
		Ok(())
	}
}

/// Statefiles in an S3-compatible bucket.
#[derive(Debug, Clone)]
pub struct S3Backend {
	config: S3Config,
	store: S3BlobStore,
}

impl S3Backend {
	pub fn new(config: S3Config) -> Result<Self> {
		let client = S3Client::new(config.clone()).map_err(|e| IacError::Backend(e.to_string()))?;
		Ok(Self {
			config,
			store: S3BlobStore::new(client),
		})
	}
}

#[async_trait]
impl StateBackend for S3Backend {
	fn name(&self) -> &'static str {
		"s3"
	}

	fn configuration(&self, state_path: &str) -> String {
		format!(
			concat!(
				"terraform {{\n",
				"  backend \"s3\" {{\n",
				"    bucket                      = {bucket}\n",
				"    key                         = {key}\n",
				"    region                      = {region}\n",
				"    endpoints                   = {{ s3 = {endpoint} }}\n",
				"    use_path_style              = {path_style}\n",
				"    skip_credentials_validation = true\n",
				"    skip_region_validation      = true\n",
				"    skip_requesting_account_id  = true\n",
				"    skip_metadata_api_check     = true\n",
				"  }}\n",
				"}}\n",
			),
			bucket = hcl_quote(&self.config.bucket),
			key = hcl_quote(state_path),
			region = hcl_quote(&self.config.region),
			endpoint = hcl_quote(&self.config.endpoint),
			path_style = self.config.path_style,
		)
	}

	fn credentials(&self) -> Vec<EnvEntry> {
		vec![
			EnvEntry::new("AWS_ACCESS_KEY_ID", self.config.access_key.clone()),
			EnvEntry::new(
				"AWS_SECRET_ACCESS_KEY",
				self.config.secret_key.expose().clone(),
			),
		]
	}

	async fn get_statefile(&self, path: &str) -> Result<Option<Bytes>> {
		Ok(self.store.get(path).await?)
	}

	async fn remove_statefile(&self, path: &str) -> Result<()> {
		self.store.delete(path).await?;
		self.store.delete(&format!("{path}{BACKUP_SUFFIX}")).await?;
		debug!(path, backend = "s3", "removed statefile");
		Ok(())
	}
}
