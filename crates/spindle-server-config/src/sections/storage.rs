// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Object storage settings, shared by the `state_backend` and `blob` sections.

use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;
use spindle_common_secret::SecretString;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
	#[default]
	Local,
	S3,
}

impl FromStr for StorageKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"local" => Ok(Self::Local),
			"s3" => Ok(Self::S3),
			other => Err(format!("unknown storage kind '{other}' (expected local or s3)")),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct S3StorageConfigLayer {
	pub endpoint: Option<String>,
	pub region: Option<String>,
	pub bucket: Option<String>,
	pub access_key: Option<String>,
	pub secret_key: Option<SecretString>,
	pub path_style: Option<bool>,
}

impl S3StorageConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.endpoint.is_some() {
			self.endpoint = other.endpoint;
		}
		if other.region.is_some() {
			self.region = other.region;
		}
		if other.bucket.is_some() {
			self.bucket = other.bucket;
		}
		if other.access_key.is_some() {
			self.access_key = other.access_key;
		}
		if other.secret_key.is_some() {
			self.secret_key = other.secret_key;
		}
		if other.path_style.is_some() {
			self.path_style = other.path_style;
		}
	}

	fn is_empty(&self) -> bool {
		self.endpoint.is_none()
			&& self.region.is_none()
			&& self.bucket.is_none()
			&& self.access_key.is_none()
			&& self.secret_key.is_none()
			&& self.path_style.is_none()
	}

	fn resolve(self, section: &str) -> Result<S3StorageConfig, ConfigError> {
		let missing = |field: &str| {
			ConfigError::Validation(format!("{section}.kind = \"s3\" requires {section}.s3.{field}"))
		};

		let bucket = self.bucket.ok_or_else(|| missing("bucket"))?;
		let access_key = self.access_key.ok_or_else(|| missing("access_key"))?;
		let secret_key = self
			.secret_key
			.filter(|s| !s.is_empty())
			.ok_or_else(|| missing("secret_key"))?;

		Ok(S3StorageConfig {
			endpoint: self
				.endpoint
				.unwrap_or_else(|| "https://s3.amazonaws.com".to_string()),
			region: self.region.unwrap_or_else(|| "us-east-1".to_string()),
			bucket,
			access_key,
			secret_key,
			path_style: self.path_style.unwrap_or(true),
		})
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct S3StorageConfig {
	pub endpoint: String,
	pub region: String,
	pub bucket: String,
	pub access_key: String,
	pub secret_key: SecretString,
	pub path_style: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfigLayer {
	pub kind: Option<StorageKind>,
	pub local_path: Option<PathBuf>,
	pub s3: Option<S3StorageConfigLayer>,
}

impl StorageConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.kind.is_some() {
			self.kind = other.kind;
		}
		if other.local_path.is_some() {
			self.local_path = other.local_path;
		}
		match (&mut self.s3, other.s3) {
			(Some(base), Some(overlay)) => base.merge(overlay),
			(None, Some(overlay)) if !overlay.is_empty() => self.s3 = Some(overlay),
			_ => {}
		}
	}

	/// Resolves the layer. `section` names the TOML table in error messages.
	pub fn resolve(self, section: &str, default_local_path: &str) -> Result<StorageConfig, ConfigError> {
		match self.kind.unwrap_or_default() {
			StorageKind::Local => Ok(StorageConfig::Local {
				path: self
					.local_path
					.unwrap_or_else(|| PathBuf::from(default_local_path)),
			}),
			StorageKind::S3 => {
				let s3 = self.s3.unwrap_or_default().resolve(section)?;
				Ok(StorageConfig::S3(s3))
			}
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum StorageConfig {
	Local { path: PathBuf },
	S3(S3StorageConfig),
}

impl StorageConfig {
	pub fn kind(&self) -> StorageKind {
		match self {
			StorageConfig::Local { .. } => StorageKind::Local,
			StorageConfig::S3(_) => StorageKind::S3,
		}
	}
}
