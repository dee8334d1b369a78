// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Workspace templates and image/network substitutions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAliasConfig {
	pub ip: String,
	pub hostnames: Vec<String>,
}

/// Rewrites images pulled from `source` to go through `cache`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCacheConfig {
	pub source: String,
	pub cache: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkspaceConfigLayer {
	pub template_with_volume: Option<PathBuf>,
	pub template_without_volume: Option<PathBuf>,
	pub default_storage_class: Option<String>,
	pub host_aliases: Option<Vec<HostAliasConfig>>,
	pub registry_caches: Option<Vec<RegistryCacheConfig>>,
}

impl WorkspaceConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.template_with_volume.is_some() {
			self.template_with_volume = other.template_with_volume;
		}
		if other.template_without_volume.is_some() {
			self.template_without_volume = other.template_without_volume;
		}
		if other.default_storage_class.is_some() {
			self.default_storage_class = other.default_storage_class;
		}
		if other.host_aliases.is_some() {
			self.host_aliases = other.host_aliases;
		}
		if other.registry_caches.is_some() {
			self.registry_caches = other.registry_caches;
		}
	}

	pub fn finalize(self) -> WorkspaceConfig {
		WorkspaceConfig {
			template_with_volume: self.template_with_volume,
			template_without_volume: self.template_without_volume,
			default_storage_class: self
				.default_storage_class
				.unwrap_or_else(|| "standard".to_string()),
			host_aliases: self.host_aliases.unwrap_or_default(),
			registry_caches: self.registry_caches.unwrap_or_default(),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceConfig {
	pub template_with_volume: Option<PathBuf>,
	pub template_without_volume: Option<PathBuf>,
	pub default_storage_class: String,
	pub host_aliases: Vec<HostAliasConfig>,
	pub registry_caches: Vec<RegistryCacheConfig>,
}

impl Default for WorkspaceConfig {
	fn default() -> Self {
		WorkspaceConfigLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = WorkspaceConfig::default();
		assert_eq!(config.default_storage_class, "standard");
		assert!(config.host_aliases.is_empty());
		assert!(config.registry_caches.is_empty());
	}

	#[test]
	fn test_deserialize_lists() {
		let layer: WorkspaceConfigLayer = toml::from_str(
			r#"
template_with_volume = "/etc/spindle/templates/with-volume.tf"

[[host_aliases]]
ip = "10.0.0.5"
hostnames = ["git.internal", "registry.internal"]

[[registry_caches]]
source = "docker.io"
cache = "localhost:5000"
"#,
		)
		.unwrap();
		let config = layer.finalize();
		assert_eq!(config.host_aliases[0].hostnames.len(), 2);
		assert_eq!(config.registry_caches[0].cache, "localhost:5000");
		assert!(config.template_without_volume.is_none());
	}
}
