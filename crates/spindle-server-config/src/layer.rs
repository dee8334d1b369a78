// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The partial, mergeable form of the whole server configuration.

use serde::Deserialize;

use crate::sections::{
	CoordinationConfigLayer, DatabaseConfigLayer, JobsConfigLayer, LoggingConfigLayer,
	PoolsConfigLayer, ProvisionerConfigLayer, StorageConfigLayer, WorkspaceConfigLayer,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfigLayer {
	#[serde(default)]
	pub database: Option<DatabaseConfigLayer>,
	#[serde(default)]
	pub provisioner: Option<ProvisionerConfigLayer>,
	#[serde(default)]
	pub state_backend: Option<StorageConfigLayer>,
	#[serde(default)]
	pub blob: Option<StorageConfigLayer>,
	#[serde(default)]
	pub coordination: Option<CoordinationConfigLayer>,
	#[serde(default)]
	pub pools: Option<PoolsConfigLayer>,
	#[serde(default)]
	pub workspace: Option<WorkspaceConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
	#[serde(default)]
	pub jobs: Option<JobsConfigLayer>,
}

fn merge_section<T: Default>(base: &mut Option<T>, other: Option<T>, merge: impl FnOnce(&mut T, T)) {
	if let Some(other) = other {
		merge(base.get_or_insert_with(T::default), other);
	}
}

impl ServerConfigLayer {
	/// Overlays `other` on top of `self`; set fields in `other` win.
	pub fn merge(&mut self, other: ServerConfigLayer) {
		merge_section(&mut self.database, other.database, DatabaseConfigLayer::merge);
		merge_section(&mut self.provisioner, other.provisioner, ProvisionerConfigLayer::merge);
		merge_section(&mut self.state_backend, other.state_backend, StorageConfigLayer::merge);
		merge_section(&mut self.blob, other.blob, StorageConfigLayer::merge);
		merge_section(&mut self.coordination, other.coordination, CoordinationConfigLayer::merge);
		merge_section(&mut self.pools, other.pools, PoolsConfigLayer::merge);
		merge_section(&mut self.workspace, other.workspace, WorkspaceConfigLayer::merge);
		merge_section(&mut self.logging, other.logging, LoggingConfigLayer::merge);
		merge_section(&mut self.jobs, other.jobs, JobsConfigLayer::merge);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_merge_fills_missing_sections() {
		let mut base = ServerConfigLayer::default();
		base.merge(ServerConfigLayer {
			database: Some(DatabaseConfigLayer {
				url: Some("sqlite::memory:".to_string()),
				..Default::default()
			}),
			..Default::default()
		});
		assert_eq!(
			base.database.and_then(|d| d.url).as_deref(),
			Some("sqlite::memory:")
		);
	}

	#[test]
	fn test_merge_later_layer_wins() {
		let mut base: ServerConfigLayer = toml::from_str(
			r#"
[logging]
level = "debug"
format = "json"
"#,
		)
		.unwrap();
		base.merge(ServerConfigLayer {
			logging: Some(LoggingConfigLayer {
				level: Some("warn".to_string()),
				format: None,
			}),
			..Default::default()
		});
		let logging = base.logging.unwrap();
		assert_eq!(logging.level.as_deref(), Some("warn"));
		assert!(logging.format.is_some());
	}

	#[test]
	fn test_unknown_section_is_ignored() {
		let layer: ServerConfigLayer = toml::from_str("[telemetry]\nenabled = true\n").unwrap();
		assert!(layer.database.is_none());
	}
}
