// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Warm pool targets and reconciliation settings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One volume sizing bucket and the number of available volumes to keep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeBucketConfig {
	pub disk_gb: i64,
	pub storage_class: String,
	pub target: u32,
}

/// One workspace shape and the number of warm workspaces to keep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceBucketConfig {
	pub image: String,
	pub cpu: i64,
	pub memory_gb: i64,
	pub disk_gb: i64,
	pub storage_class: String,
	pub target: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolsConfigLayer {
	pub reconcile_interval_secs: Option<u64>,
	pub concurrency: Option<usize>,
	pub volume_template: Option<PathBuf>,
	pub workspace_template: Option<PathBuf>,
	pub volume_buckets: Option<Vec<VolumeBucketConfig>>,
	pub workspace_buckets: Option<Vec<WorkspaceBucketConfig>>,
}

impl PoolsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.reconcile_interval_secs.is_some() {
			self.reconcile_interval_secs = other.reconcile_interval_secs;
		}
		if other.concurrency.is_some() {
			self.concurrency = other.concurrency;
		}
		if other.volume_template.is_some() {
			self.volume_template = other.volume_template;
		}
		if other.workspace_template.is_some() {
			self.workspace_template = other.workspace_template;
		}
		if other.volume_buckets.is_some() {
			self.volume_buckets = other.volume_buckets;
		}
		if other.workspace_buckets.is_some() {
			self.workspace_buckets = other.workspace_buckets;
		}
	}

	pub fn resolve(self) -> Result<PoolsConfig, ConfigError> {
		let config = PoolsConfig {
			reconcile_interval_secs: self.reconcile_interval_secs.unwrap_or(60),
			concurrency: self.concurrency.unwrap_or(4),
			volume_template: self.volume_template,
			workspace_template: self.workspace_template,
			volume_buckets: self.volume_buckets.unwrap_or_default(),
			workspace_buckets: self.workspace_buckets.unwrap_or_default(),
		};
		config.validate()?;
		Ok(config)
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolsConfig {
	pub reconcile_interval_secs: u64,
	/// Maximum concurrent provision/teardown operations per reconcile pass.
	pub concurrency: usize,
	pub volume_template: Option<PathBuf>,
	pub workspace_template: Option<PathBuf>,
	pub volume_buckets: Vec<VolumeBucketConfig>,
	pub workspace_buckets: Vec<WorkspaceBucketConfig>,
}

impl Default for PoolsConfig {
	fn default() -> Self {
		Self {
			reconcile_interval_secs: 60,
			concurrency: 4,
			volume_template: None,
			workspace_template: None,
			volume_buckets: Vec::new(),
			workspace_buckets: Vec::new(),
		}
	}
}

impl PoolsConfig {
	fn validate(&self) -> Result<(), ConfigError> {
		if self.concurrency == 0 {
			return Err(ConfigError::Validation(
				"pools.concurrency must be greater than zero".to_string(),
			));
		}
		if self.reconcile_interval_secs == 0 {
			return Err(ConfigError::Validation(
				"pools.reconcile_interval_secs must be greater than zero".to_string(),
			));
		}
		if !self.volume_buckets.is_empty() && self.volume_template.is_none() {
			return Err(ConfigError::Validation(
				"pools.volume_buckets requires pools.volume_template".to_string(),
			));
		}
		if !self.workspace_buckets.is_empty() && self.workspace_template.is_none() {
			return Err(ConfigError::Validation(
				"pools.workspace_buckets requires pools.workspace_template".to_string(),
			));
		}
		for bucket in &self.volume_buckets {
			if bucket.disk_gb <= 0 {
				return Err(ConfigError::Validation(format!(
					"volume bucket disk_gb must be positive, got {}",
					bucket.disk_gb
				)));
			}
		}
		for bucket in &self.workspace_buckets {
			if bucket.image.trim().is_empty() {
				return Err(ConfigError::Validation(
					"workspace bucket image must not be empty".to_string(),
				));
			}
			if bucket.cpu <= 0 || bucket.memory_gb <= 0 || bucket.disk_gb <= 0 {
				return Err(ConfigError::Validation(format!(
					"workspace bucket for {} must have positive cpu, memory_gb and disk_gb",
					bucket.image
				)));
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = PoolsConfigLayer::default().resolve().unwrap();
		assert_eq!(config, PoolsConfig::default());
	}

	#[test]
	fn test_buckets_require_template() {
		let layer = PoolsConfigLayer {
			volume_buckets: Some(vec![VolumeBucketConfig {
				disk_gb: 10,
				storage_class: "standard".to_string(),
				target: 2,
			}]),
			..Default::default()
		};
		let err = layer.resolve().unwrap_err();
		assert!(err.to_string().contains("volume_template"));
	}

	#[test]
	fn test_zero_concurrency_rejected() {
		let layer = PoolsConfigLayer {
			concurrency: Some(0),
			..Default::default()
		};
		assert!(matches!(layer.resolve(), Err(ConfigError::Validation(_))));
	}

	#[test]
	fn test_deserialize_buckets() {
		let layer: PoolsConfigLayer = toml::from_str(
			r#"
concurrency = 8
workspace_template = "/etc/spindle/templates/workspace.tf"

[[workspace_buckets]]
image = "ghcr.io/acme/dev:latest"
cpu = 2
memory_gb = 4
disk_gb = 10
storage_class = "standard"
target = 3
"#,
		)
		.unwrap();
		let config = layer.resolve().unwrap();
		assert_eq!(config.concurrency, 8);
		assert_eq!(config.workspace_buckets.len(), 1);
		assert_eq!(config.workspace_buckets[0].target, 3);
	}

	#[test]
	fn test_non_positive_workspace_shape_rejected() {
		let layer = PoolsConfigLayer {
			workspace_template: Some(PathBuf::from("/t.tf")),
			workspace_buckets: Some(vec![WorkspaceBucketConfig {
				image: "x/y".to_string(),
				cpu: 0,
				memory_gb: 4,
				disk_gb: 10,
				storage_class: "standard".to_string(),
				target: 1,
			}]),
			..Default::default()
		};
		assert!(layer.resolve().is_err());
	}
}
