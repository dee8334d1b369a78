// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Centralized configuration management for the Spindle server.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Type-safe configuration with validation
//! - Consistent environment variable naming (`SPINDLE_SERVER_*`)
//!
//! # Usage
//!
//! ```ignore
//! use spindle_server_config::load_config;
//!
//! let config = load_config()?;
//! println!("pool database at {}", config.database.url);
//! ```

mod env;
pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use env::load_secret_env;
pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

const DEFAULT_STATE_PATH: &str = "/var/lib/spindle/states";
const DEFAULT_BLOB_PATH: &str = "/var/lib/spindle/blobs";

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub database: DatabaseConfig,
	pub provisioner: ProvisionerConfig,
	pub state_backend: StorageConfig,
	pub blob: StorageConfig,
	pub coordination: CoordinationConfig,
	pub pools: PoolsConfig,
	pub workspace: WorkspaceConfig,
	pub logging: LoggingConfig,
	pub jobs: JobsConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`SPINDLE_SERVER_*`)
/// 2. Config file (`/etc/spindle/server.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
pub fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let database = layer.database.unwrap_or_default().resolve()?;
	let provisioner = layer.provisioner.unwrap_or_default().resolve()?;
	let state_backend = layer
		.state_backend
		.unwrap_or_default()
		.resolve("state_backend", DEFAULT_STATE_PATH)?;
	let blob = layer.blob.unwrap_or_default().resolve("blob", DEFAULT_BLOB_PATH)?;
	let coordination = layer.coordination.unwrap_or_default().finalize();
	let pools = layer.pools.unwrap_or_default().resolve()?;
	let workspace = layer.workspace.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();
	let jobs = layer.jobs.unwrap_or_default().finalize();

	info!(
		database = %database.url,
		iac_binary = %provisioner.binary,
		state_backend = ?state_backend.kind(),
		blob = ?blob.kind(),
		coordination = ?coordination.kind,
		lock_strategy = ?coordination.lock_strategy,
		volume_buckets = pools.volume_buckets.len(),
		workspace_buckets = pools.workspace_buckets.len(),
		"Server configuration loaded"
	);

	Ok(ServerConfig {
		database,
		provisioner,
		state_backend,
		blob,
		coordination,
		pools,
		workspace,
		logging,
		jobs,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_finalize_empty_layer_uses_defaults() {
		let config = finalize(ServerConfigLayer::default()).unwrap();
		assert_eq!(config.database.url, "sqlite:./spindle.db");
		assert_eq!(config.provisioner.binary, "terraform");
		assert_eq!(
			config.state_backend,
			StorageConfig::Local {
				path: DEFAULT_STATE_PATH.into()
			}
		);
		assert_eq!(config.coordination.lock_strategy, LockStrategyKind::CompareAndSwap);
		assert_eq!(config.pools.concurrency, 4);
		assert_eq!(config.jobs.max_retries, 3);
	}

	#[test]
	fn test_finalize_propagates_validation_error() {
		let layer: ServerConfigLayer = toml::from_str(
			r#"
[blob]
kind = "s3"
"#,
		)
		.unwrap();
		let err = finalize(layer).unwrap_err();
		assert!(err.to_string().contains("blob.s3.bucket"));
	}

	#[test]
	fn test_full_file_round_trip() {
		let layer: ServerConfigLayer = toml::from_str(
			r#"
[database]
url = "sqlite:/var/lib/spindle/pool.db"

[provisioner]
binary = "tofu"
command_timeout_secs = 600

[state_backend]
kind = "local"
local_path = "/srv/states"

[coordination]
kind = "kubernetes"
namespace = "spindle-system"

[pools]
volume_template = "/etc/spindle/volume.tf"

[[pools.volume_buckets]]
disk_gb = 10
storage_class = "standard"
target = 2

[logging]
format = "json"
"#,
		)
		.unwrap();
		let config = finalize(layer).unwrap();
		assert_eq!(config.provisioner.binary, "tofu");
		assert_eq!(config.coordination.namespace, "spindle-system");
		assert_eq!(config.pools.volume_buckets[0].target, 2);
		assert_eq!(config.logging.format, LogFormat::Json);
	}
}
