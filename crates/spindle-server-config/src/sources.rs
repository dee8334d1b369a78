// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;

use tracing::{debug, trace};

use crate::env::{env_bool, env_json, env_parse, env_var, load_secret_env};
use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	CoordinationConfigLayer, DatabaseConfigLayer, JobsConfigLayer, LoggingConfigLayer,
	PoolsConfigLayer, ProvisionerConfigLayer, S3StorageConfigLayer, StorageConfigLayer,
	WorkspaceConfigLayer,
};

/// Default system-wide configuration file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/spindle/server.toml";

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source.
pub struct TomlSource {
	path: PathBuf,
	required: bool,
}

impl TomlSource {
	/// A file the operator asked for explicitly; missing is an error.
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			required: true,
		}
	}

	/// The system file, skipped when absent.
	pub fn system() -> Self {
		Self {
			path: PathBuf::from(SYSTEM_CONFIG_PATH),
			required: false,
		}
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.required && !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: SPINDLE_SERVER_<SECTION>_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			database: Some(load_database_from_env()?),
			provisioner: Some(load_provisioner_from_env()?),
			state_backend: Some(load_storage_from_env("SPINDLE_SERVER_STATE_BACKEND")?),
			blob: Some(load_storage_from_env("SPINDLE_SERVER_BLOB")?),
			coordination: Some(load_coordination_from_env()?),
			pools: Some(load_pools_from_env()?),
			workspace: Some(load_workspace_from_env()?),
			logging: Some(load_logging_from_env()?),
			jobs: Some(load_jobs_from_env()?),
		})
	}
}

fn load_database_from_env() -> Result<DatabaseConfigLayer, ConfigError> {
	Ok(DatabaseConfigLayer {
		url: env_var("SPINDLE_SERVER_DATABASE_URL"),
		max_connections: env_parse("SPINDLE_SERVER_DATABASE_MAX_CONNECTIONS")?,
		busy_timeout_secs: env_parse("SPINDLE_SERVER_DATABASE_BUSY_TIMEOUT_SECS")?,
	})
}

fn load_provisioner_from_env() -> Result<ProvisionerConfigLayer, ConfigError> {
	Ok(ProvisionerConfigLayer {
		binary: env_var("SPINDLE_SERVER_PROVISIONER_BINARY"),
		work_dir: env_var("SPINDLE_SERVER_PROVISIONER_WORK_DIR").map(PathBuf::from),
		command_timeout_secs: env_parse("SPINDLE_SERVER_PROVISIONER_COMMAND_TIMEOUT_SECS")?,
		plugin_cache_dir: env_var("SPINDLE_SERVER_PROVISIONER_PLUGIN_CACHE_DIR").map(PathBuf::from),
		workspace_resource_type: env_var("SPINDLE_SERVER_PROVISIONER_WORKSPACE_RESOURCE_TYPE"),
		agent_resource_type: env_var("SPINDLE_SERVER_PROVISIONER_AGENT_RESOURCE_TYPE"),
		transition_env: env_var("SPINDLE_SERVER_PROVISIONER_TRANSITION_ENV"),
	})
}

/// `prefix` is `SPINDLE_SERVER_STATE_BACKEND` or `SPINDLE_SERVER_BLOB`.
fn load_storage_from_env(prefix: &str) -> Result<StorageConfigLayer, ConfigError> {
	let s3 = S3StorageConfigLayer {
		endpoint: env_var(&format!("{prefix}_S3_ENDPOINT")),
		region: env_var(&format!("{prefix}_S3_REGION")),
		bucket: env_var(&format!("{prefix}_S3_BUCKET")),
		access_key: env_var(&format!("{prefix}_S3_ACCESS_KEY")),
		secret_key: load_secret_env(&format!("{prefix}_S3_SECRET_KEY"))?,
		path_style: env_bool(&format!("{prefix}_S3_PATH_STYLE")),
	};

	Ok(StorageConfigLayer {
		kind: env_parse(&format!("{prefix}_KIND"))?,
		local_path: env_var(&format!("{prefix}_LOCAL_PATH")).map(PathBuf::from),
		s3: Some(s3),
	})
}

fn load_coordination_from_env() -> Result<CoordinationConfigLayer, ConfigError> {
	Ok(CoordinationConfigLayer {
		kind: env_parse("SPINDLE_SERVER_COORDINATION_KIND")?,
		namespace: env_var("SPINDLE_SERVER_COORDINATION_NAMESPACE"),
		lock_strategy: env_parse("SPINDLE_SERVER_COORDINATION_LOCK_STRATEGY")?,
	})
}

fn load_pools_from_env() -> Result<PoolsConfigLayer, ConfigError> {
	Ok(PoolsConfigLayer {
		reconcile_interval_secs: env_parse("SPINDLE_SERVER_POOLS_RECONCILE_INTERVAL_SECS")?,
		concurrency: env_parse("SPINDLE_SERVER_POOLS_CONCURRENCY")?,
		volume_template: env_var("SPINDLE_SERVER_POOLS_VOLUME_TEMPLATE").map(PathBuf::from),
		workspace_template: env_var("SPINDLE_SERVER_POOLS_WORKSPACE_TEMPLATE").map(PathBuf::from),
		volume_buckets: env_json("SPINDLE_SERVER_POOLS_VOLUME_BUCKETS")?,
		workspace_buckets: env_json("SPINDLE_SERVER_POOLS_WORKSPACE_BUCKETS")?,
	})
}

fn load_workspace_from_env() -> Result<WorkspaceConfigLayer, ConfigError> {
	Ok(WorkspaceConfigLayer {
		template_with_volume: env_var("SPINDLE_SERVER_WORKSPACE_TEMPLATE_WITH_VOLUME")
			.map(PathBuf::from),
		template_without_volume: env_var("SPINDLE_SERVER_WORKSPACE_TEMPLATE_WITHOUT_VOLUME")
			.map(PathBuf::from),
		default_storage_class: env_var("SPINDLE_SERVER_WORKSPACE_DEFAULT_STORAGE_CLASS"),
		host_aliases: env_json("SPINDLE_SERVER_WORKSPACE_HOST_ALIASES")?,
		registry_caches: env_json("SPINDLE_SERVER_WORKSPACE_REGISTRY_CACHES")?,
	})
}

fn load_logging_from_env() -> Result<LoggingConfigLayer, ConfigError> {
	Ok(LoggingConfigLayer {
		level: env_var("SPINDLE_SERVER_LOG_LEVEL"),
		format: env_parse("SPINDLE_SERVER_LOG_FORMAT")?,
	})
}

fn load_jobs_from_env() -> Result<JobsConfigLayer, ConfigError> {
	Ok(JobsConfigLayer {
		max_retries: env_parse("SPINDLE_SERVER_JOBS_MAX_RETRIES")?,
		history_size: env_parse("SPINDLE_SERVER_JOBS_HISTORY_SIZE")?,
	})
}
