// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! IaC engine invocation settings.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvisionerConfigLayer {
	pub binary: Option<String>,
	pub work_dir: Option<PathBuf>,
	pub command_timeout_secs: Option<u64>,
	pub plugin_cache_dir: Option<PathBuf>,
	pub workspace_resource_type: Option<String>,
	pub agent_resource_type: Option<String>,
	pub transition_env: Option<String>,
}

impl ProvisionerConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.binary.is_some() {
			self.binary = other.binary;
		}
		if other.work_dir.is_some() {
			self.work_dir = other.work_dir;
		}
		if other.command_timeout_secs.is_some() {
			self.command_timeout_secs = other.command_timeout_secs;
		}
		if other.plugin_cache_dir.is_some() {
			self.plugin_cache_dir = other.plugin_cache_dir;
		}
		if other.workspace_resource_type.is_some() {
			self.workspace_resource_type = other.workspace_resource_type;
		}
		if other.agent_resource_type.is_some() {
			self.agent_resource_type = other.agent_resource_type;
		}
		if other.transition_env.is_some() {
			self.transition_env = other.transition_env;
		}
	}

	pub fn resolve(self) -> Result<ProvisionerConfig, ConfigError> {
		let defaults = ProvisionerConfig::default();
		let config = ProvisionerConfig {
			binary: self.binary.unwrap_or(defaults.binary),
			work_dir: self.work_dir.unwrap_or(defaults.work_dir),
			command_timeout_secs: self
				.command_timeout_secs
				.unwrap_or(defaults.command_timeout_secs),
			plugin_cache_dir: self.plugin_cache_dir,
			workspace_resource_type: self
				.workspace_resource_type
				.unwrap_or(defaults.workspace_resource_type),
			agent_resource_type: self
				.agent_resource_type
				.unwrap_or(defaults.agent_resource_type),
			transition_env: self.transition_env.unwrap_or(defaults.transition_env),
		};

		if config.command_timeout_secs == 0 {
			return Err(ConfigError::Validation(
				"provisioner.command_timeout_secs must be greater than zero".to_string(),
			));
		}
		if config.binary.trim().is_empty() {
			return Err(ConfigError::Validation(
				"provisioner.binary must not be empty".to_string(),
			));
		}

		Ok(config)
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionerConfig {
	pub binary: String,
	pub work_dir: PathBuf,
	pub command_timeout_secs: u64,
	pub plugin_cache_dir: Option<PathBuf>,
	/// Statefile resource type carrying `start_count`.
	pub workspace_resource_type: String,
	/// Statefile resource type carrying the agent `id` and `token`.
	pub agent_resource_type: String,
	/// Environment variable the module reads to learn the requested transition.
	pub transition_env: String,
}

impl Default for ProvisionerConfig {
	fn default() -> Self {
		Self {
			binary: "terraform".to_string(),
			work_dir: PathBuf::from("/var/lib/spindle/work"),
			command_timeout_secs: 1800,
			plugin_cache_dir: None,
			workspace_resource_type: "spindle_workspace".to_string(),
			agent_resource_type: "spindle_agent".to_string(),
			transition_env: "SPINDLE_WORKSPACE_TRANSITION".to_string(),
		}
	}
}
