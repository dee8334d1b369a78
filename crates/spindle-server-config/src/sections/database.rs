// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pool bookkeeping database.
//!
//! Reconcile passes for the volume and workspace pools run concurrently and
//! both write, so the connection count and the time a writer waits for the
//! SQLite write lock are tunable.

use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_URL: &str = "sqlite:./spindle.db";
const DEFAULT_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
	pub url: String,
	pub max_connections: u32,
	/// How long a connection waits for the write lock before failing.
	pub busy_timeout_secs: u64,
}

impl Default for DatabaseConfig {
	fn default() -> Self {
		Self {
			url: DEFAULT_URL.to_string(),
			max_connections: DEFAULT_MAX_CONNECTIONS,
			busy_timeout_secs: DEFAULT_BUSY_TIMEOUT_SECS,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfigLayer {
	#[serde(default)]
	pub url: Option<String>,
	#[serde(default)]
	pub max_connections: Option<u32>,
	#[serde(default)]
	pub busy_timeout_secs: Option<u64>,
}

impl DatabaseConfigLayer {
	pub fn merge(&mut self, other: DatabaseConfigLayer) {
		if other.url.is_some() {
			self.url = other.url;
		}
		if other.max_connections.is_some() {
			self.max_connections = other.max_connections;
		}
		if other.busy_timeout_secs.is_some() {
			self.busy_timeout_secs = other.busy_timeout_secs;
		}
	}

	pub fn resolve(self) -> Result<DatabaseConfig, ConfigError> {
		let defaults = DatabaseConfig::default();
		let config = DatabaseConfig {
			url: self.url.unwrap_or(defaults.url),
			max_connections: self.max_connections.unwrap_or(defaults.max_connections),
			busy_timeout_secs: self.busy_timeout_secs.unwrap_or(defaults.busy_timeout_secs),
		};

		if !config.url.starts_with("sqlite:") {
			return Err(ConfigError::Validation(format!(
				"database.url must be a sqlite: url, got '{}'",
				config.url
			)));
		}
		if config.max_connections == 0 {
			return Err(ConfigError::Validation(
				"database.max_connections must be greater than zero".to_string(),
			));
		}
		if config.busy_timeout_secs == 0 {
			return Err(ConfigError::Validation(
				"database.busy_timeout_secs must be greater than zero".to_string(),
			));
		}

		Ok(config)
	}
}
