// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Jobs configuration section.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobsConfigLayer {
	pub max_retries: Option<u32>,
	pub history_size: Option<usize>,
}

impl JobsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.max_retries.is_some() {
			self.max_retries = other.max_retries;
		}
		if other.history_size.is_some() {
			self.history_size = other.history_size;
		}
	}

	pub fn finalize(self) -> JobsConfig {
		JobsConfig {
			max_retries: self.max_retries.unwrap_or(3),
			history_size: self.history_size.unwrap_or(20),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobsConfig {
	pub max_retries: u32,
	/// Runs kept per job for health reporting.
	pub history_size: usize,
}

impl Default for JobsConfig {
	fn default() -> Self {
		Self {
			max_retries: 3,
			history_size: 20,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_layer_finalize_defaults() {
		assert_eq!(JobsConfigLayer::default().finalize(), JobsConfig::default());
	}

	#[test]
	fn test_merge_overwrites() {
		let mut base = JobsConfigLayer {
			max_retries: Some(5),
			history_size: Some(50),
		};
		base.merge(JobsConfigLayer {
			max_retries: Some(1),
			history_size: None,
		});
		assert_eq!(base.max_retries, Some(1));
		assert_eq!(base.history_size, Some(50));
	}

	#[test]
	fn test_serde_roundtrip() {
		let config = JobsConfig {
			max_retries: 7,
			history_size: 5,
		};
		let toml_str = toml::to_string(&config).unwrap();
		let parsed: JobsConfig = toml::from_str(&toml_str).unwrap();
		assert_eq!(config, parsed);
	}
}
