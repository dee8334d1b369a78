// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cluster coordination settings for the per-resource job lock.

use std::str::FromStr;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationKind {
	/// Single-node deployments and tests.
	#[default]
	Memory,
	Kubernetes,
}

impl FromStr for CoordinationKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"memory" => Ok(Self::Memory),
			"kubernetes" | "k8s" => Ok(Self::Kubernetes),
			other => Err(format!("unknown coordination kind '{other}'")),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStrategyKind {
	#[default]
	CompareAndSwap,
	CheckThenWrite,
}

impl FromStr for LockStrategyKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"compare_and_swap" | "cas" => Ok(Self::CompareAndSwap),
			"check_then_write" => Ok(Self::CheckThenWrite),
			other => Err(format!("unknown lock strategy '{other}'")),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoordinationConfigLayer {
	pub kind: Option<CoordinationKind>,
	pub namespace: Option<String>,
	pub lock_strategy: Option<LockStrategyKind>,
}

impl CoordinationConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.kind.is_some() {
			self.kind = other.kind;
		}
		if other.namespace.is_some() {
			self.namespace = other.namespace;
		}
		if other.lock_strategy.is_some() {
			self.lock_strategy = other.lock_strategy;
		}
	}

	pub fn finalize(self) -> CoordinationConfig {
		CoordinationConfig {
			kind: self.kind.unwrap_or_default(),
			namespace: self.namespace.unwrap_or_else(|| "spindle".to_string()),
			lock_strategy: self.lock_strategy.unwrap_or_default(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinationConfig {
	pub kind: CoordinationKind,
	pub namespace: String,
	pub lock_strategy: LockStrategyKind,
}

impl Default for CoordinationConfig {
	fn default() -> Self {
		CoordinationConfigLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = CoordinationConfig::default();
		assert_eq!(config.kind, CoordinationKind::Memory);
		assert_eq!(config.namespace, "spindle");
		assert_eq!(config.lock_strategy, LockStrategyKind::CompareAndSwap);
	}

	#[test]
	fn test_deserialize() {
		let layer: CoordinationConfigLayer = toml::from_str(
			r#"
kind = "kubernetes"
lock_strategy = "check_then_write"
"#,
		)
		.unwrap();
		let config = layer.finalize();
		assert_eq!(config.kind, CoordinationKind::Kubernetes);
		assert_eq!(config.lock_strategy, LockStrategyKind::CheckThenWrite);
	}

	#[test]
	fn test_from_str() {
		assert_eq!("k8s".parse::<CoordinationKind>().unwrap(), CoordinationKind::Kubernetes);
		assert_eq!(
			"cas".parse::<LockStrategyKind>().unwrap(),
			LockStrategyKind::CompareAndSwap
		);
		assert!("etcd".parse::<CoordinationKind>().is_err());
	}
}
