// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use spindle_common_secret::REDACTED;

use crate::error::Result;

/// Replaced by the state backend's configuration block during prepare.
pub const BACKEND_PLACEHOLDER: &str = "{{backend}}";

/// One environment variable passed to the IaC engine.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvEntry {
	pub key: String,
	pub value: String,
}

impl EnvEntry {
	pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
		Self {
			key: key.into(),
			value: value.into(),
		}
	}
}

impl fmt::Debug for EnvEntry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}={REDACTED}", self.key)
	}
}

/// Lifecycle transition requested of a workspace module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
	Start,
	Stop,
	Destroy,
}

impl Transition {
	pub fn as_str(&self) -> &'static str {
		match self {
			Transition::Start => "start",
			Transition::Stop => "stop",
			Transition::Destroy => "destroy",
		}
	}
}

/// One unit of IaC configuration.
///
/// The configuration carries [`BACKEND_PLACEHOLDER`] until the provisioner
/// prepares it. `workdir` is local to this process and never serialized.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
	pub id: i64,
	pub configuration: String,
	#[serde(default)]
	pub env: Vec<EnvEntry>,
	#[serde(skip)]
	pub workdir: Option<PathBuf>,
	#[serde(default)]
	pub validated: bool,
}

impl fmt::Debug for Module {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Module")
			.field("id", &self.id)
			.field("configuration_len", &self.configuration.len())
			.field("env", &self.env)
			.field("workdir", &self.workdir)
			.field("validated", &self.validated)
			.finish()
	}
}

impl Module {
	pub fn new(id: i64, configuration: impl Into<String>) -> Self {
		Self {
			id,
			configuration: configuration.into(),
			env: Vec::new(),
			workdir: None,
			validated: false,
		}
	}

	/// Appends an entry. Duplicate keys are kept in order.
	pub fn push_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
		self.env.push(EnvEntry::new(key, value));
	}

	/// Replaces every entry for `key` with a single one at the end.
	pub fn set_env(&mut self, key: &str, value: impl Into<String>) {
		self.env.retain(|e| e.key != key);
		self.env.push(EnvEntry::new(key, value));
	}

	pub fn has_env(&self, key: &str) -> bool {
		self.env.iter().any(|e| e.key == key)
	}

	/// The last value recorded for `key`.
	pub fn env_value(&self, key: &str) -> Option<&str> {
		self.env
			.iter()
			.rev()
			.find(|e| e.key == key)
			.map(|e| e.value.as_str())
	}

	/// Records the requested transition under `env_key`.
	pub fn set_transition(&mut self, env_key: &str, transition: Transition) {
		self.set_env(env_key, transition.as_str());
	}

	pub fn has_backend_placeholder(&self) -> bool {
		self.configuration.contains(BACKEND_PLACEHOLDER)
	}

	/// SHA-256 of the configuration text, hex encoded.
	pub fn configuration_hash(&self) -> String {
		configuration_hash(&self.configuration)
	}

	/// Copy safe to persist: entries whose key is in `strip_keys` are dropped,
	/// which removes transition markers and backend credentials.
	pub fn sanitized<S: AsRef<str>>(&self, strip_keys: &[S]) -> Module {
		Module {
			id: self.id,
			configuration: self.configuration.clone(),
			env: self
				.env
				.iter()
				.filter(|e| !strip_keys.iter().any(|k| k.as_ref() == e.key))
				.cloned()
				.collect(),
			workdir: None,
			validated: self.validated,
		}
	}

	pub fn to_bytes(&self) -> Result<Vec<u8>> {
		Ok(serde_json::to_vec(self)?)
	}

	pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
		Ok(serde_json::from_slice(bytes)?)
	}
}

pub(crate) fn configuration_hash(configuration: &str) -> String {
	hex::encode(Sha256::digest(configuration.as_bytes()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_new_module_has_placeholder() {
		let module = Module::new(42, format!("{BACKEND_PLACEHOLDER}\nresource \"x\" \"y\" {{}}"));
		assert!(module.has_backend_placeholder());
		assert!(!module.validated);
		assert!(module.workdir.is_none());
	}

	#[test]
	fn test_push_env_keeps_duplicates() {
		let mut module = Module::new(1, "");
		module.push_env("A", "1");
		module.push_env("A", "2");
		assert_eq!(module.env.len(), 2);
		assert_eq!(module.env_value("A"), Some("2"));
	}

	#[test]
	fn test_set_transition_replaces_previous() {
		let mut module = Module::new(1, "");
		module.set_transition("TRANSITION", Transition::Stop);
		module.set_transition("TRANSITION", Transition::Start);
		assert_eq!(module.env.len(), 1);
		assert_eq!(module.env_value("TRANSITION"), Some("start"));
	}

	#[test]
	fn test_sanitized_strips_keys_and_workdir() {
		let mut module = Module::new(7, "cfg");
		module.push_env("AWS_SECRET_ACCESS_KEY", "shh");
		module.push_env("TRANSITION", "start");
		module.push_env("KEEP", "yes");
		module.workdir = Some(PathBuf::from("/tmp/7"));

		let clean = module.sanitized(&["AWS_SECRET_ACCESS_KEY", "TRANSITION"]);
		assert_eq!(clean.env, vec![EnvEntry::new("KEEP", "yes")]);
		assert!(clean.workdir.is_none());
		assert_eq!(clean.configuration, "cfg");
	}

	#[test]
	fn test_serialization_skips_workdir() {
		let mut module = Module::new(3, "cfg");
		module.workdir = Some(PathBuf::from("/tmp/3"));
		let bytes = module.to_bytes().unwrap();
		let text = String::from_utf8(bytes.clone()).unwrap();
		assert!(!text.contains("/tmp/3"));

		let restored = Module::from_bytes(&bytes).unwrap();
		assert_eq!(restored.id, 3);
		assert!(restored.workdir.is_none());
	}

	#[test]
	fn test_hash_is_stable_hex() {
		let module = Module::new(1, "abc");
		assert_eq!(
			module.configuration_hash(),
			"ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
		);
	}

	#[test]
	fn test_debug_hides_env_values() {
		let mut module = Module::new(1, "cfg");
		module.push_env("AWS_SECRET_ACCESS_KEY", "hunter2");
		let out = format!("{module:?}");
		assert!(out.contains("AWS_SECRET_ACCESS_KEY"));
		assert!(!out.contains("hunter2"));
	}
}
