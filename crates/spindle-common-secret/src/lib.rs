// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secret wrapper types for Spindle.
//!
//! [`Secret<T>`] keeps credentials (object storage keys, agent tokens) out of
//! logs: `Debug`, `Display` and `Serialize` all emit [`REDACTED`]. The inner
//! value is only reachable through [`Secret::expose`], and is zeroized on drop.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

/// Placeholder emitted wherever a secret would otherwise be printed.
pub const REDACTED: &str = "[REDACTED]";

/// A value that must never be logged.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret<T: Zeroize> {
	inner: T,
}

/// The common case: a secret string.
pub type SecretString = Secret<String>;

impl<T: Zeroize> Secret<T> {
	pub fn new(inner: T) -> Self {
		Self { inner }
	}

	/// Borrow the underlying value. Call sites should be easy to grep for.
	pub fn expose(&self) -> &T {
		&self.inner
	}
}

impl SecretString {
	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}
}

impl<T: Zeroize> Drop for Secret<T> {
	fn drop(&mut self) {
		self.inner.zeroize();
	}
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}

impl<T: Zeroize> fmt::Display for Secret<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}

impl<T: Zeroize> Serialize for Secret<T> {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(REDACTED)
	}
}

impl<'de, T: Zeroize + Deserialize<'de>> Deserialize<'de> for Secret<T> {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		T::deserialize(deserializer).map(Secret::new)
	}
}

impl From<String> for SecretString {
	fn from(value: String) -> Self {
		Secret::new(value)
	}
}

impl From<&str> for SecretString {
	fn from(value: &str) -> Self {
		Secret::new(value.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn debug_and_display_are_redacted() {
		let secret = SecretString::new("hunter2".to_string());
		assert_eq!(format!("{secret:?}"), REDACTED);
		assert_eq!(format!("{secret}"), REDACTED);
	}

	#[test]
	fn expose_returns_inner_value() {
		let secret = SecretString::from("token-abc");
		assert_eq!(secret.expose(), "token-abc");
		assert!(!secret.is_empty());
	}

	#[test]
	fn serialize_is_redacted() {
		let secret = SecretString::from("aws-secret");
		let json = serde_json::to_string(&secret).unwrap();
		assert_eq!(json, format!("\"{REDACTED}\""));
	}

	#[test]
	fn deserialize_reads_plain_value() {
		let secret: SecretString = serde_json::from_str("\"from-toml\"").unwrap();
		assert_eq!(secret.expose(), "from-toml");
	}

	#[test]
	fn struct_debug_does_not_leak() {
		#[derive(Debug)]
		struct Creds {
			#[allow(dead_code)]
			access_key: String,
			#[allow(dead_code)]
			secret_key: SecretString,
		}

		let creds = Creds {
			access_key: "AKIA".to_string(),
			secret_key: SecretString::from("very-secret"),
		};
		let out = format!("{creds:?}");
		assert!(out.contains("AKIA"));
		assert!(!out.contains("very-secret"));
	}
}
