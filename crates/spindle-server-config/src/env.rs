// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Environment variable helpers shared by the environment source.

use std::str::FromStr;

use spindle_common_secret::SecretString;

use crate::error::ConfigError;

pub(crate) fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

pub(crate) fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

/// Parses `name` with `FromStr`, reporting the offending value on failure.
pub(crate) fn env_parse<T>(name: &str) -> Result<Option<T>, ConfigError>
where
	T: FromStr,
	T::Err: std::fmt::Display,
{
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|e| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid value '{v}': {e}"),
		}),
		None => Ok(None),
	}
}

/// Parses a JSON-encoded list such as `SPINDLE_SERVER_WORKSPACE_HOST_ALIASES`.
pub(crate) fn env_json<T: serde::de::DeserializeOwned>(
	name: &str,
) -> Result<Option<T>, ConfigError> {
	match env_var(name) {
		Some(v) => serde_json::from_str(&v)
			.map(Some)
			.map_err(|e| ConfigError::InvalidValue {
				key: name.to_string(),
				message: format!("invalid JSON: {e}"),
			}),
		None => Ok(None),
	}
}

/// Loads a secret from `NAME_FILE` (path to a file holding the value) or `NAME`.
///
/// The file form wins when both are set, so mounted Kubernetes secrets take
/// priority over inline values. A single trailing newline is stripped.
pub fn load_secret_env(name: &str) -> Result<Option<SecretString>, ConfigError> {
	let file_var = format!("{name}_FILE");
	if let Some(path) = env_var(&file_var) {
		let content = std::fs::read_to_string(&path)
			.map_err(|e| ConfigError::Secret(format!("{file_var}={path}: {e}")))?;
		let value = content
			.strip_suffix('\n')
			.map(|s| s.strip_suffix('\r').unwrap_or(s))
			.unwrap_or(&content);
		if value.is_empty() {
			return Err(ConfigError::Secret(format!("{file_var}={path}: file is empty")));
		}
		return Ok(Some(SecretString::from(value)));
	}

	Ok(env_var(name).map(SecretString::from))
}
