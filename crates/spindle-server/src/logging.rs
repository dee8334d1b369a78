// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use spindle_server_config::{LogFormat, LoggingConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::{Result, ServerError};

const FALLBACK_DIRECTIVE: &str = "info";

/// `RUST_LOG` wins over the configured level. An unparseable configured level
/// falls back to `info`.
pub fn env_filter(level: &str) -> EnvFilter {
	EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(FALLBACK_DIRECTIVE))
	})
}

pub fn init_logging(config: &LoggingConfig) -> Result<()> {
	let filter = env_filter(&config.level);
	let registry = tracing_subscriber::registry().with(filter);

	let result = match config.format {
		LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
		LogFormat::Json => registry
			.with(tracing_subscriber::fmt::layer().json().with_current_span(true))
			.try_init(),
	};
	result.map_err(|e| ServerError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn invalid_level_falls_back() {
		if std::env::var_os("RUST_LOG").is_some() {
			return;
		}
		let filter = env_filter("spindle=verbose");
		assert_eq!(filter.to_string(), FALLBACK_DIRECTIVE);
	}

	#[test]
	fn configured_level_is_used() {
		if std::env::var_os("RUST_LOG").is_some() {
			return;
		}
		let filter = env_filter("spindle_server=debug");
		assert_eq!(filter.to_string(), "spindle_server=debug");
	}
}
