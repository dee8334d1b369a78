// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Build information for `spindle-server version`.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Injected by the release pipeline; `unknown` for local builds.
pub fn git_sha() -> &'static str {
	option_env!("SPINDLE_GIT_SHA").unwrap_or("unknown")
}

pub fn format_version_info() -> String {
	format!(
		"spindle-server version: {}\n\
         Git SHA:                {}\n\
         Platform:               {}-{}",
		VERSION,
		git_sha(),
		std::env::consts::OS,
		std::env::consts::ARCH,
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn version_info_names_the_package_version() {
		let info = format_version_info();
		assert!(info.starts_with(&format!("spindle-server version: {VERSION}")));
		assert!(info.contains(std::env::consts::OS));
	}
}
