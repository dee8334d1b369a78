// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Module templates. Each can be overridden by a path in the configuration;
//! otherwise the built-in Kubernetes template is used.

use std::path::Path;

use spindle_server_config::ServerConfig;
use spindle_server_iac::{IacError, Template, TemplateVars};
use tracing::debug;

use crate::error::{Result, ServerError};

pub const VOLUME: &str = include_str!("../templates/volume.tf");
pub const WARM_WORKSPACE: &str = include_str!("../templates/warm_workspace.tf");
pub const WORKSPACE_WITH_VOLUME: &str = include_str!("../templates/workspace_with_volume.tf");
pub const WORKSPACE_WITHOUT_VOLUME: &str = include_str!("../templates/workspace_without_volume.tf");

/// Every template the server renders.
#[derive(Debug, Clone)]
pub struct ConfiguredTemplates {
	pub volume: Template,
	pub warm_workspace: Template,
	pub with_volume: Template,
	pub without_volume: Template,
}

impl ConfiguredTemplates {
	pub fn builtin() -> Self {
		Self {
			volume: Template::new("builtin:volume", VOLUME),
			warm_workspace: Template::new("builtin:warm_workspace", WARM_WORKSPACE),
			with_volume: Template::new("builtin:workspace_with_volume", WORKSPACE_WITH_VOLUME),
			without_volume: Template::new("builtin:workspace_without_volume", WORKSPACE_WITHOUT_VOLUME),
		}
	}

	pub async fn load(config: &ServerConfig) -> Result<Self> {
		let builtin = Self::builtin();
		Ok(Self {
			volume: load_or(config.pools.volume_template.as_deref(), builtin.volume).await?,
			warm_workspace: load_or(config.pools.workspace_template.as_deref(), builtin.warm_workspace)
				.await?,
			with_volume: load_or(config.workspace.template_with_volume.as_deref(), builtin.with_volume)
				.await?,
			without_volume: load_or(
				config.workspace.template_without_volume.as_deref(),
				builtin.without_volume,
			)
			.await?,
		})
	}

	pub fn all(&self) -> [&Template; 4] {
		[
			&self.volume,
			&self.warm_workspace,
			&self.with_volume,
			&self.without_volume,
		]
	}
}

async fn load_or(path: Option<&Path>, builtin: Template) -> Result<Template> {
	let Some(path) = path else {
		return Ok(builtin);
	};
	debug!(path = %path.display(), "loading template");
	Template::load(path).await.map_err(|e| match e {
		IacError::Io(source) => ServerError::Template {
			path: path.to_path_buf(),
			source,
		},
		other => other.into(),
	})
}

/// Values for every placeholder the templates use, for template checks.
pub fn sample_vars(id: i64) -> TemplateVars {
	TemplateVars::new()
		.set("id", id)
		.set("image", "docker.io/library/ubuntu:24.04")
		.set("cpu", 1)
		.set("memory_gb", 1)
		.set("disk_gb", 1)
		.set("storage_class", "standard")
		.set("host_aliases", "")
		.set("owner_id", 1)
		.set("access_url", "https://workspace.example.invalid/")
		.set("volume_id", id + 1)
}

#[cfg(test)]
mod tests {
	use super::*;
	use spindle_server_iac::BACKEND_PLACEHOLDER;

	#[test]
	fn builtin_templates_render_with_sample_vars() {
		for template in ConfiguredTemplates::builtin().all() {
			let rendered = template.render(&sample_vars(7)).unwrap();
			assert!(rendered.contains(BACKEND_PLACEHOLDER), "{}", template.name());
			assert!(
				!rendered.replace(BACKEND_PLACEHOLDER, "").contains("{{"),
				"{} left a placeholder",
				template.name()
			);
		}
	}

	#[test]
	fn workspace_templates_declare_state_resources() {
		let builtin = ConfiguredTemplates::builtin();
		for template in [&builtin.warm_workspace, &builtin.with_volume, &builtin.without_volume] {
			let rendered = template.render(&sample_vars(7)).unwrap();
			assert!(rendered.contains("resource \"spindle_workspace\" \"main\""));
			assert!(rendered.contains("resource \"spindle_agent\" \"main\""));
		}
	}

	#[test]
	fn only_the_with_volume_template_mounts_a_pooled_volume() {
		let builtin = ConfiguredTemplates::builtin();
		assert!(builtin
			.with_volume
			.placeholders()
			.contains(&"volume_id".to_string()));
		assert!(!builtin
			.without_volume
			.placeholders()
			.contains(&"volume_id".to_string()));
	}

	#[tokio::test]
	async fn missing_override_is_a_template_error() {
		let dir = tempfile::tempdir().unwrap();
		let missing = dir.path().join("nope.tf");
		match load_or(Some(&missing), Template::new("x", "")).await {
			Err(ServerError::Template { path, .. }) => assert_eq!(path, missing),
			other => panic!("expected template error, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn override_replaces_builtin() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("volume.tf");
		std::fs::write(&path, "{{backend}}\nresource \"null_resource\" \"v{{id}}\" {}\n").unwrap();

		let template = load_or(Some(&path), Template::new("builtin", VOLUME)).await.unwrap();
		assert_eq!(template.placeholders(), vec!["id".to_string()]);
	}
}
