// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Module templates and the substitutions applied to workspace images.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IacError, Result};
use crate::module::BACKEND_PLACEHOLDER;

const DOCKER_HUB: &str = "docker.io";

/// Values substituted for `{{name}}` placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars(BTreeMap<String, String>);

impl TemplateVars {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set(mut self, key: impl Into<String>, value: impl ToString) -> Self {
		self.insert(key, value);
		self
	}

	pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
		self.0.insert(key.into(), value.to_string());
	}

	pub fn get(&self, key: &str) -> Option<&str> {
		self.0.get(key).map(String::as_str)
	}
}

/// IaC configuration text with `{{name}}` placeholders.
///
/// `{{backend}}` is left in place for the provisioner; every other
/// placeholder must be supplied at render time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
	name: String,
	source: String,
}

impl Template {
	pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			source: source.into(),
		}
	}

	pub async fn load(path: &Path) -> Result<Self> {
		let source = tokio::fs::read_to_string(path).await?;
		Ok(Self::new(path.display().to_string(), source))
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Placeholder names referenced by the template, excluding `backend`.
	pub fn placeholders(&self) -> Vec<String> {
		let mut names = Vec::new();
		let mut rest = self.source.as_str();
		while let Some(start) = rest.find("{{") {
			let after = &rest[start + 2..];
			let Some(end) = after.find("}}") else { break };
			let name = after[..end].trim().to_string();
			if name != "backend" && !names.contains(&name) {
				names.push(name);
			}
			rest = &after[end + 2..];
		}
		names
	}

	pub fn render(&self, vars: &TemplateVars) -> Result<String> {
		let mut out = String::with_capacity(self.source.len());
		let mut rest = self.source.as_str();

		while let Some(start) = rest.find("{{") {
			out.push_str(&rest[..start]);
			let after = &rest[start + 2..];
			let end = after.find("}}").ok_or_else(|| {
				IacError::Validation(format!("unterminated placeholder in template {}", self.name))
			})?;
			let name = after[..end].trim();

			if name == "backend" {
				out.push_str(BACKEND_PLACEHOLDER);
			} else {
				let value = vars.get(name).ok_or_else(|| {
					IacError::Validation(format!(
						"template {} references unknown placeholder {{{{{name}}}}}",
						self.name
					))
				})?;
				out.push_str(value);
			}
			rest = &after[end + 2..];
		}
		out.push_str(rest);

		Ok(out)
	}
}

/// Routes pulls from `source` registry through `cache`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCacheRule {
	pub source: String,
	pub cache: String,
}

fn normalize_registry(registry: &str) -> &str {
	match registry {
		"index.docker.io" | "registry-1.docker.io" => DOCKER_HUB,
		other => other,
	}
}

/// Splits an image reference into registry and repository path. A first
/// component without a dot or port (and not `localhost`) is a Docker Hub
/// namespace, so the registry is implicit.
fn split_registry(image: &str) -> (&str, &str) {
	match image.split_once('/') {
		Some((first, rest)) if first.contains('.') || first.contains(':') || first == "localhost" => {
			(normalize_registry(first), rest)
		}
		_ => (DOCKER_HUB, image),
	}
}

/// Applies the first matching registry cache rule to `image`. Images whose
/// registry has no rule are returned unchanged.
pub fn rewrite_image(image: &str, rules: &[RegistryCacheRule]) -> String {
	let (registry, path) = split_registry(image);
	let Some(rule) = rules
		.iter()
		.find(|r| normalize_registry(r.source.trim_end_matches('/')) == registry)
	else {
		return image.to_string();
	};

	let cache = rule.cache.trim_end_matches('/');
	if registry == DOCKER_HUB && !path.contains('/') {
		// Official images live under library/ on Docker Hub mirrors.
		format!("{cache}/library/{path}")
	} else {
		format!("{cache}/{path}")
	}
}

/// Static host entries injected into workspace pods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAlias {
	pub ip: String,
	pub hostnames: Vec<String>,
}

fn hcl_string(value: &str) -> String {
	// JSON string escaping is valid HCL string syntax. `${` and `%{` start
	// template sequences in HCL, so they are doubled.
	serde_json::Value::String(value.to_string())
		.to_string()
		.replace("${", "$${")
		.replace("%{", "%%{")
}

/// Renders `host_aliases` blocks for the workspace template's pod spec.
pub fn host_aliases_hcl(aliases: &[HostAlias]) -> String {
	let mut out = String::new();
	for alias in aliases {
		let hostnames = alias
			.hostnames
			.iter()
			.map(|h| hcl_string(h))
			.collect::<Vec<_>>()
			.join(", ");
		let _ = writeln!(out, "host_aliases {{");
		let _ = writeln!(out, "  ip        = {}", hcl_string(&alias.ip));
		let _ = writeln!(out, "  hostnames = [{hostnames}]");
		let _ = writeln!(out, "}}");
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn docker_rule() -> RegistryCacheRule {
		RegistryCacheRule {
			source: "docker.io".to_string(),
			cache: "localhost:5000".to_string(),
		}
	}

	mod render {
		use super::*;

		#[test]
		fn substitutes_variables_and_keeps_backend() {
			let template = Template::new(
				"volume",
				"{{backend}}\nresource \"spindle_volume\" \"v\" { size = {{ disk_gb }} class = \"{{storage_class}}\" }",
			);
			let vars = TemplateVars::new()
				.set("disk_gb", 10)
				.set("storage_class", "standard");

			let out = template.render(&vars).unwrap();
			assert!(out.starts_with(BACKEND_PLACEHOLDER));
			assert!(out.contains("size = 10"));
			assert!(out.contains("class = \"standard\""));
		}

		#[test]
		fn unknown_placeholder_is_validation_error() {
			let template = Template::new("ws", "image = \"{{image}}\"");
			let err = template.render(&TemplateVars::new()).unwrap_err();
			assert!(matches!(err, IacError::Validation(_)));
			assert!(err.to_string().contains("{{image}}"));
		}

		#[test]
		fn unterminated_placeholder_is_validation_error() {
			let template = Template::new("ws", "image = \"{{image\"");
			assert!(matches!(
				template.render(&TemplateVars::new().set("image", "x")),
				Err(IacError::Validation(_))
			));
		}

		#[test]
		fn placeholders_lists_names_once() {
			let template = Template::new("ws", "{{backend}} {{a}} {{ b }} {{a}}");
			assert_eq!(template.placeholders(), vec!["a".to_string(), "b".to_string()]);
		}
	}

	mod registry {
		use super::*;

		#[test]
		fn implicit_docker_hub_is_rewritten() {
			assert_eq!(rewrite_image("test/test", &[docker_rule()]), "localhost:5000/test/test");
		}

		#[test]
		fn explicit_registry_without_rule_is_unchanged() {
			assert_eq!(
				rewrite_image("localhost:5000/test/test", &[docker_rule()]),
				"localhost:5000/test/test"
			);
		}

		#[test]
		fn official_image_gets_library_prefix() {
			assert_eq!(
				rewrite_image("ubuntu:24.04", &[docker_rule()]),
				"localhost:5000/library/ubuntu:24.04"
			);
		}

		#[test]
		fn explicit_docker_hub_host_matches() {
			assert_eq!(
				rewrite_image("docker.io/acme/dev:1", &[docker_rule()]),
				"localhost:5000/acme/dev:1"
			);
			assert_eq!(
				rewrite_image("index.docker.io/acme/dev", &[docker_rule()]),
				"localhost:5000/acme/dev"
			);
		}

		#[test]
		fn other_registry_rule() {
			let rules = vec![RegistryCacheRule {
				source: "ghcr.io".to_string(),
				cache: "cache.internal/ghcr/".to_string(),
			}];
			assert_eq!(
				rewrite_image("ghcr.io/acme/dev:latest", &rules),
				"cache.internal/ghcr/acme/dev:latest"
			);
			assert_eq!(rewrite_image("acme/dev", &rules), "acme/dev");
		}

		proptest! {
			#[test]
			fn no_rules_is_identity(image in "[a-z0-9./:-]{1,40}") {
				prop_assert_eq!(rewrite_image(&image, &[]), image);
			}

			#[test]
			fn hub_namespace_images_route_through_cache(
				ns in "[a-z][a-z0-9]{0,10}",
				name in "[a-z][a-z0-9]{0,10}",
			) {
				let image = format!("{ns}/{name}");
				prop_assert_eq!(
					rewrite_image(&image, &[docker_rule()]),
					format!("localhost:5000/{image}")
				);
			}
		}
	}

	#[test]
	fn host_aliases_render_blocks() {
		let hcl = host_aliases_hcl(&[HostAlias {
			ip: "10.0.0.5".to_string(),
			hostnames: vec!["git.internal".to_string(), "registry.internal".to_string()],
		}]);
		assert!(hcl.contains("ip        = \"10.0.0.5\""));
		assert!(hcl.contains("hostnames = [\"git.internal\", \"registry.internal\"]"));
	}

	#[test]
	fn host_aliases_escape_interpolation() {
		let hcl = host_aliases_hcl(&[HostAlias {
			ip: "1.1.1.1".to_string(),
			hostnames: vec!["${evil}".to_string()],
		}]);
		assert!(hcl.contains("$${evil}"));
	}

	#[test]
	fn empty_host_aliases_render_nothing() {
		assert_eq!(host_aliases_hcl(&[]), "");
	}
}
