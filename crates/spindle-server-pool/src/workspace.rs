// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use spindle_server_db::{AgentCredentials, WorkspaceKind, WorkspaceShape};
use spindle_server_iac::{
	host_aliases_hcl, read_agent, rewrite_image, HostAlias, Module, ModuleStore, Provisioner,
	RegistryCacheRule, Template, TemplateVars,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::error::Result;
use crate::factory::{apply_new_module, best_effort, teardown_module, ResourceFactory};
use crate::pool::ResourcePool;

pub type WorkspacePool = ResourcePool<WorkspaceKind>;

/// Substitutions shared by every workspace template.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceSettings {
	pub host_aliases: Vec<HostAlias>,
	pub registry_caches: Vec<RegistryCacheRule>,
	pub agent_resource_type: String,
	pub transition_env: String,
}

impl WorkspaceSettings {
	/// Template variables for a workspace: `id`, `image` (rewritten through
	/// the registry caches), `cpu`, `memory_gb`, `disk_gb`, `storage_class`
	/// and `host_aliases`.
	pub fn template_vars(&self, id: i64, shape: &WorkspaceShape) -> TemplateVars {
		TemplateVars::new()
			.set("id", id)
			.set("image", rewrite_image(&shape.image, &self.registry_caches))
			.set("cpu", shape.cpu)
			.set("memory_gb", shape.memory_gb)
			.set("disk_gb", shape.disk_gb)
			.set("storage_class", &shape.storage_class)
			.set("host_aliases", host_aliases_hcl(&self.host_aliases))
	}
}

/// Provisions complete warm workspaces and captures their agent credentials.
#[derive(Debug, Clone)]
pub struct WorkspaceFactory {
	provisioner: Arc<Provisioner>,
	modules: ModuleStore,
	template: Template,
	settings: WorkspaceSettings,
}

impl WorkspaceFactory {
	pub fn new(
		provisioner: Arc<Provisioner>,
		modules: ModuleStore,
		template: Template,
		settings: WorkspaceSettings,
	) -> Self {
		Self {
			provisioner,
			modules,
			template,
			settings,
		}
	}
}

#[async_trait]
impl ResourceFactory<WorkspaceKind> for WorkspaceFactory {
	#[instrument(skip(self, cancel), fields(workspace_id = id))]
	async fn provision(
		&self,
		id: i64,
		shape: &WorkspaceShape,
		cancel: &CancellationToken,
	) -> Result<AgentCredentials> {
		let configuration = self.template.render(&self.settings.template_vars(id, shape))?;
		let mut module = Module::new(id, configuration);
		apply_new_module(&self.provisioner, &self.modules, &mut module, cancel).await?;

		let agent = match read_agent(
			self.provisioner.backend().as_ref(),
			id,
			&self.settings.agent_resource_type,
		)
		.await
		{
			Ok(agent) => agent,
			Err(e) => {
				best_effort(
					"teardown of workspace without agent",
					self.teardown(id, &CancellationToken::new()),
				)
				.await;
				return Err(e.into());
			}
		};

		info!(agent_id = agent.id, "warm workspace ready");
		Ok(AgentCredentials {
			agent_id: agent.id,
			token: agent.token,
		})
	}

	#[instrument(skip(self, cancel), fields(workspace_id = id))]
	async fn teardown(&self, id: i64, cancel: &CancellationToken) -> Result<()> {
		teardown_module(
			&self.provisioner,
			&self.modules,
			id,
			Some(&self.settings.transition_env),
			cancel,
		)
		.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use spindle_server_blob::MemoryBlobStore;
	use spindle_server_iac::testing::{FakeEngine, AGENT_RESOURCE_TYPE, TRANSITION_ENV};
	use spindle_server_iac::{read_workspace_state, LocalBackend, WorkspaceState};
	use tempfile::TempDir;

	const TEMPLATE: &str = "{{backend}}\nresource \"spindle_agent\" \"main\" {}\nresource \"spindle_workspace\" \"main\" {\n  image = \"{{image}}\"\n  cpu = {{cpu}}\n  memory = \"{{memory_gb}}Gi\"\n  disk = \"{{disk_gb}}Gi\"\n  class = \"{{storage_class}}\"\n  {{host_aliases}}\n}\n";

	fn settings() -> WorkspaceSettings {
		WorkspaceSettings {
			host_aliases: vec![HostAlias {
				ip: "10.0.0.1".to_string(),
				hostnames: vec!["git.internal".to_string()],
			}],
			registry_caches: vec![RegistryCacheRule {
				source: "docker.io".to_string(),
				cache: "localhost:5000".to_string(),
			}],
			agent_resource_type: AGENT_RESOURCE_TYPE.to_string(),
			transition_env: TRANSITION_ENV.to_string(),
		}
	}

	fn shape() -> WorkspaceShape {
		WorkspaceShape {
			image: "test/test".to_string(),
			cpu: 2,
			memory_gb: 4,
			disk_gb: 10,
			storage_class: "standard".to_string(),
		}
	}

	#[tokio::test]
	async fn test_provision_captures_agent_and_rewrites_image() {
		let tmp = TempDir::new().unwrap();
		let backend = Arc::new(LocalBackend::new(tmp.path().join("state")));
		let engine = Arc::new(FakeEngine::new(tmp.path().join("state")));
		let provisioner = Arc::new(Provisioner::new(backend.clone(), engine, tmp.path().join("work")));
		let modules = ModuleStore::new(Arc::new(MemoryBlobStore::new()), vec![TRANSITION_ENV.to_string()]);
		let factory = WorkspaceFactory::new(
			provisioner,
			modules.clone(),
			Template::new("workspace", TEMPLATE),
			settings(),
		);

		let cancel = CancellationToken::new();
		let creds = factory.provision(7_000_000_000, &shape(), &cancel).await.unwrap();
		assert!(creds.agent_id > 0);
		assert!(!creds.token.expose().is_empty());

		let module = modules.load(7_000_000_000).await.unwrap();
		assert!(module.configuration.contains("image = \"localhost:5000/test/test\""));
		assert!(module.configuration.contains("\"git.internal\""));
		assert_eq!(
			read_workspace_state(backend.as_ref(), 7_000_000_000, "spindle_workspace")
				.await
				.unwrap(),
			WorkspaceState::Active
		);

		factory.teardown(7_000_000_000, &cancel).await.unwrap();
		assert!(modules.load(7_000_000_000).await.is_err());
		assert_eq!(
			read_workspace_state(backend.as_ref(), 7_000_000_000, "spindle_workspace")
				.await
				.unwrap(),
			WorkspaceState::Destroyed
		);
	}

	#[test]
	fn test_template_vars_leave_unlisted_registries_alone() {
		let mut shape = shape();
		shape.image = "ghcr.io/acme/dev:latest".to_string();
		let vars = settings().template_vars(1, &shape);
		assert_eq!(vars.get("image"), Some("ghcr.io/acme/dev:latest"));
	}
}
