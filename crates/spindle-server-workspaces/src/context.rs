// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use spindle_server_coordination::ClusterJobLock;
use spindle_server_iac::{ModuleStore, Provisioner, StateBackend, Template};
use spindle_server_pool::{VolumePool, WorkspacePool, WorkspaceSettings};

/// Templates for on-demand workspaces, picked by whether a pooled volume
/// was claimed.
#[derive(Debug, Clone)]
pub struct WorkspaceTemplates {
	pub with_volume: Template,
	pub without_volume: Template,
}

impl WorkspaceTemplates {
	pub fn select(&self, has_volume: bool) -> &Template {
		if has_volume {
			&self.with_volume
		} else {
			&self.without_volume
		}
	}
}

/// Everything the orchestrator works with, built once at startup and passed
/// by reference.
#[derive(Debug, Clone)]
pub struct ProvisioningContext {
	pub provisioner: Arc<Provisioner>,
	pub modules: ModuleStore,
	pub volumes: VolumePool,
	pub workspaces: WorkspacePool,
	pub lock: ClusterJobLock,
	pub templates: WorkspaceTemplates,
	pub settings: WorkspaceSettings,
	pub workspace_resource_type: String,
	pub default_storage_class: String,
}

impl ProvisioningContext {
	pub fn backend(&self) -> &dyn StateBackend {
		self.provisioner.backend().as_ref()
	}
}
