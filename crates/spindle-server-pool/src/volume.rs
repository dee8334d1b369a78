// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use spindle_server_db::{VolumeKind, VolumeShape};
use spindle_server_iac::{Module, ModuleStore, Provisioner, Template, TemplateVars};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::error::Result;
use crate::factory::{apply_new_module, teardown_module, ResourceFactory};
use crate::pool::ResourcePool;

pub type VolumePool = ResourcePool<VolumeKind>;

/// Template variables for a volume: `id`, `disk_gb`, `storage_class`.
pub fn volume_template_vars(id: i64, shape: &VolumeShape) -> TemplateVars {
	TemplateVars::new()
		.set("id", id)
		.set("disk_gb", shape.disk_gb)
		.set("storage_class", &shape.storage_class)
}

/// Provisions pooled storage volumes from a template.
#[derive(Debug, Clone)]
pub struct VolumeFactory {
	provisioner: Arc<Provisioner>,
	modules: ModuleStore,
	template: Template,
}

impl VolumeFactory {
	pub fn new(provisioner: Arc<Provisioner>, modules: ModuleStore, template: Template) -> Self {
		Self {
			provisioner,
			modules,
			template,
		}
	}
}

#[async_trait]
impl ResourceFactory<VolumeKind> for VolumeFactory {
	#[instrument(skip(self, cancel), fields(volume_id = id))]
	async fn provision(&self, id: i64, shape: &VolumeShape, cancel: &CancellationToken) -> Result<()> {
		let configuration = self.template.render(&volume_template_vars(id, shape))?;
		let mut module = Module::new(id, configuration);
		apply_new_module(&self.provisioner, &self.modules, &mut module, cancel).await
	}

	#[instrument(skip(self, cancel), fields(volume_id = id))]
	async fn teardown(&self, id: i64, cancel: &CancellationToken) -> Result<()> {
		teardown_module(&self.provisioner, &self.modules, id, None, cancel).await
	}
}
