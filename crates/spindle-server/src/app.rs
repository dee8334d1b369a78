// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Builds the provisioning context from a resolved [`ServerConfig`].

use std::sync::Arc;
use std::time::Duration;

use spindle_common_s3::{S3Client, S3Config};
use spindle_server_blob::{BlobStore, LocalBlobStore, S3BlobStore};
use spindle_server_config::{
	CoordinationConfig, CoordinationKind, LockStrategyKind, PoolsConfig, ProvisionerConfig,
	S3StorageConfig, ServerConfig, StorageConfig,
};
use spindle_server_coordination::{
	ClusterJobLock, ConfigMapCoordinationStore, CoordinationStore, LockStrategy, MemoryCoordinationStore,
};
use spindle_server_db::{
	create_pool, run_migrations, ConnectSettings, PoolRepository, VolumeShape, WorkspaceShape,
};
use spindle_server_iac::{
	CommandRunner, HostAlias, IacRunner, LocalBackend, Module, ModuleStore, Provisioner,
	RegistryCacheRule, S3Backend, StateBackend, ValidationReport,
};
use spindle_server_jobs::{JobScheduler, RetryPolicy, RunHistory};
use spindle_server_pool::{Bucket, ResourcePool, VolumeFactory, WorkspaceFactory, WorkspaceSettings};
use spindle_server_workspaces::{ProvisioningContext, WorkspaceOrchestrator, WorkspaceTemplates};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::{Result, ServerError};
use crate::jobs::PoolReconcileJob;
use crate::templates::{sample_vars, ConfiguredTemplates};

const TEMPLATE_CHECK_DIR: &str = ".template-check";
const BLOB_PREFIX: &str = "blobs";

/// Outcome of validating one template.
#[derive(Debug, Clone)]
pub struct TemplateCheck {
	pub name: String,
	/// `None` when the template is valid.
	pub report: Option<ValidationReport>,
}

impl TemplateCheck {
	pub fn is_valid(&self) -> bool {
		self.report.is_none()
	}
}

pub struct App {
	config: ServerConfig,
	backend: Arc<dyn StateBackend>,
	runner: Arc<dyn IacRunner>,
	templates: ConfiguredTemplates,
	orchestrator: WorkspaceOrchestrator,
}

impl App {
	/// Connects to everything the configuration names: database (migrated),
	/// state backend, blob store, coordination service and the IaC binary.
	#[instrument(skip(config))]
	pub async fn build(config: ServerConfig) -> Result<Self> {
		let runner = command_runner(&config.provisioner);
		let coordination = coordination_store(&config.coordination).await?;
		Self::build_with(config, runner, coordination).await
	}

	/// Like [`App::build`] with the engine runner and coordination store supplied.
	pub async fn build_with(
		config: ServerConfig,
		runner: Arc<dyn IacRunner>,
		coordination: Arc<dyn CoordinationStore>,
	) -> Result<Self> {
		let db = create_pool(
			&config.database.url,
			ConnectSettings {
				max_connections: config.database.max_connections,
				busy_timeout: Duration::from_secs(config.database.busy_timeout_secs),
			},
		)
		.await?;
		run_migrations(&db).await?;

		let backend = state_backend(&config.state_backend)?;
		let blobs = blob_store(&config.blob)?;
		let provisioner = Arc::new(Provisioner::new(
			Arc::clone(&backend),
			Arc::clone(&runner),
			config.provisioner.work_dir.clone(),
		));

		let mut strip_keys = provisioner.credential_keys();
		strip_keys.push(config.provisioner.transition_env.clone());
		let modules = ModuleStore::new(blobs, strip_keys);

		let settings = workspace_settings(&config);
		let templates = ConfiguredTemplates::load(&config).await?;

		let volumes = ResourcePool::new(
			PoolRepository::new(db.clone()),
			Arc::new(VolumeFactory::new(
				Arc::clone(&provisioner),
				modules.clone(),
				templates.volume.clone(),
			)),
			volume_buckets(&config.pools),
			config.pools.concurrency,
		);
		let workspaces = ResourcePool::new(
			PoolRepository::new(db.clone()),
			Arc::new(WorkspaceFactory::new(
				Arc::clone(&provisioner),
				modules.clone(),
				templates.warm_workspace.clone(),
				settings.clone(),
			)),
			workspace_buckets(&config.pools),
			config.pools.concurrency,
		);

		let lock = ClusterJobLock::new(coordination, lock_strategy(config.coordination.lock_strategy));

		let context = ProvisioningContext {
			provisioner,
			modules,
			volumes,
			workspaces,
			lock,
			templates: WorkspaceTemplates {
				with_volume: templates.with_volume.clone(),
				without_volume: templates.without_volume.clone(),
			},
			settings,
			workspace_resource_type: config.provisioner.workspace_resource_type.clone(),
			default_storage_class: config.workspace.default_storage_class.clone(),
		};

		info!(
			backend = backend.name(),
			volume_buckets = context.volumes.buckets().len(),
			workspace_buckets = context.workspaces.buckets().len(),
			"provisioning context ready"
		);

		Ok(Self {
			config,
			backend,
			runner,
			templates,
			orchestrator: WorkspaceOrchestrator::new(context),
		})
	}

	pub fn config(&self) -> &ServerConfig {
		&self.config
	}

	pub fn context(&self) -> &ProvisioningContext {
		self.orchestrator.context()
	}

	pub fn orchestrator(&self) -> &WorkspaceOrchestrator {
		&self.orchestrator
	}

	pub fn templates(&self) -> &ConfiguredTemplates {
		&self.templates
	}

	/// A scheduler with one periodic reconcile job per pool. Not started.
	pub fn scheduler(&self) -> JobScheduler {
		let history = Arc::new(RunHistory::new(self.config.jobs.history_size));
		let mut scheduler = JobScheduler::new(history).with_retry_policy(RetryPolicy {
			max_retries: self.config.jobs.max_retries,
			..RetryPolicy::default()
		});

		let interval = Duration::from_secs(self.config.pools.reconcile_interval_secs);
		scheduler.register_periodic(
			Arc::new(PoolReconcileJob::volumes(self.context().volumes.clone())),
			interval,
		);
		scheduler.register_periodic(
			Arc::new(PoolReconcileJob::workspaces(self.context().workspaces.clone())),
			interval,
		);
		scheduler
	}

	/// Renders every template with sample values and runs the engine's
	/// validation on each, in a scratch directory under the work dir.
	#[instrument(skip(self, cancel))]
	pub async fn check_templates(&self, cancel: &CancellationToken) -> Result<Vec<TemplateCheck>> {
		let scratch = self.config.provisioner.work_dir.join(TEMPLATE_CHECK_DIR);
		let provisioner = Provisioner::new(Arc::clone(&self.backend), Arc::clone(&self.runner), &scratch);

		let mut checks = Vec::new();
		for (index, template) in self.templates.all().into_iter().enumerate() {
			let id = index as i64 + 1;
			let configuration = template.render(&sample_vars(id))?;
			let mut module = Module::new(id, configuration);

			let result = provisioner.validate(&mut module, cancel).await;
			if let Err(e) = tokio::fs::remove_dir_all(provisioner.workdir_for(id)).await {
				warn!(error = %e, template = template.name(), "failed to remove template check directory");
			}

			checks.push(TemplateCheck {
				name: template.name().to_string(),
				report: result?,
			});
		}
		Ok(checks)
	}

	/// Stops in-flight reconcile provisioning.
	pub fn shutdown(&self) {
		self.context().volumes.shutdown();
		self.context().workspaces.shutdown();
	}
}

pub fn command_runner(config: &ProvisionerConfig) -> Arc<dyn IacRunner> {
	let mut runner = CommandRunner::new(
		&config.binary,
		Duration::from_secs(config.command_timeout_secs),
	);
	if let Some(dir) = &config.plugin_cache_dir {
		runner = runner.with_plugin_cache_dir(dir);
	}
	Arc::new(runner)
}

pub async fn coordination_store(config: &CoordinationConfig) -> Result<Arc<dyn CoordinationStore>> {
	match config.kind {
		CoordinationKind::Memory => {
			warn!("using in-memory coordination; the job lock is not shared across nodes");
			Ok(Arc::new(MemoryCoordinationStore::new()))
		}
		CoordinationKind::Kubernetes => Ok(Arc::new(
			ConfigMapCoordinationStore::try_default(config.namespace.clone()).await?,
		)),
	}
}

pub fn lock_strategy(kind: LockStrategyKind) -> LockStrategy {
	match kind {
		LockStrategyKind::CompareAndSwap => LockStrategy::CompareAndSwap,
		LockStrategyKind::CheckThenWrite => LockStrategy::CheckThenWrite,
	}
}

fn s3_config(config: &S3StorageConfig) -> S3Config {
	S3Config {
		endpoint: config.endpoint.clone(),
		region: config.region.clone(),
		bucket: config.bucket.clone(),
		access_key: config.access_key.clone(),
		secret_key: config.secret_key.clone(),
		path_style: config.path_style,
	}
}

pub fn state_backend(config: &StorageConfig) -> Result<Arc<dyn StateBackend>> {
	Ok(match config {
		StorageConfig::Local { path } => Arc::new(LocalBackend::new(path.clone())),
		StorageConfig::S3(s3) => Arc::new(S3Backend::new(s3_config(s3))?),
	})
}

pub fn blob_store(config: &StorageConfig) -> Result<Arc<dyn BlobStore>> {
	Ok(match config {
		StorageConfig::Local { path } => Arc::new(LocalBlobStore::new(path.clone())),
		StorageConfig::S3(s3) => Arc::new(S3BlobStore::with_prefix(
			S3Client::new(s3_config(s3))?,
			BLOB_PREFIX,
		)),
	})
}

pub fn workspace_settings(config: &ServerConfig) -> WorkspaceSettings {
	WorkspaceSettings {
		host_aliases: config
			.workspace
			.host_aliases
			.iter()
			.map(|a| HostAlias {
				ip: a.ip.clone(),
				hostnames: a.hostnames.clone(),
			})
			.collect(),
		registry_caches: config
			.workspace
			.registry_caches
			.iter()
			.map(|r| RegistryCacheRule {
				source: r.source.clone(),
				cache: r.cache.clone(),
			})
			.collect(),
		agent_resource_type: config.provisioner.agent_resource_type.clone(),
		transition_env: config.provisioner.transition_env.clone(),
	}
}

fn volume_buckets(config: &PoolsConfig) -> Vec<Bucket<VolumeShape>> {
	config
		.volume_buckets
		.iter()
		.map(|b| Bucket {
			shape: VolumeShape {
				disk_gb: b.disk_gb,
				storage_class: b.storage_class.clone(),
			},
			target: b.target,
		})
		.collect()
}

fn workspace_buckets(config: &PoolsConfig) -> Vec<Bucket<WorkspaceShape>> {
	config
		.workspace_buckets
		.iter()
		.map(|b| Bucket {
			shape: WorkspaceShape {
				image: b.image.clone(),
				cpu: b.cpu,
				memory_gb: b.memory_gb,
				disk_gb: b.disk_gb,
				storage_class: b.storage_class.clone(),
			},
			target: b.target,
		})
		.collect()
}
