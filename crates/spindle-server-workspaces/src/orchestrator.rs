// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Workspace lifecycle state machine.
//!
//! ```text
//! Destroyed --create--> Active --stop--> Stopped --start--> Active
//!     ^                    |                 |
//!     +------destroy-------+-----------------+
//! ```
//!
//! State is always read from the statefile, never cached. Every transition
//! holds the cluster job lock for the workspace id while it runs.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use spindle_server_db::{PooledResource, VolumeShape, WorkspaceKind, WorkspaceShape};
use spindle_server_iac::{
	read_agent, read_workspace_state, state_path, AgentInfo, ExecutionLog, IacError, Module, Transition,
	WorkspaceState,
};
use spindle_server_pool::{best_effort, compensating_destroy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::context::ProvisioningContext;
use crate::error::{Result, WorkspaceError};
use crate::outcome::{LifecycleResult, Outcome, OutcomeKind};
use crate::request::{validate_workspace_id, CreateWorkspace, WorkspaceRequest};

/// A token that cancels itself after `timeout`. Must be called inside a
/// Tokio runtime.
pub fn deadline_token(timeout: Duration) -> CancellationToken {
	let token = CancellationToken::new();
	let deadline = token.clone();
	tokio::spawn(async move {
		tokio::select! {
			_ = deadline.cancelled() => {}
			_ = tokio::time::sleep(timeout) => deadline.cancel(),
		}
	});
	token
}

#[derive(Debug, Clone)]
pub struct WorkspaceOrchestrator {
	ctx: ProvisioningContext,
}

impl WorkspaceOrchestrator {
	pub fn new(ctx: ProvisioningContext) -> Self {
		Self { ctx }
	}

	pub fn context(&self) -> &ProvisioningContext {
		&self.ctx
	}

	/// Validates and runs a request, mapping the result to an [`Outcome`].
	pub async fn execute(&self, request: WorkspaceRequest, cancel: &CancellationToken) -> Outcome {
		let workspace_id = request.workspace_id();
		let result = self.dispatch(request, cancel).await;
		if let Err(e) = &result {
			match e.kind() {
				OutcomeKind::ServerError => error!(workspace_id, error = %e, "workspace operation failed"),
				kind => info!(workspace_id, ?kind, error = %e, "workspace operation refused"),
			}
		}
		result.into()
	}

	async fn dispatch(&self, request: WorkspaceRequest, cancel: &CancellationToken) -> Result<LifecycleResult> {
		match request {
			WorkspaceRequest::Create(req) => {
				let create = req.validate()?;
				self.create(&create, cancel).await
			}
			WorkspaceRequest::Start { workspace_id } => {
				self.start(validate_workspace_id(workspace_id)?, cancel).await
			}
			WorkspaceRequest::Stop { workspace_id } => {
				self.stop(validate_workspace_id(workspace_id)?, cancel).await
			}
			WorkspaceRequest::Destroy { workspace_id } => {
				self.destroy(validate_workspace_id(workspace_id)?, cancel).await
			}
			WorkspaceRequest::State { workspace_id } => {
				let id = validate_workspace_id(workspace_id)?;
				let state = self.state(id).await?;
				Ok(LifecycleResult::unchanged(id, state))
			}
		}
	}

	pub async fn state(&self, id: i64) -> Result<WorkspaceState> {
		Ok(read_workspace_state(self.ctx.backend(), id, &self.ctx.workspace_resource_type).await?)
	}

	/// Runs `work` while holding the job lock for `id`. The lock is released
	/// on success, on error and on panic; a panic is resumed afterwards.
	pub async fn guarded<T, F>(&self, id: i64, work: F) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		let Some(lease) = self.ctx.lock.acquire(id).await? else {
			return Err(WorkspaceError::OperationInProgress { id });
		};

		let outcome = AssertUnwindSafe(work).catch_unwind().await;

		if let Err(e) = lease.release().await {
			error!(workspace_id = id, error = %e, "failed to release job lock");
		}
		match outcome {
			Ok(result) => result,
			Err(panic) => std::panic::resume_unwind(panic),
		}
	}

	#[instrument(skip(self, request, cancel), fields(workspace_id = request.workspace_id))]
	pub async fn create(&self, request: &CreateWorkspace, cancel: &CancellationToken) -> Result<LifecycleResult> {
		self.guarded(request.workspace_id, self.create_locked(request, cancel))
			.await
	}

	async fn create_locked(&self, request: &CreateWorkspace, cancel: &CancellationToken) -> Result<LifecycleResult> {
		let id = request.workspace_id;
		// A persisted module without a live workspace is a create whose
		// rollback failed. It has to be destroyed first.
		if self.state(id).await? != WorkspaceState::Destroyed || self.ctx.modules.exists(id).await? {
			return Err(WorkspaceError::AlreadyCreated { id });
		}

		let storage_class = request
			.storage_class
			.clone()
			.unwrap_or_else(|| self.ctx.default_storage_class.clone());
		let volume_shape = VolumeShape {
			disk_gb: request.disk_gb,
			storage_class: storage_class.clone(),
		};
		let volume_id = self.ctx.volumes.claim(&volume_shape, id).await?.map(|v| v.id);
		if volume_id.is_none() {
			debug!("no pooled volume available, provisioning without one");
		}

		let mut module = match self.render_module(request, &storage_class, volume_id) {
			Ok(module) => module,
			Err(e) => {
				if let Some(volume_id) = volume_id {
					best_effort("release volume", self.ctx.volumes.release(volume_id)).await;
				}
				return Err(e);
			}
		};

		match self.apply_and_record(&mut module, cancel).await {
			Ok((log, agent)) => {
				info!(agent_id = agent.id, volume_id = ?volume_id, "workspace created");
				Ok(LifecycleResult {
					workspace_id: id,
					state: WorkspaceState::Active,
					agent: Some(agent),
					volume_id,
					log,
				})
			}
			Err(e) if e.is_compensable() => {
				warn!(error = %e, "create failed, compensating");
				self.compensate_create(&mut module, volume_id).await;
				Err(e)
			}
			Err(e) => {
				// The apply committed. Keep everything and make it destroyable.
				warn!(error = %e, "create committed but could not be confirmed");
				best_effort("persist module", self.ctx.modules.save(&module)).await;
				Err(e)
			}
		}
	}

	fn render_module(
		&self,
		request: &CreateWorkspace,
		storage_class: &str,
		volume_id: Option<i64>,
	) -> Result<Module> {
		let shape = WorkspaceShape {
			image: request.image.clone(),
			cpu: request.cpu,
			memory_gb: request.memory_gb,
			disk_gb: request.disk_gb,
			storage_class: storage_class.to_string(),
		};
		let mut vars = self.ctx.settings.template_vars(request.workspace_id, &shape);
		vars.insert("owner_id", request.owner_id);
		vars.insert(
			"access_url",
			request.access_url.as_ref().map(|u| u.as_str()).unwrap_or_default(),
		);
		if let Some(volume_id) = volume_id {
			vars.insert("volume_id", volume_id);
		}

		let configuration = self
			.ctx
			.templates
			.select(volume_id.is_some())
			.render(&vars)?;
		Ok(Module::new(request.workspace_id, configuration))
	}

	async fn apply_and_record(
		&self,
		module: &mut Module,
		cancel: &CancellationToken,
	) -> Result<(ExecutionLog, AgentInfo)> {
		let log = self.ctx.provisioner.apply(module, cancel).await?;
		let agent = read_agent(
			self.ctx.backend(),
			module.id,
			&self.ctx.settings.agent_resource_type,
		)
		.await?;
		self.ctx.modules.save(module).await?;
		Ok((log, agent))
	}

	/// Undoes a failed create under its own cancellation scope, so a
	/// cancelled caller does not abort the cleanup. When the destroy fails the
	/// statefile, the module and the volume claim are kept for a later destroy.
	async fn compensate_create(&self, module: &mut Module, volume_id: Option<i64>) {
		let id = module.id;
		module.set_transition(&self.ctx.settings.transition_env, Transition::Destroy);

		if !compensating_destroy(&self.ctx.provisioner, module, "compensating destroy").await {
			error!(workspace_id = id, "rollback failed, keeping statefile and module");
			best_effort("persist module after failed rollback", self.ctx.modules.save(module)).await;
			return;
		}
		best_effort(
			"remove statefile",
			self.ctx.backend().remove_statefile(&state_path(id)),
		)
		.await;
		best_effort("delete module", self.ctx.modules.delete(id)).await;
		if let Some(volume_id) = volume_id {
			best_effort("release volume", self.ctx.volumes.release(volume_id)).await;
		}
	}

	/// Starts a stopped workspace. A destroyed workspace cannot be started.
	#[instrument(skip(self, cancel))]
	pub async fn start(&self, id: i64, cancel: &CancellationToken) -> Result<LifecycleResult> {
		self.guarded(id, self.transition_locked(id, Transition::Start, cancel))
			.await
	}

	#[instrument(skip(self, cancel))]
	pub async fn stop(&self, id: i64, cancel: &CancellationToken) -> Result<LifecycleResult> {
		self.guarded(id, self.transition_locked(id, Transition::Stop, cancel))
			.await
	}

	async fn transition_locked(
		&self,
		id: i64,
		transition: Transition,
		cancel: &CancellationToken,
	) -> Result<LifecycleResult> {
		let target = match transition {
			Transition::Start => WorkspaceState::Active,
			_ => WorkspaceState::Stopped,
		};
		match self.state(id).await? {
			WorkspaceState::Destroyed => return Err(WorkspaceError::NotFound { id }),
			current if current == target => {
				debug!(state = %current, "already in requested state");
				return Ok(LifecycleResult::unchanged(id, current));
			}
			_ => {}
		}

		let mut module = self.ctx.modules.load(id).await?;
		module.set_transition(&self.ctx.settings.transition_env, transition);
		let log = self.ctx.provisioner.apply(&mut module, cancel).await?;

		let agent = match transition {
			Transition::Start => Some(
				read_agent(self.ctx.backend(), id, &self.ctx.settings.agent_resource_type).await?,
			),
			_ => None,
		};
		self.ctx.modules.save(&module).await?;
		info!(state = %target, "workspace transitioned");

		Ok(LifecycleResult {
			workspace_id: id,
			state: target,
			agent,
			volume_id: None,
			log,
		})
	}

	/// Destroys a workspace and the pooled resources it owns. Destroying a
	/// destroyed workspace succeeds.
	#[instrument(skip(self, cancel))]
	pub async fn destroy(&self, id: i64, cancel: &CancellationToken) -> Result<LifecycleResult> {
		self.guarded(id, self.destroy_locked(id, cancel)).await
	}

	async fn destroy_locked(&self, id: i64, cancel: &CancellationToken) -> Result<LifecycleResult> {
		if self.state(id).await? == WorkspaceState::Destroyed && !self.ctx.modules.exists(id).await? {
			best_effort(
				"remove leftover statefile",
				self.ctx.backend().remove_statefile(&state_path(id)),
			)
			.await;
			return Ok(LifecycleResult::unchanged(id, WorkspaceState::Destroyed));
		}

		let mut module = self.ctx.modules.load(id).await?;
		module.set_transition(&self.ctx.settings.transition_env, Transition::Destroy);
		let log = match self.ctx.provisioner.destroy(&mut module, cancel).await {
			Ok(log) => log,
			Err(e @ IacError::LogParse { .. }) => {
				warn!(error = %e, "destroy committed but its log was unreadable");
				ExecutionLog::default()
			}
			Err(e) => return Err(e.into()),
		};

		let volumes = self.ctx.volumes.destroy_all_for_owner(id, cancel).await?;
		let warm = self.ctx.workspaces.destroy_all_for_owner(id, cancel).await?;
		self.ctx.modules.delete(id).await?;
		self.ctx.backend().remove_statefile(&state_path(id)).await?;
		info!(volumes, warm, "workspace destroyed");

		Ok(LifecycleResult {
			workspace_id: id,
			state: WorkspaceState::Destroyed,
			agent: None,
			volume_id: None,
			log,
		})
	}

	/// Claims a pre-provisioned workspace of `shape` for `owner`.
	#[instrument(skip(self))]
	pub async fn claim_warm_workspace(
		&self,
		owner: i64,
		shape: &WorkspaceShape,
	) -> Result<Option<PooledResource<WorkspaceKind>>> {
		Ok(self.ctx.workspaces.claim(shape, owner).await?)
	}

	/// Returns every warm workspace claimed by `owner` to the pool. Only valid
	/// when the owner aborted before using them.
	#[instrument(skip(self))]
	pub async fn release_warm_workspaces(&self, owner: i64) -> Result<usize> {
		let claimed = self.ctx.workspaces.repository().list_by_owner(owner).await?;
		for resource in &claimed {
			self.ctx.workspaces.release(resource.id).await?;
		}
		Ok(claimed.len())
	}
}
