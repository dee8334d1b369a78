// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use spindle_server_db::{PoolKind, VolumeKind, WorkspaceKind};
use spindle_server_jobs::{Job, JobContext, JobError, JobOutput};
use spindle_server_pool::{ResourcePool, VolumePool, WorkspacePool};
use tracing::instrument;

pub const VOLUME_RECONCILE_JOB: &str = "volume-pool-reconcile";
pub const WORKSPACE_RECONCILE_JOB: &str = "workspace-pool-reconcile";

/// Tops a pool up to its bucket targets and trims any surplus.
pub struct PoolReconcileJob<K: PoolKind> {
	id: &'static str,
	name: &'static str,
	description: &'static str,
	pool: ResourcePool<K>,
}

impl PoolReconcileJob<VolumeKind> {
	pub fn volumes(pool: VolumePool) -> Self {
		Self {
			id: VOLUME_RECONCILE_JOB,
			name: "Volume Pool Reconcile",
			description: "Provision or destroy pooled volumes to match bucket targets",
			pool,
		}
	}
}

impl PoolReconcileJob<WorkspaceKind> {
	pub fn workspaces(pool: WorkspacePool) -> Self {
		Self {
			id: WORKSPACE_RECONCILE_JOB,
			name: "Warm Workspace Pool Reconcile",
			description: "Provision or destroy warm workspaces to match bucket targets",
			pool,
		}
	}
}

#[async_trait]
impl<K: PoolKind> Job for PoolReconcileJob<K> {
	fn id(&self) -> &str {
		self.id
	}

	fn name(&self) -> &str {
		self.name
	}

	fn description(&self) -> &str {
		self.description
	}

	#[instrument(skip(self, ctx), fields(job_id = self.id, run_id = %ctx.run_id))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.cancellation_token.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		// A pass that is already running keeps going for the other callers
		// sharing it; only this job's wait is abandoned.
		let report = tokio::select! {
			_ = ctx.cancellation_token.cancelled() => return Err(JobError::Cancelled),
			report = self.pool.reconcile() => report,
		};

		match report {
			Ok(report) => {
				let failures = report.failures();
				if failures > 0 {
					tracing::warn!(
						pass = report.pass,
						failures,
						"Pool reconcile finished with failures"
					);
				} else {
					tracing::info!(
						pass = report.pass,
						provisioned = report.provisioned(),
						destroyed = report.destroyed(),
						drained = report.drained,
						"Pool reconcile completed"
					);
				}
				Ok(JobOutput {
					message: format!(
						"Provisioned {}, destroyed {}, {} failures",
						report.provisioned(),
						report.destroyed(),
						failures
					),
					metadata: Some(serde_json::json!({
						"pass": report.pass,
						"provisioned": report.provisioned(),
						"destroyed": report.destroyed(),
						"drained": report.drained,
						"failures": failures,
						"buckets": report.buckets.len(),
					})),
				})
			}
			Err(e) => {
				tracing::error!(error = %e, "Pool reconcile failed");
				Err(JobError::Failed {
					message: e.to_string(),
					retryable: true,
				})
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use spindle_server_db::testing::create_test_pool;
	use spindle_server_db::{PoolRepository, VolumeShape};
	use spindle_server_pool::{Bucket, ResourceFactory};
	use spindle_server_jobs::{CancellationToken, TriggerSource};
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	#[derive(Default)]
	struct CountingFactory {
		provisioned: AtomicUsize,
	}

	#[async_trait]
	impl ResourceFactory<VolumeKind> for CountingFactory {
		async fn provision(
			&self,
			_id: i64,
			_shape: &VolumeShape,
			_cancel: &CancellationToken,
		) -> spindle_server_pool::Result<()> {
			self.provisioned.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}

		async fn teardown(&self, _id: i64, _cancel: &CancellationToken) -> spindle_server_pool::Result<()> {
			Ok(())
		}
	}

	fn ctx(token: CancellationToken) -> JobContext {
		JobContext {
			run_id: "run-1".to_string(),
			triggered_by: TriggerSource::Manual,
			retry_count: 0,
			cancellation_token: token,
		}
	}

	async fn volume_pool(target: u32) -> (VolumePool, Arc<CountingFactory>) {
		let db = create_test_pool().await;
		let factory = Arc::new(CountingFactory::default());
		let pool = ResourcePool::new(
			PoolRepository::new(db),
			factory.clone(),
			vec![Bucket {
				shape: VolumeShape {
					disk_gb: 10,
					storage_class: "standard".to_string(),
				},
				target,
			}],
			2,
		);
		(pool, factory)
	}

	#[tokio::test]
	async fn reconciles_and_reports_counts() {
		let (pool, factory) = volume_pool(3).await;
		let job = PoolReconcileJob::volumes(pool);
		assert_eq!(job.id(), VOLUME_RECONCILE_JOB);

		let output = job.run(&ctx(CancellationToken::new())).await.unwrap();
		assert_eq!(factory.provisioned.load(Ordering::SeqCst), 3);
		let metadata = output.metadata.unwrap();
		assert_eq!(metadata["provisioned"], 3);
		assert_eq!(metadata["drained"], 0);
		assert_eq!(metadata["failures"], 0);
	}

	#[tokio::test]
	async fn cancelled_before_start() {
		let (pool, factory) = volume_pool(3).await;
		let token = CancellationToken::new();
		token.cancel();

		let result = PoolReconcileJob::volumes(pool).run(&ctx(token)).await;
		assert!(matches!(result, Err(JobError::Cancelled)));
		assert_eq!(factory.provisioned.load(Ordering::SeqCst), 0);
	}
}
