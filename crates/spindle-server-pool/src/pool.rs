// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The warm pool engine.
//!
//! A [`ResourcePool`] keeps, for every configured [`Bucket`], the number of
//! available rows at the bucket's target. Deficits are provisioned and
//! surpluses torn down by a reconciliation pass. A resource whose teardown
//! fails is parked as draining, never returned to inventory, and retried at
//! the start of the next pass. Overlapping calls to
//! [`ResourcePool::reconcile`] share one pass.

use std::sync::Arc;

use spindle_server_db::{PoolKind, PoolRepository, PooledResource};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::coalesce::Coalescer;
use crate::error::{PoolError, Result};
use crate::factory::{best_effort, new_resource_id, ResourceFactory};

/// Draining rows retried per pass.
const DRAIN_BATCH: i64 = 100;

/// A configured shape and how many available resources of it to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket<S> {
	pub shape: S,
	pub target: u32,
}

/// What one pass did to one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketReport<S> {
	pub shape: S,
	pub target: u32,
	pub available_before: i64,
	pub provisioned: usize,
	pub destroyed: usize,
	pub failures: Vec<String>,
}

impl<S> BucketReport<S> {
	fn new(shape: S, target: u32) -> Self {
		Self {
			shape,
			target,
			available_before: 0,
			provisioned: 0,
			destroyed: 0,
			failures: Vec::new(),
		}
	}
}

/// Result of one reconciliation pass. Callers that shared a pass receive the
/// same report, including its pass number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport<S> {
	pub pass: u64,
	/// Owed teardowns from earlier passes that completed in this one.
	pub drained: usize,
	pub drain_failures: Vec<String>,
	pub buckets: Vec<BucketReport<S>>,
}

impl<S> ReconcileReport<S> {
	pub fn provisioned(&self) -> usize {
		self.buckets.iter().map(|b| b.provisioned).sum()
	}

	pub fn destroyed(&self) -> usize {
		self.buckets.iter().map(|b| b.destroyed).sum()
	}

	pub fn failures(&self) -> usize {
		self.drain_failures.len() + self.buckets.iter().map(|b| b.failures.len()).sum::<usize>()
	}
}

/// Counts for one shape. Shapes present in the table but no longer
/// configured are reported with a target of zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketStatus<S> {
	pub shape: S,
	pub target: u32,
	pub available: i64,
	pub in_use: i64,
	pub draining: i64,
}

struct PoolInner<K: PoolKind> {
	repo: PoolRepository<K>,
	factory: Arc<dyn ResourceFactory<K>>,
	buckets: Vec<Bucket<K::Shape>>,
	concurrency: usize,
	shutdown: CancellationToken,
	coalescer: Coalescer<ReconcileReport<K::Shape>>,
}

pub struct ResourcePool<K: PoolKind> {
	inner: Arc<PoolInner<K>>,
}

impl<K: PoolKind> Clone for ResourcePool<K> {
	fn clone(&self) -> Self {
		Self {
			inner: self.inner.clone(),
		}
	}
}

impl<K: PoolKind> std::fmt::Debug for ResourcePool<K> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ResourcePool")
			.field("kind", &K::NAME)
			.field("buckets", &self.inner.buckets)
			.field("concurrency", &self.inner.concurrency)
			.finish_non_exhaustive()
	}
}

impl<K: PoolKind> ResourcePool<K> {
	pub fn new(
		repo: PoolRepository<K>,
		factory: Arc<dyn ResourceFactory<K>>,
		buckets: Vec<Bucket<K::Shape>>,
		concurrency: usize,
	) -> Self {
		Self {
			inner: Arc::new(PoolInner {
				repo,
				factory,
				buckets,
				concurrency: concurrency.max(1),
				shutdown: CancellationToken::new(),
				coalescer: Coalescer::new(),
			}),
		}
	}

	pub fn repository(&self) -> &PoolRepository<K> {
		&self.inner.repo
	}

	pub fn buckets(&self) -> &[Bucket<K::Shape>] {
		&self.inner.buckets
	}

	/// Cancels in-flight provisioning started by reconciliation.
	pub fn shutdown(&self) {
		self.inner.shutdown.cancel();
	}

	/// Takes an available resource of `shape` for `owner`. `None` when the
	/// pool has none.
	#[instrument(skip(self), fields(kind = K::NAME))]
	pub async fn claim(&self, shape: &K::Shape, owner: i64) -> Result<Option<PooledResource<K>>> {
		let claimed = self.inner.repo.claim(shape, owner).await?;
		match &claimed {
			Some(resource) => info!(resource_id = resource.id, owner, "claimed pooled resource"),
			None => debug!(owner, "pool miss"),
		}
		Ok(claimed)
	}

	/// Returns a claimed resource to the available set. Only valid before
	/// the owner has used it.
	#[instrument(skip(self), fields(kind = K::NAME))]
	pub async fn release(&self, id: i64) -> Result<()> {
		self.inner.repo.release(id).await?;
		info!(resource_id = id, "released pooled resource");
		Ok(())
	}

	/// Tears down every resource owned by `owner`. The first failure aborts
	/// the call; rows not yet torn down are left in place.
	#[instrument(skip(self, cancel), fields(kind = K::NAME))]
	pub async fn destroy_all_for_owner(&self, owner: i64, cancel: &CancellationToken) -> Result<usize> {
		let owned = self.inner.repo.list_by_owner(owner).await?;
		for resource in &owned {
			self.inner.factory.teardown(resource.id, cancel).await?;
			self.inner.repo.delete(resource.id).await?;
			info!(resource_id = resource.id, owner, "destroyed owned resource");
		}
		Ok(owned.len())
	}

	/// Brings every bucket to its target. Concurrent callers share one pass.
	pub async fn reconcile(&self) -> Result<ReconcileReport<K::Shape>> {
		let inner = self.inner.clone();
		self.inner
			.coalescer
			.run(move |pass| async move { inner.reconcile_pass(pass).await })
			.await
			.map_err(PoolError::Task)
	}

	pub async fn status(&self) -> Result<Vec<BucketStatus<K::Shape>>> {
		let rows = self.inner.repo.status().await?;
		let mut statuses: Vec<BucketStatus<K::Shape>> = self
			.inner
			.buckets
			.iter()
			.map(|bucket| {
				let row = rows.iter().find(|r| r.shape == bucket.shape);
				BucketStatus {
					shape: bucket.shape.clone(),
					target: bucket.target,
					available: row.map_or(0, |r| r.available),
					in_use: row.map_or(0, |r| r.in_use),
					draining: row.map_or(0, |r| r.draining),
				}
			})
			.collect();

		for row in rows {
			if !self.inner.buckets.iter().any(|b| b.shape == row.shape) {
				statuses.push(BucketStatus {
					shape: row.shape,
					target: 0,
					available: row.available,
					in_use: row.in_use,
					draining: row.draining,
				});
			}
		}
		Ok(statuses)
	}
}

impl<K: PoolKind> PoolInner<K> {
	#[instrument(skip(self), fields(kind = K::NAME))]
	async fn reconcile_pass(self: Arc<Self>, pass: u64) -> ReconcileReport<K::Shape> {
		let (drained, drain_failures) = self.drain().await;

		let mut buckets = Vec::with_capacity(self.buckets.len());
		for bucket in &self.buckets {
			buckets.push(self.clone().reconcile_bucket(bucket.clone()).await);
		}

		let report = ReconcileReport {
			pass,
			drained,
			drain_failures,
			buckets,
		};
		info!(
			drained = report.drained,
			provisioned = report.provisioned(),
			destroyed = report.destroyed(),
			failures = report.failures(),
			"reconcile pass complete"
		);
		report
	}

	/// Retries teardowns that failed in earlier passes.
	async fn drain(self: &Arc<Self>) -> (usize, Vec<String>) {
		let owed = match self.repo.take_draining(DRAIN_BATCH).await {
			Ok(rows) => rows,
			Err(e) => {
				error!(error = %e, "failed to take draining resources");
				return (0, vec![e.to_string()]);
			}
		};
		if owed.is_empty() {
			return (0, Vec::new());
		}
		info!(count = owed.len(), "retrying owed teardowns");
		self.teardown_all(owed).await
	}

	async fn reconcile_bucket(self: Arc<Self>, bucket: Bucket<K::Shape>) -> BucketReport<K::Shape> {
		let mut report = BucketReport::new(bucket.shape.clone(), bucket.target);

		let available = match self.repo.count_available(&bucket.shape).await {
			Ok(n) => n,
			Err(e) => {
				error!(shape = ?bucket.shape, error = %e, "failed to count available resources");
				report.failures.push(e.to_string());
				return report;
			}
		};
		report.available_before = available;

		let target = i64::from(bucket.target);
		if available < target {
			let deficit = (target - available) as usize;
			info!(shape = ?bucket.shape, available, target, deficit, "provisioning deficit");
			self.provision_deficit(&bucket.shape, deficit, &mut report).await;
		} else if available > target {
			let surplus = available - target;
			info!(shape = ?bucket.shape, available, target, surplus, "removing surplus");
			self.remove_surplus(&bucket.shape, surplus, &mut report).await;
		}
		report
	}

	async fn provision_deficit(
		self: &Arc<Self>,
		shape: &K::Shape,
		deficit: usize,
		report: &mut BucketReport<K::Shape>,
	) {
		let permits = Arc::new(Semaphore::new(self.concurrency));
		let mut workers = JoinSet::new();

		for _ in 0..deficit {
			let inner = self.clone();
			let shape = shape.clone();
			let permits = permits.clone();
			workers.spawn(async move {
				let _permit = permits
					.acquire_owned()
					.await
					.map_err(|e| PoolError::Task(e.to_string()))?;
				inner.provision_one(&shape).await
			});
		}

		while let Some(joined) = workers.join_next().await {
			match joined {
				Ok(Ok(id)) => {
					debug!(resource_id = id, "provisioned pooled resource");
					report.provisioned += 1;
				}
				Ok(Err(e)) => {
					warn!(shape = ?shape, error = %e, "failed to provision pooled resource");
					report.failures.push(e.to_string());
				}
				Err(e) => {
					error!(shape = ?shape, error = %e, "provisioning task panicked");
					report.failures.push(e.to_string());
				}
			}
		}
	}

	async fn provision_one(&self, shape: &K::Shape) -> Result<i64> {
		let id = new_resource_id();
		let payload = self.factory.provision(id, shape, &self.shutdown).await?;

		if let Err(e) = self.repo.insert_available(id, shape, &payload).await {
			// Without a row nothing would ever tear it down.
			best_effort(
				"teardown of unrecorded resource",
				self.factory.teardown(id, &CancellationToken::new()),
			)
			.await;
			return Err(e.into());
		}
		Ok(id)
	}

	async fn remove_surplus(
		self: &Arc<Self>,
		shape: &K::Shape,
		surplus: i64,
		report: &mut BucketReport<K::Shape>,
	) {
		let taken = match self.repo.take_available(shape, surplus).await {
			Ok(rows) => rows,
			Err(e) => {
				error!(shape = ?shape, error = %e, "failed to take surplus resources");
				report.failures.push(e.to_string());
				return;
			}
		};

		let (destroyed, failures) = self.teardown_all(taken).await;
		report.destroyed += destroyed;
		report.failures.extend(failures);
	}

	/// Tears down rows already removed from the table, bounded by the pool's
	/// concurrency. Returns how many went and the failures.
	async fn teardown_all(self: &Arc<Self>, rows: Vec<PooledResource<K>>) -> (usize, Vec<String>) {
		let mut destroyed = 0;
		let mut failures = Vec::new();

		let permits = Arc::new(Semaphore::new(self.concurrency));
		let mut workers = JoinSet::new();
		for resource in rows {
			let inner = self.clone();
			let permits = permits.clone();
			workers.spawn(async move {
				let _permit = permits
					.acquire_owned()
					.await
					.map_err(|e| PoolError::Task(e.to_string()))?;
				inner.remove_one(resource).await
			});
		}

		while let Some(joined) = workers.join_next().await {
			match joined {
				Ok(Ok(())) => destroyed += 1,
				Ok(Err(e)) => {
					warn!(error = %e, "failed to tear down pooled resource");
					failures.push(e.to_string());
				}
				Err(e) => {
					error!(error = %e, "teardown task panicked");
					failures.push(e.to_string());
				}
			}
		}
		(destroyed, failures)
	}

	async fn remove_one(&self, resource: PooledResource<K>) -> Result<()> {
		match self.factory.teardown(resource.id, &self.shutdown).await {
			Ok(()) => Ok(()),
			Err(e) => {
				// The teardown may have got partway, so the resource can never
				// be handed out again. Park it for the next pass.
				let parked = best_effort(
					"park resource after failed teardown",
					self.repo
						.insert_draining(resource.id, &resource.shape, &resource.payload),
				)
				.await;
				if parked.is_none() {
					error!(resource_id = resource.id, "teardown failed and the resource is no longer tracked");
				}
				Err(e)
			}
		}
	}
}
