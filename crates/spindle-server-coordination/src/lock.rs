// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-resource mutual exclusion across the cluster.
//!
//! A resource id is locked while the key `provisioner/job/active/{id}` holds
//! a non-empty value. Holders must unregister on every exit path or the
//! resource stays locked for every node.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use tracing::{debug, instrument, warn};

use crate::error::Result;
use crate::store::CoordinationStore;

pub const JOB_KEY_PREFIX: &str = "provisioner/job/active/";

pub fn job_key(id: i64) -> String {
	format!("{JOB_KEY_PREFIX}{id}")
}

/// How `register` claims a key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockStrategy {
	/// Atomic create-if-absent. Two concurrent registers never both win.
	#[default]
	CompareAndSwap,
	/// Read, then write. Two nodes that both read before either writes will
	/// both believe they hold the lock.
	CheckThenWrite,
}

#[derive(Clone)]
pub struct ClusterJobLock {
	store: Arc<dyn CoordinationStore>,
	strategy: LockStrategy,
}

impl std::fmt::Debug for ClusterJobLock {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClusterJobLock")
			.field("store", &self.store.name())
			.field("strategy", &self.strategy)
			.finish()
	}
}

fn timestamp() -> String {
	Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl ClusterJobLock {
	pub fn new(store: Arc<dyn CoordinationStore>, strategy: LockStrategy) -> Self {
		Self { store, strategy }
	}

	pub fn strategy(&self) -> LockStrategy {
		self.strategy
	}

	/// Claims the lock for `id`. `false` means another operation holds it;
	/// callers report that rather than retrying.
	#[instrument(skip(self), fields(strategy = ?self.strategy))]
	pub async fn register(&self, id: i64) -> Result<bool> {
		let key = job_key(id);
		let registered = match self.strategy {
			LockStrategy::CheckThenWrite => {
				if self.is_held(&key).await? {
					false
				} else {
					self.store.put(&key, &timestamp()).await?;
					true
				}
			}
			LockStrategy::CompareAndSwap => {
				// An empty value does not hold the lock and is taken over in
				// place. The key may vanish in between, so create once more.
				self.store.put_if_absent(&key, &timestamp()).await?
					|| self.store.replace(&key, "", &timestamp()).await?
					|| self.store.put_if_absent(&key, &timestamp()).await?
			}
		};

		if registered {
			debug!(id, "job lock registered");
		} else {
			debug!(id, "job lock already held");
		}
		Ok(registered)
	}

	/// Releases the lock for `id` unconditionally.
	#[instrument(skip(self))]
	pub async fn unregister(&self, id: i64) -> Result<()> {
		self.store.delete(&job_key(id)).await?;
		debug!(id, "job lock unregistered");
		Ok(())
	}

	/// When the current holder registered, if anyone holds the lock.
	pub async fn holder_since(&self, id: i64) -> Result<Option<String>> {
		Ok(self
			.store
			.get(&job_key(id))
			.await?
			.filter(|value| !value.is_empty()))
	}

	/// Registers and returns a lease that unregisters when released or
	/// dropped. `None` when the lock is held elsewhere.
	pub async fn acquire(&self, id: i64) -> Result<Option<JobLease>> {
		if !self.register(id).await? {
			return Ok(None);
		}
		Ok(Some(JobLease {
			lock: self.clone(),
			id,
			released: false,
		}))
	}

	async fn is_held(&self, key: &str) -> Result<bool> {
		Ok(self
			.store
			.get(key)
			.await?
			.is_some_and(|value| !value.is_empty()))
	}
}

/// A registered job lock.
///
/// [`JobLease::release`] unregisters and reports failures. Dropping an
/// unreleased lease, for example when the guarded future is cancelled,
/// unregisters on a spawned task.
#[derive(Debug)]
#[must_use = "dropping a lease releases the lock"]
pub struct JobLease {
	lock: ClusterJobLock,
	id: i64,
	released: bool,
}

impl JobLease {
	pub fn id(&self) -> i64 {
		self.id
	}

	pub async fn release(mut self) -> Result<()> {
		self.released = true;
		self.lock.unregister(self.id).await
	}
}

impl Drop for JobLease {
	fn drop(&mut self) {
		if self.released {
			return;
		}
		let lock = self.lock.clone();
		let id = self.id;
		match tokio::runtime::Handle::try_current() {
			Ok(handle) => {
				handle.spawn(async move {
					if let Err(e) = lock.unregister(id).await {
						warn!(id, error = %e, "failed to unregister dropped job lease");
					}
				});
			}
			Err(_) => warn!(id, "job lease dropped outside a runtime, lock not released"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::MemoryCoordinationStore;

	fn lock_with(store: &MemoryCoordinationStore, strategy: LockStrategy) -> ClusterJobLock {
		ClusterJobLock::new(Arc::new(store.clone()), strategy)
	}

	#[tokio::test]
	async fn test_second_register_is_refused() {
		for strategy in [LockStrategy::CompareAndSwap, LockStrategy::CheckThenWrite] {
			let store = MemoryCoordinationStore::new();
			let lock = lock_with(&store, strategy);
			assert!(lock.register(42).await.unwrap());
			assert!(!lock.register(42).await.unwrap());
			assert!(lock.register(43).await.unwrap());
			assert_eq!(store.keys(), vec![job_key(42), job_key(43)]);
		}
	}

	#[tokio::test]
	async fn test_unregister_allows_register_again() {
		let store = MemoryCoordinationStore::new();
		let lock = lock_with(&store, LockStrategy::CompareAndSwap);
		assert!(lock.register(1).await.unwrap());
		lock.unregister(1).await.unwrap();
		assert!(lock.register(1).await.unwrap());
	}

	#[tokio::test]
	async fn test_empty_value_does_not_hold() {
		let store = MemoryCoordinationStore::new();
		for strategy in [LockStrategy::CompareAndSwap, LockStrategy::CheckThenWrite] {
			store.put(&job_key(5), "").await.unwrap();
			let lock = lock_with(&store, strategy);
			assert!(lock.register(5).await.unwrap());
			assert!(lock.holder_since(5).await.unwrap().is_some());
		}
	}

	#[tokio::test]
	async fn test_empty_value_is_taken_over_by_one_register() {
		let store = MemoryCoordinationStore::new().with_yielding_reads();
		store.put(&job_key(6), "").await.unwrap();
		let lock = lock_with(&store, LockStrategy::CompareAndSwap);
		let results = futures::future::join_all((0..8).map(|_| lock.register(6))).await;
		let winners = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
		assert_eq!(winners, 1);
		assert!(lock.holder_since(6).await.unwrap().is_some());
	}

	#[tokio::test]
	async fn test_compare_and_swap_has_one_winner_under_contention() {
		let store = MemoryCoordinationStore::new().with_yielding_reads();
		let lock = lock_with(&store, LockStrategy::CompareAndSwap);
		let results = futures::future::join_all((0..8).map(|_| lock.register(9))).await;
		let winners = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
		assert_eq!(winners, 1);
	}

	#[tokio::test]
	async fn test_check_then_write_race_is_observable() {
		let store = MemoryCoordinationStore::new().with_yielding_reads();
		let lock = lock_with(&store, LockStrategy::CheckThenWrite);
		let (a, b) = tokio::join!(lock.register(9), lock.register(9));
		assert!(a.unwrap());
		assert!(b.unwrap());
	}

	#[tokio::test]
	async fn test_lease_release_unregisters() {
		let store = MemoryCoordinationStore::new();
		let lock = lock_with(&store, LockStrategy::CompareAndSwap);
		let lease = lock.acquire(3).await.unwrap().unwrap();
		assert!(lock.acquire(3).await.unwrap().is_none());
		lease.release().await.unwrap();
		assert!(store.keys().is_empty());
	}

	#[tokio::test]
	async fn test_dropped_lease_unregisters() {
		let store = MemoryCoordinationStore::new();
		let lock = lock_with(&store, LockStrategy::CompareAndSwap);
		let lease = lock.acquire(3).await.unwrap().unwrap();
		drop(lease);
		for _ in 0..10 {
			if store.keys().is_empty() {
				break;
			}
			tokio::task::yield_now().await;
		}
		assert!(store.keys().is_empty());
	}
}
