// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

type Flight<T> = Shared<BoxFuture<'static, std::result::Result<T, String>>>;

/// Collapses overlapping calls into one execution.
///
/// The first caller starts the work on a spawned task; callers arriving
/// while it runs await the same result. Each execution gets a pass number,
/// so callers can tell whether they shared one. A caller dropping its future
/// does not cancel the execution.
pub struct Coalescer<T> {
	inflight: Arc<Mutex<Option<(u64, Flight<T>)>>>,
	passes: AtomicU64,
}

impl<T> Default for Coalescer<T> {
	fn default() -> Self {
		Self {
			inflight: Arc::new(Mutex::new(None)),
			passes: AtomicU64::new(0),
		}
	}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl<T: Clone + Send + Sync + 'static> Coalescer<T> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of executions started so far.
	pub fn passes(&self) -> u64 {
		self.passes.load(Ordering::SeqCst)
	}

	/// Runs `work` unless an execution is already in flight, in which case
	/// its result is awaited instead. `Err` carries a panic or abort message
	/// from the spawned task.
	pub async fn run<F, Fut>(&self, work: F) -> std::result::Result<T, String>
	where
		F: FnOnce(u64) -> Fut,
		Fut: Future<Output = T> + Send + 'static,
	{
		let flight = {
			let mut slot = lock(&self.inflight);
			if let Some((pass, flight)) = slot.as_ref() {
				debug!(pass, "joining in-flight execution");
				flight.clone()
			} else {
				let pass = self.passes.fetch_add(1, Ordering::SeqCst) + 1;
				let handle = tokio::spawn(work(pass));
				let inflight = self.inflight.clone();
				let flight = async move {
					let result = handle.await.map_err(|e| e.to_string());
					let mut slot = lock(&inflight);
					if slot.as_ref().is_some_and(|(p, _)| *p == pass) {
						*slot = None;
					}
					result
				}
				.boxed()
				.shared();
				*slot = Some((pass, flight.clone()));
				flight
			}
		};
		flight.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::AtomicUsize;
	use std::time::Duration;

	#[tokio::test]
	async fn test_overlapping_calls_share_one_execution() {
		let coalescer = Coalescer::<u64>::new();
		let executions = Arc::new(AtomicUsize::new(0));

		let calls = (0..5).map(|_| {
			let executions = executions.clone();
			coalescer.run(move |pass| async move {
				executions.fetch_add(1, Ordering::SeqCst);
				tokio::time::sleep(Duration::from_millis(10)).await;
				pass
			})
		});
		let results = futures::future::join_all(calls).await;

		assert_eq!(executions.load(Ordering::SeqCst), 1);
		assert!(results.iter().all(|r| r == &Ok(1)));
		assert_eq!(coalescer.passes(), 1);
	}

	#[tokio::test]
	async fn test_sequential_calls_start_new_passes() {
		let coalescer = Coalescer::<u64>::new();
		let first = coalescer.run(|pass| async move { pass }).await.unwrap();
		let second = coalescer.run(|pass| async move { pass }).await.unwrap();
		assert_eq!(first, 1);
		assert_eq!(second, 2);
	}

	#[tokio::test]
	async fn test_panicking_work_is_reported_and_cleared() {
		let coalescer = Coalescer::<u64>::new();
		let err = coalescer
			.run(|_| async move { "boom".parse::<u64>().unwrap() })
			.await
			.unwrap_err();
		assert!(err.contains("panic"));
		assert_eq!(coalescer.run(|pass| async move { pass }).await, Ok(2));
	}
}
