// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded in-memory record of job runs, newest last.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::types::{JobRun, JobStatus};

pub const DEFAULT_HISTORY_SIZE: usize = 20;

#[derive(Debug)]
pub struct RunHistory {
	capacity: usize,
	runs: Mutex<HashMap<String, VecDeque<JobRun>>>,
}

impl Default for RunHistory {
	fn default() -> Self {
		Self::new(DEFAULT_HISTORY_SIZE)
	}
}

impl RunHistory {
	/// `capacity` is per job and is clamped to at least one run.
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity: capacity.max(1),
			runs: Mutex::new(HashMap::new()),
		}
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub async fn record_run_start(&self, run: JobRun) {
		let mut runs = self.runs.lock().await;
		let entries = runs.entry(run.job_id.clone()).or_default();
		entries.push_back(run);
		while entries.len() > self.capacity {
			entries.pop_front();
		}
	}

	pub async fn record_run_complete(
		&self,
		job_id: &str,
		run_id: &str,
		status: JobStatus,
		retry_count: u32,
		error_message: Option<String>,
		metadata: Option<serde_json::Value>,
	) {
		let mut runs = self.runs.lock().await;
		let Some(run) = runs
			.get_mut(job_id)
			.and_then(|entries| entries.iter_mut().rev().find(|r| r.id == run_id))
		else {
			debug!(job_id, run_id, "completed run already evicted from history");
			return;
		};

		let completed_at = Utc::now();
		run.status = status;
		run.retry_count = retry_count;
		run.duration_ms = Some((completed_at - run.started_at).num_milliseconds());
		run.completed_at = Some(completed_at);
		run.error_message = error_message;
		run.metadata = metadata;
	}

	pub async fn last_run(&self, job_id: &str) -> Option<JobRun> {
		let runs = self.runs.lock().await;
		runs.get(job_id).and_then(|entries| entries.back().cloned())
	}

	/// Runs for `job_id`, newest first.
	pub async fn runs(&self, job_id: &str) -> Vec<JobRun> {
		let runs = self.runs.lock().await;
		runs.get(job_id)
			.map(|entries| entries.iter().rev().cloned().collect())
			.unwrap_or_default()
	}

	/// Failed runs since the last non-failed completion. In-flight runs are
	/// skipped.
	pub async fn count_consecutive_failures(&self, job_id: &str) -> u32 {
		let runs = self.runs.lock().await;
		let Some(entries) = runs.get(job_id) else {
			return 0;
		};

		let mut count = 0;
		for run in entries.iter().rev() {
			match run.status {
				JobStatus::Running => continue,
				JobStatus::Failed => count += 1,
				JobStatus::Succeeded | JobStatus::Cancelled => break,
			}
		}
		count
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::TriggerSource;

	async fn record(history: &RunHistory, id: &str, status: JobStatus) {
		history
			.record_run_start(JobRun::started(id, "job", TriggerSource::Schedule))
			.await;
		if status != JobStatus::Running {
			history
				.record_run_complete("job", id, status, 0, None, None)
				.await;
		}
	}

	#[tokio::test]
	async fn completes_the_matching_run() {
		let history = RunHistory::new(5);
		record(&history, "r1", JobStatus::Running).await;
		history
			.record_run_complete("job", "r1", JobStatus::Failed, 2, Some("boom".into()), None)
			.await;

		let run = history.last_run("job").await.unwrap();
		assert_eq!(run.status, JobStatus::Failed);
		assert_eq!(run.retry_count, 2);
		assert_eq!(run.error_message.as_deref(), Some("boom"));
		assert!(run.completed_at.is_some());
		assert!(run.duration_ms.unwrap() >= 0);
	}

	#[tokio::test]
	async fn evicts_oldest_beyond_capacity() {
		let history = RunHistory::new(2);
		record(&history, "r1", JobStatus::Succeeded).await;
		record(&history, "r2", JobStatus::Succeeded).await;
		record(&history, "r3", JobStatus::Failed).await;

		let ids: Vec<_> = history.runs("job").await.into_iter().map(|r| r.id).collect();
		assert_eq!(ids, vec!["r3", "r2"]);
	}

	#[tokio::test]
	async fn counts_failures_until_success() {
		let history = RunHistory::new(10);
		record(&history, "r1", JobStatus::Failed).await;
		record(&history, "r2", JobStatus::Succeeded).await;
		record(&history, "r3", JobStatus::Failed).await;
		record(&history, "r4", JobStatus::Failed).await;
		record(&history, "r5", JobStatus::Running).await;

		assert_eq!(history.count_consecutive_failures("job").await, 2);
		assert_eq!(history.count_consecutive_failures("other").await, 0);
	}

	#[tokio::test]
	async fn zero_capacity_keeps_one_run() {
		let history = RunHistory::new(0);
		assert_eq!(history.capacity(), 1);
		record(&history, "r1", JobStatus::Succeeded).await;
		record(&history, "r2", JobStatus::Succeeded).await;
		assert_eq!(history.runs("job").await.len(), 1);
	}
}
