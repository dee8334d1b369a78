// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::context::JobContext;
use crate::error::{JobError, Result};
use crate::health::{determine_health_state, HealthState, JobHealthStatus, JobsHealthStatus};
use crate::history::RunHistory;
use crate::job::Job;
use crate::types::{JobRun, JobStatus, JobType, TriggerSource};

const BASE_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);
const MAX_RETRIES: u32 = 3;

/// Exponential backoff between attempts of a retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	pub max_retries: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_retries: MAX_RETRIES,
			base_delay: BASE_RETRY_DELAY,
			max_delay: MAX_RETRY_DELAY,
		}
	}
}

impl RetryPolicy {
	/// Delay before retry number `retry_count` (1-based): base, 2x base, 4x base...
	pub fn delay(&self, retry_count: u32) -> Duration {
		let factor = 2u32.saturating_pow(retry_count.saturating_sub(1));
		self.base_delay.saturating_mul(factor).min(self.max_delay)
	}
}

#[derive(Clone)]
struct JobRunner {
	job: Arc<dyn Job>,
	token: Arc<Mutex<CancellationToken>>,
	history: Arc<RunHistory>,
	policy: RetryPolicy,
	sequence: Arc<AtomicU64>,
}

struct RegisteredJob {
	runner: JobRunner,
	job_type: JobType,
}

pub struct JobScheduler {
	jobs: HashMap<String, RegisteredJob>,
	history: Arc<RunHistory>,
	policy: RetryPolicy,
	sequence: Arc<AtomicU64>,
	shutdown: CancellationToken,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
	pub fn new(history: Arc<RunHistory>) -> Self {
		Self {
			jobs: HashMap::new(),
			history,
			policy: RetryPolicy::default(),
			sequence: Arc::new(AtomicU64::new(0)),
			shutdown: CancellationToken::new(),
			handles: Mutex::new(Vec::new()),
		}
	}

	/// Applies to jobs registered after this call.
	pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
		self.policy = policy;
		self
	}

	pub fn history(&self) -> &Arc<RunHistory> {
		&self.history
	}

	pub fn register_periodic(&mut self, job: Arc<dyn Job>, interval: Duration) {
		self.register(job, JobType::Periodic { interval });
	}

	pub fn register_one_shot(&mut self, job: Arc<dyn Job>) {
		self.register(job, JobType::OneShot);
	}

	fn register(&mut self, job: Arc<dyn Job>, job_type: JobType) {
		let id = job.id().to_string();
		let runner = JobRunner {
			job,
			token: Arc::new(Mutex::new(CancellationToken::new())),
			history: Arc::clone(&self.history),
			policy: self.policy,
			sequence: Arc::clone(&self.sequence),
		};
		if self.jobs.insert(id.clone(), RegisteredJob { runner, job_type }).is_some() {
			warn!(job_id = %id, "job registered twice, keeping the latest");
		}
	}

	/// Spawns a loop per periodic job. The first run happens one interval after start.
	#[instrument(skip(self))]
	pub async fn start(&self) -> Result<()> {
		let mut handles = self.handles.lock().await;

		for (job_id, registered) in &self.jobs {
			let JobType::Periodic { interval } = registered.job_type else {
				continue;
			};

			let runner = registered.runner.clone();
			let shutdown = self.shutdown.clone();
			let job_id = job_id.clone();

			let handle = tokio::spawn(async move {
				let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
				ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
				loop {
					tokio::select! {
						_ = shutdown.cancelled() => {
							info!(job_id = %job_id, "Shutting down periodic job");
							break;
						}
						_ = ticker.tick() => {
							let _ = runner.run(TriggerSource::Schedule).await;
						}
					}
				}
			});

			handles.push(handle);
		}

		info!(job_count = handles.len(), "Job scheduler started");
		Ok(())
	}

	/// Runs a job now, retrying per the policy. Returns the run id.
	#[instrument(skip(self))]
	pub async fn trigger_job(&self, job_id: &str, triggered_by: TriggerSource) -> Result<String> {
		let registered = self
			.jobs
			.get(job_id)
			.ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

		registered.runner.run(triggered_by).await
	}

	/// Cancels the in-flight run of a job, if any. Later runs are unaffected.
	#[instrument(skip(self))]
	pub async fn cancel_job(&self, job_id: &str) -> Result<()> {
		let registered = self
			.jobs
			.get(job_id)
			.ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

		registered.runner.cancel().await;
		Ok(())
	}

	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		self.shutdown.cancel();
		for registered in self.jobs.values() {
			registered.runner.cancel().await;
		}

		let mut handles = self.handles.lock().await;
		for handle in handles.drain(..) {
			let _ = handle.await;
		}

		info!("Job scheduler shut down");
	}

	pub fn job_ids(&self) -> Vec<String> {
		let mut ids: Vec<String> = self.jobs.keys().cloned().collect();
		ids.sort();
		ids
	}

	#[instrument(skip(self))]
	pub async fn job_status(&self, job_id: &str) -> Option<JobHealthStatus> {
		let registered = self.jobs.get(job_id)?;

		let last_run = self.history.last_run(job_id).await;
		let consecutive_failures = self.history.count_consecutive_failures(job_id).await;

		Some(JobHealthStatus {
			job_id: job_id.to_string(),
			name: registered.runner.job.name().to_string(),
			status: determine_health_state(last_run.as_ref(), consecutive_failures),
			last_run: last_run.map(Into::into),
			consecutive_failures,
		})
	}

	#[instrument(skip(self))]
	pub async fn health_status(&self) -> JobsHealthStatus {
		let mut jobs = Vec::new();
		let mut worst_state = HealthState::Healthy;

		for job_id in self.job_ids() {
			if let Some(status) = self.job_status(&job_id).await {
				worst_state = worst_state.max(status.status);
				jobs.push(status);
			}
		}

		JobsHealthStatus {
			status: worst_state,
			jobs,
		}
	}
}

impl JobRunner {
	async fn cancel(&self) {
		let mut token = self.token.lock().await;
		token.cancel();
		*token = CancellationToken::new();
	}

	async fn run(&self, triggered_by: TriggerSource) -> Result<String> {
		let job = &self.job;
		let cancellation_token = self.token.lock().await.clone();
		let run_id = format!(
			"{}-{}",
			job.id(),
			self.sequence.fetch_add(1, Ordering::Relaxed) + 1
		);
		self.history
			.record_run_start(JobRun::started(&run_id, job.id(), triggered_by))
			.await;

		let mut retry_count = 0u32;
		loop {
			let ctx = JobContext {
				run_id: run_id.clone(),
				triggered_by: if retry_count > 0 {
					TriggerSource::Retry
				} else {
					triggered_by
				},
				retry_count,
				cancellation_token: cancellation_token.clone(),
			};

			let result = if cancellation_token.is_cancelled() {
				Err(JobError::Cancelled)
			} else {
				job.run(&ctx).await
			};

			match result {
				Ok(output) => {
					self.complete(&run_id, JobStatus::Succeeded, retry_count, None, output.metadata)
						.await;
					info!(job_id = %job.id(), run_id = %run_id, message = %output.message, "Job completed successfully");
					return Ok(run_id);
				}
				Err(JobError::Cancelled) => {
					self.complete(&run_id, JobStatus::Cancelled, retry_count, None, None)
						.await;
					info!(job_id = %job.id(), run_id = %run_id, "Job cancelled");
					return Err(JobError::Cancelled);
				}
				Err(JobError::Failed { message, retryable }) => {
					if retryable && retry_count < self.policy.max_retries {
						retry_count += 1;
						let delay = self.policy.delay(retry_count);
						warn!(
							job_id = %job.id(),
							run_id = %run_id,
							retry_count,
							delay_ms = delay.as_millis() as u64,
							error = %message,
							"Job failed, retrying"
						);
						tokio::select! {
							_ = cancellation_token.cancelled() => {}
							_ = tokio::time::sleep(delay) => {}
						}
						continue;
					}

					self.complete(&run_id, JobStatus::Failed, retry_count, Some(message.clone()), None)
						.await;
					warn!(job_id = %job.id(), run_id = %run_id, error = %message, "Job failed");
					return Err(JobError::Failed { message, retryable });
				}
				Err(e) => {
					let message = e.to_string();
					self.complete(&run_id, JobStatus::Failed, retry_count, Some(message.clone()), None)
						.await;
					warn!(job_id = %job.id(), run_id = %run_id, error = %message, "Job failed with error");
					return Err(e);
				}
			}
		}
	}

	async fn complete(
		&self,
		run_id: &str,
		status: JobStatus,
		retry_count: u32,
		error: Option<String>,
		metadata: Option<serde_json::Value>,
	) {
		self.history
			.record_run_complete(self.job.id(), run_id, status, retry_count, error, metadata)
			.await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::JobOutput;
	use async_trait::async_trait;
	use std::sync::atomic::AtomicU32;
	use tokio::sync::Notify;

	fn fast_policy(max_retries: u32) -> RetryPolicy {
		RetryPolicy {
			max_retries,
			base_delay: Duration::from_millis(1),
			max_delay: Duration::from_millis(5),
		}
	}

	/// Fails `failures` times with the given retryability, then succeeds.
	struct ScriptedJob {
		id: String,
		failures: u32,
		retryable: bool,
		attempts: AtomicU32,
	}

	impl ScriptedJob {
		fn new(id: &str, failures: u32, retryable: bool) -> Arc<Self> {
			Arc::new(Self {
				id: id.to_string(),
				failures,
				retryable,
				attempts: AtomicU32::new(0),
			})
		}

		fn attempts(&self) -> u32 {
			self.attempts.load(Ordering::SeqCst)
		}
	}

	#[async_trait]
	impl Job for ScriptedJob {
		fn id(&self) -> &str {
			&self.id
		}

		fn name(&self) -> &str {
			"Scripted job"
		}

		fn description(&self) -> &str {
			"Fails a fixed number of times"
		}

		async fn run(&self, _ctx: &JobContext) -> std::result::Result<JobOutput, JobError> {
			let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
			if attempt <= self.failures {
				return Err(JobError::Failed {
					message: format!("attempt {attempt} failed"),
					retryable: self.retryable,
				});
			}
			Ok(JobOutput::new("done").with_metadata(serde_json::json!({ "attempt": attempt })))
		}
	}

	/// Waits for cancellation.
	struct BlockingJob {
		started: Arc<Notify>,
	}

	#[async_trait]
	impl Job for BlockingJob {
		fn id(&self) -> &str {
			"blocking"
		}

		fn name(&self) -> &str {
			"Blocking job"
		}

		fn description(&self) -> &str {
			"Runs until cancelled"
		}

		async fn run(&self, ctx: &JobContext) -> std::result::Result<JobOutput, JobError> {
			self.started.notify_one();
			ctx.cancellation_token.cancelled().await;
			Err(JobError::Cancelled)
		}
	}

	fn scheduler(max_retries: u32) -> JobScheduler {
		JobScheduler::new(Arc::new(RunHistory::new(10))).with_retry_policy(fast_policy(max_retries))
	}

	mod backoff {
		use super::*;

		#[test]
		fn doubles_from_base() {
			let policy = RetryPolicy::default();
			assert_eq!(policy.delay(1), Duration::from_secs(1));
			assert_eq!(policy.delay(2), Duration::from_secs(2));
			assert_eq!(policy.delay(3), Duration::from_secs(4));
		}

		#[test]
		fn caps_at_max() {
			let policy = RetryPolicy::default();
			assert_eq!(policy.delay(10), MAX_RETRY_DELAY);
			assert_eq!(policy.delay(100), MAX_RETRY_DELAY);
		}
	}

	mod trigger {
		use super::*;

		#[tokio::test]
		async fn unknown_job_is_not_found() {
			let scheduler = scheduler(3);
			match scheduler.trigger_job("nope", TriggerSource::Manual).await {
				Err(JobError::NotFound(id)) => assert_eq!(id, "nope"),
				other => panic!("expected NotFound, got {other:?}"),
			}
		}

		#[tokio::test]
		async fn success_is_recorded_with_metadata() {
			let mut scheduler = scheduler(3);
			let job = ScriptedJob::new("ok", 0, true);
			scheduler.register_one_shot(job.clone());

			let run_id = scheduler.trigger_job("ok", TriggerSource::Manual).await.unwrap();
			let run = scheduler.history().last_run("ok").await.unwrap();
			assert_eq!(run.id, run_id);
			assert_eq!(run.status, JobStatus::Succeeded);
			assert_eq!(run.triggered_by, TriggerSource::Manual);
			assert_eq!(run.metadata, Some(serde_json::json!({ "attempt": 1 })));
		}

		#[tokio::test]
		async fn retryable_failures_are_retried_within_one_run() {
			let mut scheduler = scheduler(3);
			let job = ScriptedJob::new("flaky", 2, true);
			scheduler.register_one_shot(job.clone());

			scheduler.trigger_job("flaky", TriggerSource::Manual).await.unwrap();
			assert_eq!(job.attempts(), 3);

			let runs = scheduler.history().runs("flaky").await;
			assert_eq!(runs.len(), 1);
			assert_eq!(runs[0].status, JobStatus::Succeeded);
			assert_eq!(runs[0].retry_count, 2);
		}

		#[tokio::test]
		async fn retries_are_bounded() {
			let mut scheduler = scheduler(2);
			let job = ScriptedJob::new("broken", u32::MAX, true);
			scheduler.register_one_shot(job.clone());

			let err = scheduler
				.trigger_job("broken", TriggerSource::Manual)
				.await
				.unwrap_err();
			assert!(matches!(err, JobError::Failed { retryable: true, .. }));
			assert_eq!(job.attempts(), 3);
		}

		#[tokio::test]
		async fn fatal_failure_is_not_retried() {
			let mut scheduler = scheduler(3);
			let job = ScriptedJob::new("fatal", 1, false);
			scheduler.register_one_shot(job.clone());

			assert!(scheduler.trigger_job("fatal", TriggerSource::Manual).await.is_err());
			assert_eq!(job.attempts(), 1);

			let status = scheduler.job_status("fatal").await.unwrap();
			assert_eq!(status.status, HealthState::Degraded);
			assert_eq!(status.consecutive_failures, 1);
			assert_eq!(
				status.last_run.unwrap().error.as_deref(),
				Some("attempt 1 failed")
			);
		}
	}

	mod cancellation {
		use super::*;

		#[tokio::test]
		async fn cancel_interrupts_in_flight_run() {
			let started = Arc::new(Notify::new());
			let mut scheduler = scheduler(3);
			scheduler.register_one_shot(Arc::new(BlockingJob {
				started: started.clone(),
			}));
			let scheduler = Arc::new(scheduler);

			let running = {
				let scheduler = scheduler.clone();
				tokio::spawn(async move { scheduler.trigger_job("blocking", TriggerSource::Manual).await })
			};
			started.notified().await;
			scheduler.cancel_job("blocking").await.unwrap();

			let result = running.await.unwrap();
			assert!(matches!(result, Err(JobError::Cancelled)));
			let run = scheduler.history().last_run("blocking").await.unwrap();
			assert_eq!(run.status, JobStatus::Cancelled);

			// A cancelled run does not count against health.
			let status = scheduler.job_status("blocking").await.unwrap();
			assert_eq!(status.status, HealthState::Healthy);
		}

		#[tokio::test]
		async fn cancel_unknown_job_is_not_found() {
			let scheduler = scheduler(3);
			assert!(matches!(
				scheduler.cancel_job("nope").await,
				Err(JobError::NotFound(_))
			));
		}
	}

	mod periodic {
		use super::*;

		#[tokio::test(start_paused = true)]
		async fn runs_every_interval_until_shutdown() {
			let mut scheduler = scheduler(0);
			let job = ScriptedJob::new("tick", 0, true);
			scheduler.register_periodic(job.clone(), Duration::from_secs(10));

			scheduler.start().await.unwrap();
			tokio::time::sleep(Duration::from_secs(35)).await;
			scheduler.shutdown().await;

			assert_eq!(job.attempts(), 3);
			let runs = scheduler.history().runs("tick").await;
			assert!(runs.iter().all(|r| r.triggered_by == TriggerSource::Schedule));

			tokio::time::sleep(Duration::from_secs(30)).await;
			assert_eq!(job.attempts(), 3);
		}
	}

	mod health {
		use super::*;

		#[tokio::test]
		async fn aggregate_reports_worst_job() {
			let mut scheduler = scheduler(0);
			scheduler.register_one_shot(ScriptedJob::new("good", 0, true));
			scheduler.register_one_shot(ScriptedJob::new("bad", u32::MAX, false));

			scheduler.trigger_job("good", TriggerSource::Manual).await.unwrap();
			for _ in 0..3 {
				let _ = scheduler.trigger_job("bad", TriggerSource::Manual).await;
			}

			let health = scheduler.health_status().await;
			assert_eq!(health.status, HealthState::Unhealthy);
			assert_eq!(health.jobs.len(), 2);
			assert_eq!(health.jobs[0].job_id, "bad");
			assert_eq!(health.jobs[0].consecutive_failures, 3);
			assert_eq!(health.jobs[1].status, HealthState::Healthy);
		}

		#[tokio::test]
		async fn unknown_job_has_no_status() {
			assert!(scheduler(0).job_status("nope").await.is_none());
		}
	}
}
