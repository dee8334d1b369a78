// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background job scheduler for the spindle server.
//!
//! Runs periodic and one-shot jobs (pool reconciliation, mostly) with retry
//! and exponential backoff, and derives per-job health from a bounded
//! in-memory run history.

pub mod context;
pub mod error;
pub mod health;
pub mod history;
pub mod job;
pub mod scheduler;
pub mod types;

pub use context::JobContext;
pub use error::{JobError, Result};
pub use health::{HealthState, JobHealthStatus, JobsHealthStatus, LastRunInfo};
pub use history::RunHistory;
pub use job::Job;
pub use scheduler::{JobScheduler, RetryPolicy};
pub use tokio_util::sync::CancellationToken;
pub use types::{JobOutput, JobRun, JobStatus, JobType, TriggerSource};
