// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cluster coordination for Spindle.
//!
//! [`ClusterJobLock`] serializes lifecycle operations per resource id across
//! every node, on top of a [`CoordinationStore`].

pub mod config_map;
pub mod error;
pub mod lock;
pub mod store;

pub use config_map::{object_name, ConfigMapCoordinationStore};
pub use error::{CoordinationError, Result};
pub use lock::{job_key, ClusterJobLock, JobLease, LockStrategy, JOB_KEY_PREFIX};
pub use store::{CoordinationStore, MemoryCoordinationStore};
