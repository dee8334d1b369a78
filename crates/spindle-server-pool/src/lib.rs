// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Warm pools of pre-provisioned volumes and workspaces.
//!
//! [`ResourcePool`] is written once over [`spindle_server_db::PoolKind`] and a
//! [`ResourceFactory`]; [`VolumePool`] and [`WorkspacePool`] are its two
//! instances.

pub mod coalesce;
pub mod error;
pub mod factory;
pub mod pool;
pub mod volume;
pub mod workspace;

pub use coalesce::Coalescer;
pub use error::{PoolError, Result};
pub use factory::{
	apply_new_module, best_effort, compensating_destroy, new_resource_id, teardown_module, ResourceFactory,
	RESOURCE_ID_RANGE,
};
pub use pool::{Bucket, BucketReport, BucketStatus, ReconcileReport, ResourcePool};
pub use volume::{volume_template_vars, VolumeFactory, VolumePool};
pub use workspace::{WorkspaceFactory, WorkspacePool, WorkspaceSettings};
