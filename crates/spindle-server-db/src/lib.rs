// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database layer for Spindle's warm pools.
//!
//! Both pools (volumes and full workspaces) share one row shape: an id, a
//! sizing descriptor, a state of `available` or `in_use`, and an owning
//! workspace id that is set exactly when the row is in use. [`PoolRepository`]
//! implements that once; [`VolumeKind`] and [`WorkspaceKind`] supply the
//! table-specific columns.

pub mod error;
pub mod migrations;
pub mod pool;
pub mod resource_pool;
pub mod volume;
pub mod workspace;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{DbError, Result};
pub use migrations::run_migrations;
pub use pool::{create_pool, ConnectSettings};
pub use resource_pool::{PoolKind, PoolRepository, PoolState, PoolStatusRow, PooledResource};
pub use volume::{VolumeKind, VolumeShape};
pub use workspace::{AgentCredentials, WorkspaceKind, WorkspaceShape};

pub use sqlx::SqlitePool;
