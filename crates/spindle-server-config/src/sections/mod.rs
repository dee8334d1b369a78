// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections.

mod coordination;
mod database;
mod jobs;
mod logging;
mod pools;
mod provisioner;
mod storage;
mod workspace;

pub use coordination::{CoordinationConfig, CoordinationConfigLayer, CoordinationKind, LockStrategyKind};
pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use jobs::{JobsConfig, JobsConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use pools::{PoolsConfig, PoolsConfigLayer, VolumeBucketConfig, WorkspaceBucketConfig};
pub use provisioner::{ProvisionerConfig, ProvisionerConfigLayer};
pub use storage::{S3StorageConfig, S3StorageConfigLayer, StorageConfig, StorageConfigLayer, StorageKind};
pub use workspace::{HostAliasConfig, RegistryCacheConfig, WorkspaceConfig, WorkspaceConfigLayer};
