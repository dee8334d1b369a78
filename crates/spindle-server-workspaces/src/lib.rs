// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Workspace lifecycle API.
//!
//! [`WorkspaceOrchestrator`] composes the cluster job lock, the warm pools and
//! the provisioner into create/start/stop/destroy. It is the only layer that
//! decides on compensating cleanup; cleanup failures go through
//! [`best_effort`] and never replace the original error.

pub mod context;
pub mod error;
pub mod orchestrator;
pub mod outcome;
pub mod request;

pub use context::{ProvisioningContext, WorkspaceTemplates};
pub use error::{Result, WorkspaceError};
pub use orchestrator::{deadline_token, WorkspaceOrchestrator};
pub use outcome::{ConflictReason, LifecycleResult, Outcome, OutcomeKind};
pub use request::{validate_workspace_id, CreateRequest, CreateWorkspace, WorkspaceRequest};
pub use spindle_server_pool::best_effort;
