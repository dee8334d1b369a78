// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Infrastructure-as-code plumbing for Spindle.
//!
//! A [`Module`] is one unit of IaC configuration keyed by a resource id. The
//! [`Provisioner`] prepares it against a [`StateBackend`] and drives the IaC
//! engine through an [`IacRunner`]. The engine's statefile is the only record
//! of what exists; [`statefile`] turns it into a [`WorkspaceState`] and agent
//! credentials.

pub mod backend;
pub mod error;
pub mod log;
pub mod module;
pub mod module_store;
pub mod provisioner;
pub mod runner;
pub mod statefile;
pub mod template;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::{state_path, LocalBackend, S3Backend, StateBackend};
pub use error::{IacError, Result};
pub use log::{ApplyLog, DestroyLog, ExecutionLog, LogEntry};
pub use module::{EnvEntry, Module, Transition, BACKEND_PLACEHOLDER};
pub use module_store::{module_key, ModuleStore};
pub use provisioner::{Diagnostic, Provisioner, ValidationReport};
pub use runner::{CommandRunner, IacOperation, IacRunner, Invocation, ProcessOutput};
pub use statefile::{read_agent, read_workspace_state, AgentInfo, Statefile, WorkspaceState};
pub use template::{host_aliases_hcl, rewrite_image, HostAlias, RegistryCacheRule, Template, TemplateVars};
