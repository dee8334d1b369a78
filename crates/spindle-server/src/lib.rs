// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Spindle provisioning server.
//!
//! Wires configuration into a [`ProvisioningContext`], keeps the volume and
//! warm-workspace pools topped up with background reconcile jobs, and exposes
//! the workspace lifecycle to operators through the CLI.

pub mod app;
pub mod cli;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod templates;
pub mod version;

pub use app::App;
pub use error::{Result, ServerError};
pub use spindle_server_config::ServerConfig;
pub use spindle_server_workspaces::ProvisioningContext;
