// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Command-line interface for `spindle-server`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use spindle_server_workspaces::{CreateRequest, Outcome, WorkspaceRequest};

/// Spindle server - workspace provisioning over an IaC engine.
#[derive(Parser, Debug)]
#[command(name = "spindle-server", about = "Spindle workspace provisioning server", version)]
pub struct Args {
	/// Config file to read instead of /etc/spindle/server.toml
	#[arg(long, global = true, env = "SPINDLE_SERVER_CONFIG")]
	pub config: Option<PathBuf>,

	/// Defaults to `serve`
	#[command(subcommand)]
	pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
	/// Run the pool reconcile jobs until interrupted
	Serve,
	/// Show version and build information
	Version,
	/// Render every template with sample values and validate it with the engine
	CheckTemplates,
	/// Run one reconcile pass for a pool
	Reconcile {
		#[arg(value_enum)]
		pool: PoolTarget,
	},
	/// Show available, in-use and draining counts per pool bucket
	Status,
	/// Drive a workspace lifecycle operation
	Workspace {
		/// Abandon the operation after this many seconds
		#[arg(long, default_value_t = 1800)]
		timeout_secs: u64,

		#[command(subcommand)]
		command: WorkspaceCommand,
	},
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolTarget {
	Volumes,
	Workspaces,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum WorkspaceCommand {
	Create {
		#[arg(long)]
		id: i64,
		#[arg(long)]
		owner: i64,
		#[arg(long)]
		cpu: i64,
		#[arg(long)]
		memory_gb: i64,
		#[arg(long)]
		disk_gb: i64,
		#[arg(long)]
		image: String,
		#[arg(long)]
		storage_class: Option<String>,
		#[arg(long)]
		access_url: Option<String>,
	},
	Start {
		id: i64,
	},
	Stop {
		id: i64,
	},
	Destroy {
		id: i64,
	},
	State {
		id: i64,
	},
}

impl WorkspaceCommand {
	pub fn into_request(self) -> WorkspaceRequest {
		match self {
			WorkspaceCommand::Create {
				id,
				owner,
				cpu,
				memory_gb,
				disk_gb,
				image,
				storage_class,
				access_url,
			} => WorkspaceRequest::Create(CreateRequest {
				workspace_id: id,
				owner_id: owner,
				cpu,
				memory_gb,
				disk_gb,
				image,
				storage_class,
				access_url,
			}),
			WorkspaceCommand::Start { id } => WorkspaceRequest::Start { workspace_id: id },
			WorkspaceCommand::Stop { id } => WorkspaceRequest::Stop { workspace_id: id },
			WorkspaceCommand::Destroy { id } => WorkspaceRequest::Destroy { workspace_id: id },
			WorkspaceCommand::State { id } => WorkspaceRequest::State { workspace_id: id },
		}
	}
}

/// Operator-facing rendering of an outcome. Agent tokens are left out.
pub fn outcome_json(outcome: &Outcome) -> Value {
	let result = outcome.result.as_ref().map(|r| {
		json!({
			"workspace_id": r.workspace_id,
			"state": r.state.as_str(),
			"agent_id": r.agent.as_ref().map(|a| a.id),
			"volume_id": r.volume_id,
			"log_entries": r.log.len(),
			"log_errors": r.log.errors().count(),
		})
	});
	json!({
		"kind": outcome.kind,
		"conflict": outcome.conflict,
		"message": outcome.message,
		"result": result,
	})
}
