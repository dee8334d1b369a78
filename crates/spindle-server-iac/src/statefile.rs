// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Interpretation of the IaC engine's statefile.
//!
//! The statefile is the single source of truth for whether a workspace
//! exists. A missing statefile and a statefile without the workspace resource
//! are indistinguishable on purpose: both mean `Destroyed`.

use serde::Deserialize;
use serde_json::Value;
use spindle_common_secret::SecretString;
use tracing::{debug, instrument};

use crate::backend::{state_path, StateBackend};
use crate::error::{IacError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Statefile {
	pub resources: Vec<StateResource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateResource {
	#[serde(rename = "type")]
	pub resource_type: String,
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub instances: Vec<StateInstance>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateInstance {
	#[serde(default)]
	pub attributes: Value,
}

impl Statefile {
	/// Parses a statefile. A missing or non-array `resources` is an error.
	pub fn parse(bytes: &[u8]) -> Result<Self> {
		serde_json::from_slice(bytes).map_err(|e| IacError::StatefileParse(e.to_string()))
	}

	/// The first instance of the first resource of `resource_type`, in file
	/// order. Resources without instances are skipped.
	pub fn find_first_instance(&self, resource_type: &str) -> Option<&StateInstance> {
		self.resources
			.iter()
			.filter(|r| r.resource_type == resource_type)
			.find_map(|r| r.instances.first())
	}
}

impl StateInstance {
	/// Looks up a dotted attribute path. Numeric segments index arrays.
	pub fn attribute(&self, path: &str) -> Option<&Value> {
		path.split('.').try_fold(&self.attributes, |value, segment| match value {
			Value::Object(map) => map.get(segment),
			Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
			_ => None,
		})
	}
}

/// Coarse lifecycle state derived from the statefile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceState {
	Active,
	Stopped,
	Destroyed,
}

impl WorkspaceState {
	pub fn as_str(&self) -> &'static str {
		match self {
			WorkspaceState::Active => "active",
			WorkspaceState::Stopped => "stopped",
			WorkspaceState::Destroyed => "destroyed",
		}
	}
}

impl std::fmt::Display for WorkspaceState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Agent identity reported by a provisioned workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInfo {
	pub id: i64,
	pub token: SecretString,
}

async fn load(backend: &dyn StateBackend, id: i64) -> Result<Option<Statefile>> {
	match backend.get_statefile(&state_path(id)).await? {
		Some(bytes) => Statefile::parse(&bytes).map(Some),
		None => Ok(None),
	}
}

/// Derives the workspace state from the `start_count` of the first instance
/// of `resource_type`.
#[instrument(skip(backend), fields(backend = backend.name()))]
pub async fn read_workspace_state(
	backend: &dyn StateBackend,
	id: i64,
	resource_type: &str,
) -> Result<WorkspaceState> {
	let Some(statefile) = load(backend, id).await? else {
		debug!(id, "no statefile");
		return Ok(WorkspaceState::Destroyed);
	};
	let Some(instance) = statefile.find_first_instance(resource_type) else {
		debug!(id, resource_type, "no matching resource in statefile");
		return Ok(WorkspaceState::Destroyed);
	};

	let start_count = instance
		.attribute("start_count")
		.and_then(Value::as_i64)
		.ok_or_else(|| {
			IacError::StatefileParse(format!(
				"{resource_type} in statefile for {id} has no integer start_count"
			))
		})?;

	match start_count {
		n if n > 0 => Ok(WorkspaceState::Active),
		0 => Ok(WorkspaceState::Stopped),
		n => Err(IacError::StatefileParse(format!(
			"{resource_type} in statefile for {id} has negative start_count {n}"
		))),
	}
}

/// Reads the agent id and token from the first instance of `resource_type`.
#[instrument(skip(backend), fields(backend = backend.name()))]
pub async fn read_agent(backend: &dyn StateBackend, id: i64, resource_type: &str) -> Result<AgentInfo> {
	let statefile = load(backend, id)
		.await?
		.ok_or_else(|| IacError::NotFound(format!("statefile for {id}")))?;
	let instance = statefile
		.find_first_instance(resource_type)
		.ok_or_else(|| IacError::NotFound(format!("{resource_type} in statefile for {id}")))?;

	let agent_id = match instance.attribute("id") {
		Some(Value::String(s)) => s.parse::<i64>().map_err(|e| {
			IacError::StatefileParse(format!("agent id {s:?} for {id} is not an integer: {e}"))
		})?,
		Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
			IacError::StatefileParse(format!("agent id {n} for {id} is out of range"))
		})?,
		_ => {
			return Err(IacError::StatefileParse(format!(
				"{resource_type} in statefile for {id} has no id"
			)))
		}
	};

	let token = instance
		.attribute("token")
		.and_then(Value::as_str)
		.ok_or_else(|| {
			IacError::StatefileParse(format!("{resource_type} in statefile for {id} has no token"))
		})?;

	Ok(AgentInfo {
		id: agent_id,
		token: SecretString::from(token),
	})
}
