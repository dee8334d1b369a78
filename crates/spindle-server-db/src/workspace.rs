// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};
use spindle_common_secret::SecretString;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::resource_pool::{PoolKind, SqliteQuery};

/// Sizing descriptor for a warm workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceShape {
	pub image: String,
	pub cpu: i64,
	pub memory_gb: i64,
	pub disk_gb: i64,
	pub storage_class: String,
}

/// Agent identity captured from the statefile when a workspace is provisioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCredentials {
	pub agent_id: i64,
	pub token: SecretString,
}

/// The `workspace_pool` table.
#[derive(Debug, Clone, Copy)]
pub struct WorkspaceKind;

impl PoolKind for WorkspaceKind {
	type Shape = WorkspaceShape;
	type Payload = AgentCredentials;

	const NAME: &'static str = "workspace";
	const TABLE: &'static str = "workspace_pool";
	const SHAPE_COLUMNS: &'static [&'static str] =
		&["image", "cpu", "memory_gb", "disk_gb", "storage_class"];
	const PAYLOAD_COLUMNS: &'static [&'static str] = &["agent_id", "agent_token"];

	fn bind_shape<'q>(query: SqliteQuery<'q>, shape: &WorkspaceShape) -> SqliteQuery<'q> {
		query
			.bind(shape.image.clone())
			.bind(shape.cpu)
			.bind(shape.memory_gb)
			.bind(shape.disk_gb)
			.bind(shape.storage_class.clone())
	}

	fn bind_payload<'q>(query: SqliteQuery<'q>, payload: &AgentCredentials) -> SqliteQuery<'q> {
		query
			.bind(payload.agent_id)
			.bind(payload.token.expose().clone())
	}

	fn decode_shape(row: &SqliteRow) -> Result<WorkspaceShape, sqlx::Error> {
		Ok(WorkspaceShape {
			image: row.try_get("image")?,
			cpu: row.try_get("cpu")?,
			memory_gb: row.try_get("memory_gb")?,
			disk_gb: row.try_get("disk_gb")?,
			storage_class: row.try_get("storage_class")?,
		})
	}

	fn decode_payload(row: &SqliteRow) -> Result<AgentCredentials, sqlx::Error> {
		let token: String = row.try_get("agent_token")?;
		Ok(AgentCredentials {
			agent_id: row.try_get("agent_id")?,
			token: SecretString::new(token),
		})
	}
}
