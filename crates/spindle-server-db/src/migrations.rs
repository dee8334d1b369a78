// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Schema for the pool tables.
//!
//! The CHECK constraints encode the ownership invariant: an `in_use` row always
//! has an owner and no other row does. `draining` rows are out of inventory
//! and wait for a teardown retry.

use sqlx::SqlitePool;

use crate::error::Result;

const STATEMENTS: &[&str] = &[
	r#"
	CREATE TABLE IF NOT EXISTS volpool_volume (
		id INTEGER PRIMARY KEY NOT NULL,
		disk_gb INTEGER NOT NULL,
		storage_class TEXT NOT NULL,
		state TEXT NOT NULL CHECK (state IN ('available', 'in_use', 'draining')),
		owner_workspace_id INTEGER,
		created_at TEXT NOT NULL,
		CHECK ((state = 'in_use') = (owner_workspace_id IS NOT NULL))
	)
	"#,
	r#"
	CREATE INDEX IF NOT EXISTS idx_volpool_volume_shape
		ON volpool_volume (state, disk_gb, storage_class)
	"#,
	r#"
	CREATE INDEX IF NOT EXISTS idx_volpool_volume_owner
		ON volpool_volume (owner_workspace_id)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS workspace_pool (
		id INTEGER PRIMARY KEY NOT NULL,
		image TEXT NOT NULL,
		cpu INTEGER NOT NULL,
		memory_gb INTEGER NOT NULL,
		disk_gb INTEGER NOT NULL,
		storage_class TEXT NOT NULL,
		state TEXT NOT NULL CHECK (state IN ('available', 'in_use', 'draining')),
		owner_workspace_id INTEGER,
		agent_id INTEGER NOT NULL,
		agent_token TEXT NOT NULL,
		created_at TEXT NOT NULL,
		CHECK ((state = 'in_use') = (owner_workspace_id IS NOT NULL))
	)
	"#,
	r#"
	CREATE INDEX IF NOT EXISTS idx_workspace_pool_shape
		ON workspace_pool (state, image, cpu, memory_gb, disk_gb, storage_class)
	"#,
	r#"
	CREATE INDEX IF NOT EXISTS idx_workspace_pool_owner
		ON workspace_pool (owner_workspace_id)
	"#,
];

/// Creates the pool tables if they do not exist yet.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
	for statement in STATEMENTS {
		sqlx::query(statement).execute(pool).await?;
	}
	tracing::debug!(statements = STATEMENTS.len(), "pool schema ready");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;

	#[tokio::test]
	async fn test_migrations_are_idempotent() {
		let pool = create_test_pool().await;
		run_migrations(&pool).await.unwrap();
		run_migrations(&pool).await.unwrap();
	}

	#[tokio::test]
	async fn test_in_use_row_requires_owner() {
		let pool = create_test_pool().await;
		let result = sqlx::query(
			"INSERT INTO volpool_volume (id, disk_gb, storage_class, state, owner_workspace_id, created_at)
			 VALUES (1, 10, 'standard', 'in_use', NULL, '2025-01-01T00:00:00Z')",
		)
		.execute(&pool)
		.await;
		assert!(result.is_err());
	}

	#[tokio::test]
	async fn test_available_row_rejects_owner() {
		let pool = create_test_pool().await;
		let result = sqlx::query(
			"INSERT INTO volpool_volume (id, disk_gb, storage_class, state, owner_workspace_id, created_at)
			 VALUES (1, 10, 'standard', 'available', 42, '2025-01-01T00:00:00Z')",
		)
		.execute(&pool)
		.await;
		assert!(result.is_err());
	}
}
