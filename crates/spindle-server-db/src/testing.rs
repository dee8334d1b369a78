// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Test helpers for crates that exercise the pool tables.

use std::path::Path;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::{create_pool, run_migrations, ConnectSettings};

/// In-memory database with the pool schema. A single connection keeps every
/// query on the same in-memory database.
pub async fn create_test_pool() -> SqlitePool {
	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.connect("sqlite::memory:")
		.await
		.unwrap();
	run_migrations(&pool).await.unwrap();
	pool
}

/// File-backed database under `dir`, for tests that need real concurrent
/// connections.
pub async fn create_file_test_pool(dir: &Path) -> SqlitePool {
	let url = format!("sqlite:{}", dir.join("spindle.db").display());
	let pool = create_pool(&url, ConnectSettings::default()).await.unwrap();
	run_migrations(&pool).await.unwrap();
	pool
}
