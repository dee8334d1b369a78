// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};

use crate::error::DbError;

/// Connection settings for the pool bookkeeping database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectSettings {
	pub max_connections: u32,
	/// Claims and reconcile inserts from both pools contend for the single
	/// SQLite writer; this is how long one waits before `SQLITE_BUSY`.
	pub busy_timeout: Duration,
}

impl Default for ConnectSettings {
	fn default() -> Self {
		Self {
			max_connections: 8,
			busy_timeout: Duration::from_secs(30),
		}
	}
}

/// Opens the database in WAL mode so readers never block the writer.
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(database_url: &str, settings: ConnectSettings) -> Result<SqlitePool, DbError> {
	if settings.max_connections == 0 {
		return Err(DbError::Internal("max_connections must be at least 1".to_string()));
	}
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| DbError::Internal(format!("Invalid database URL: {e}")))?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.busy_timeout(settings.busy_timeout)
		.create_if_missing(true);

	let pool = SqlitePoolOptions::new()
		.max_connections(settings.max_connections)
		.connect_with(options)
		.await?;

	tracing::debug!(max_connections = settings.max_connections, "database pool created");
	Ok(pool)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[tokio::test]
	async fn test_file_database_uses_wal_and_settings() {
		let dir = TempDir::new().unwrap();
		let url = format!("sqlite:{}", dir.path().join("pool.db").display());
		let settings = ConnectSettings {
			max_connections: 3,
			busy_timeout: Duration::from_secs(2),
		};

		let pool = create_pool(&url, settings).await.unwrap();
		assert_eq!(pool.options().get_max_connections(), 3);

		let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
			.fetch_one(&pool)
			.await
			.unwrap();
		assert_eq!(mode, "wal");
		let timeout_ms: i64 = sqlx::query_scalar("PRAGMA busy_timeout")
			.fetch_one(&pool)
			.await
			.unwrap();
		assert_eq!(timeout_ms, 2000);
	}

	#[tokio::test]
	async fn test_zero_connections_is_rejected() {
		let settings = ConnectSettings {
			max_connections: 0,
			..Default::default()
		};
		let err = create_pool("sqlite::memory:", settings).await.unwrap_err();
		assert!(matches!(err, DbError::Internal(_)));
	}

	#[tokio::test]
	async fn test_invalid_url_is_rejected() {
		let err = create_pool("postgres://localhost/spindle", ConnectSettings::default())
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::Internal(_)));
	}
}
