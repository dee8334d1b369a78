// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Generic repository over a pool table.

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

use chrono::{SecondsFormat, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::error::{DbError, Result};

pub type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Table-specific half of a pool: which columns describe a resource's shape
/// and which carry data captured at provision time.
pub trait PoolKind: fmt::Debug + Clone + Send + Sync + 'static {
	type Shape: fmt::Debug + Clone + PartialEq + Eq + Hash + Send + Sync + 'static;
	type Payload: fmt::Debug + Clone + Send + Sync + 'static;

	/// Short name used in logs ("volume", "workspace").
	const NAME: &'static str;
	const TABLE: &'static str;
	const SHAPE_COLUMNS: &'static [&'static str];
	const PAYLOAD_COLUMNS: &'static [&'static str];

	/// Binds the shape values in `SHAPE_COLUMNS` order.
	fn bind_shape<'q>(query: SqliteQuery<'q>, shape: &Self::Shape) -> SqliteQuery<'q>;

	/// Binds the payload values in `PAYLOAD_COLUMNS` order.
	fn bind_payload<'q>(query: SqliteQuery<'q>, payload: &Self::Payload) -> SqliteQuery<'q>;

	fn decode_shape(row: &SqliteRow) -> std::result::Result<Self::Shape, sqlx::Error>;

	fn decode_payload(row: &SqliteRow) -> std::result::Result<Self::Payload, sqlx::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
	Available,
	InUse,
	/// Out of inventory with a teardown still owed. Never claimable.
	Draining,
}

impl PoolState {
	pub fn as_str(&self) -> &'static str {
		match self {
			PoolState::Available => "available",
			PoolState::InUse => "in_use",
			PoolState::Draining => "draining",
		}
	}
}

impl std::str::FromStr for PoolState {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"available" => Ok(PoolState::Available),
			"in_use" => Ok(PoolState::InUse),
			"draining" => Ok(PoolState::Draining),
			_ => Err(format!("unknown pool state: {s}")),
		}
	}
}

#[derive(Debug, Clone)]
pub struct PooledResource<K: PoolKind> {
	pub id: i64,
	pub shape: K::Shape,
	pub payload: K::Payload,
	pub state: PoolState,
	pub owner_workspace_id: Option<i64>,
}

/// Row counts per state for one shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatusRow<S> {
	pub shape: S,
	pub available: i64,
	pub in_use: i64,
	pub draining: i64,
}

pub struct PoolRepository<K: PoolKind> {
	pool: SqlitePool,
	_kind: PhantomData<K>,
}

impl<K: PoolKind> Clone for PoolRepository<K> {
	fn clone(&self) -> Self {
		Self {
			pool: self.pool.clone(),
			_kind: PhantomData,
		}
	}
}

fn shape_predicate<K: PoolKind>() -> String {
	K::SHAPE_COLUMNS
		.iter()
		.map(|c| format!("{c} = ?"))
		.collect::<Vec<_>>()
		.join(" AND ")
}

fn row_columns<K: PoolKind>() -> String {
	let mut columns = vec!["id"];
	columns.extend_from_slice(K::SHAPE_COLUMNS);
	columns.extend_from_slice(&["state", "owner_workspace_id"]);
	columns.extend_from_slice(K::PAYLOAD_COLUMNS);
	columns.join(", ")
}

fn decode_row<K: PoolKind>(row: &SqliteRow) -> Result<PooledResource<K>> {
	let state: String = row.try_get("state")?;
	Ok(PooledResource {
		id: row.try_get("id")?,
		shape: K::decode_shape(row)?,
		payload: K::decode_payload(row)?,
		state: state.parse().map_err(DbError::Internal)?,
		owner_workspace_id: row.try_get("owner_workspace_id")?,
	})
}

fn now() -> String {
	Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl<K: PoolKind> PoolRepository<K> {
	pub fn new(pool: SqlitePool) -> Self {
		Self {
			pool,
			_kind: PhantomData,
		}
	}

	/// Moves one available row of `shape` to in-use for `owner`.
	///
	/// The select and the state flip are one conditional UPDATE, so SQLite's
	/// write lock serializes concurrent claimers and no two callers can ever
	/// observe the same row. `None` means no inventory for this shape.
	#[tracing::instrument(skip(self), fields(kind = K::NAME))]
	pub async fn claim(&self, shape: &K::Shape, owner: i64) -> Result<Option<PooledResource<K>>> {
		let sql = format!(
			"UPDATE {table} SET state = 'in_use', owner_workspace_id = ? \
			 WHERE id = (SELECT id FROM {table} WHERE state = 'available' AND {pred} \
			             ORDER BY created_at, id LIMIT 1) \
			 AND state = 'available' \
			 RETURNING {cols}",
			table = K::TABLE,
			pred = shape_predicate::<K>(),
			cols = row_columns::<K>(),
		);

		let mut tx = self.pool.begin().await?;
		let row = K::bind_shape(sqlx::query(&sql).bind(owner), shape)
			.fetch_optional(&mut *tx)
			.await?;
		tx.commit().await?;

		let claimed = row.as_ref().map(decode_row::<K>).transpose()?;
		match &claimed {
			Some(resource) => tracing::debug!(id = resource.id, owner, "claimed pooled resource"),
			None => tracing::debug!(owner, "no pooled resource available"),
		}
		Ok(claimed)
	}

	/// Returns an in-use row to the available set. Only valid before the
	/// resource has been exposed to user activity.
	#[tracing::instrument(skip(self), fields(kind = K::NAME))]
	pub async fn release(&self, id: i64) -> Result<()> {
		let sql = format!(
			"UPDATE {} SET state = 'available', owner_workspace_id = NULL \
			 WHERE id = ? AND state = 'in_use'",
			K::TABLE
		);
		let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("in-use {} {id}", K::NAME)));
		}
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(kind = K::NAME))]
	pub async fn get(&self, id: i64) -> Result<Option<PooledResource<K>>> {
		let sql = format!("SELECT {} FROM {} WHERE id = ?", row_columns::<K>(), K::TABLE);
		let row = sqlx::query(&sql)
			.bind(id)
			.fetch_optional(&self.pool)
			.await?;
		row.as_ref().map(decode_row::<K>).transpose()
	}

	#[tracing::instrument(skip(self), fields(kind = K::NAME))]
	pub async fn list_by_owner(&self, owner: i64) -> Result<Vec<PooledResource<K>>> {
		let sql = format!(
			"SELECT {} FROM {} WHERE owner_workspace_id = ? ORDER BY id",
			row_columns::<K>(),
			K::TABLE
		);
		let rows = sqlx::query(&sql).bind(owner).fetch_all(&self.pool).await?;
		rows.iter().map(decode_row::<K>).collect()
	}

	#[tracing::instrument(skip(self), fields(kind = K::NAME))]
	pub async fn count_available(&self, shape: &K::Shape) -> Result<i64> {
		let sql = format!(
			"SELECT COUNT(*) FROM {} WHERE state = 'available' AND {}",
			K::TABLE,
			shape_predicate::<K>()
		);
		let row = K::bind_shape(sqlx::query(&sql), shape)
			.fetch_one(&self.pool)
			.await?;
		Ok(row.try_get(0)?)
	}

	/// Removes up to `limit` available rows of `shape` and returns them.
	///
	/// Deleting before teardown keeps a concurrent claim from handing out a
	/// resource that is about to be destroyed.
	#[tracing::instrument(skip(self), fields(kind = K::NAME))]
	pub async fn take_available(&self, shape: &K::Shape, limit: i64) -> Result<Vec<PooledResource<K>>> {
		let sql = format!(
			"DELETE FROM {table} WHERE id IN (\
			   SELECT id FROM {table} WHERE state = 'available' AND {pred} \
			   ORDER BY created_at DESC, id DESC LIMIT ?) \
			 RETURNING {cols}",
			table = K::TABLE,
			pred = shape_predicate::<K>(),
			cols = row_columns::<K>(),
		);

		let mut tx = self.pool.begin().await?;
		let rows = K::bind_shape(sqlx::query(&sql), shape)
			.bind(limit)
			.fetch_all(&mut *tx)
			.await?;
		tx.commit().await?;

		rows.iter().map(decode_row::<K>).collect()
	}

	/// Removes up to `limit` draining rows of any shape and returns them, so
	/// exactly one caller retries each owed teardown.
	#[tracing::instrument(skip(self), fields(kind = K::NAME))]
	pub async fn take_draining(&self, limit: i64) -> Result<Vec<PooledResource<K>>> {
		let sql = format!(
			"DELETE FROM {table} WHERE id IN (\
			   SELECT id FROM {table} WHERE state = 'draining' \
			   ORDER BY created_at, id LIMIT ?) \
			 RETURNING {cols}",
			table = K::TABLE,
			cols = row_columns::<K>(),
		);

		let mut tx = self.pool.begin().await?;
		let rows = sqlx::query(&sql).bind(limit).fetch_all(&mut *tx).await?;
		tx.commit().await?;

		rows.iter().map(decode_row::<K>).collect()
	}

	#[tracing::instrument(skip(self, payload), fields(kind = K::NAME))]
	pub async fn insert_available(&self, id: i64, shape: &K::Shape, payload: &K::Payload) -> Result<()> {
		self.insert(id, shape, payload, PoolState::Available).await
	}

	/// Records a resource whose teardown failed. The row stays out of the
	/// claimable set until [`PoolRepository::take_draining`] picks it up.
	#[tracing::instrument(skip(self, payload), fields(kind = K::NAME))]
	pub async fn insert_draining(&self, id: i64, shape: &K::Shape, payload: &K::Payload) -> Result<()> {
		self.insert(id, shape, payload, PoolState::Draining).await
	}

	async fn insert(&self, id: i64, shape: &K::Shape, payload: &K::Payload, state: PoolState) -> Result<()> {
		let mut columns = vec!["id"];
		columns.extend_from_slice(K::SHAPE_COLUMNS);
		columns.extend_from_slice(K::PAYLOAD_COLUMNS);
		let placeholders = vec!["?"; columns.len()].join(", ");

		let sql = format!(
			"INSERT INTO {} ({}, state, owner_workspace_id, created_at) \
			 VALUES ({placeholders}, ?, NULL, ?)",
			K::TABLE,
			columns.join(", "),
		);

		let query = K::bind_shape(sqlx::query(&sql).bind(id), shape);
		let result = K::bind_payload(query, payload)
			.bind(state.as_str())
			.bind(now())
			.execute(&self.pool)
			.await;

		match result {
			Ok(_) => Ok(()),
			Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
				Err(DbError::Conflict(format!("{} {id} already exists", K::NAME)))
			}
			Err(e) => Err(e.into()),
		}
	}

	/// Deletes a row regardless of state. Returns whether a row existed.
	#[tracing::instrument(skip(self), fields(kind = K::NAME))]
	pub async fn delete(&self, id: i64) -> Result<bool> {
		let sql = format!("DELETE FROM {} WHERE id = ?", K::TABLE);
		let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
		Ok(result.rows_affected() > 0)
	}

	/// Per-shape counts for every state.
	#[tracing::instrument(skip(self), fields(kind = K::NAME))]
	pub async fn status(&self) -> Result<Vec<PoolStatusRow<K::Shape>>> {
		let shape_cols = K::SHAPE_COLUMNS.join(", ");
		let sql = format!(
			"SELECT {shape_cols}, \
			   SUM(CASE WHEN state = 'available' THEN 1 ELSE 0 END) AS available, \
			   SUM(CASE WHEN state = 'in_use' THEN 1 ELSE 0 END) AS in_use, \
			   SUM(CASE WHEN state = 'draining' THEN 1 ELSE 0 END) AS draining \
			 FROM {} GROUP BY {shape_cols} ORDER BY {shape_cols}",
			K::TABLE
		);
		let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

		rows
			.iter()
			.map(|row| -> Result<PoolStatusRow<K::Shape>> {
				Ok(PoolStatusRow {
					shape: K::decode_shape(row)?,
					available: row.try_get("available")?,
					in_use: row.try_get("in_use")?,
					draining: row.try_get("draining")?,
				})
			})
			.collect()
	}
}
