// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::resource_pool::{PoolKind, SqliteQuery};

/// Sizing descriptor for a pooled persistent volume.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeShape {
	pub disk_gb: i64,
	pub storage_class: String,
}

/// The `volpool_volume` table. Volumes carry no provision-time payload.
#[derive(Debug, Clone, Copy)]
pub struct VolumeKind;

impl PoolKind for VolumeKind {
	type Shape = VolumeShape;
	type Payload = ();

	const NAME: &'static str = "volume";
	const TABLE: &'static str = "volpool_volume";
	const SHAPE_COLUMNS: &'static [&'static str] = &["disk_gb", "storage_class"];
	const PAYLOAD_COLUMNS: &'static [&'static str] = &[];

	fn bind_shape<'q>(query: SqliteQuery<'q>, shape: &VolumeShape) -> SqliteQuery<'q> {
		query.bind(shape.disk_gb).bind(shape.storage_class.clone())
	}

	fn bind_payload<'q>(query: SqliteQuery<'q>, _payload: &()) -> SqliteQuery<'q> {
		query
	}

	fn decode_shape(row: &SqliteRow) -> Result<VolumeShape, sqlx::Error> {
		Ok(VolumeShape {
			disk_gb: row.try_get("disk_gb")?,
			storage_class: row.try_get("storage_class")?,
		})
	}

	fn decode_payload(_row: &SqliteRow) -> Result<(), sqlx::Error> {
		Ok(())
	}
}
