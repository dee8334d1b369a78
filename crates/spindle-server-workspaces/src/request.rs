// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Inbound requests and their validation.

use serde::Deserialize;
use url::Url;

use crate::error::{Result, WorkspaceError};

/// A lifecycle request as received from the RPC layer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum WorkspaceRequest {
	Create(CreateRequest),
	Start { workspace_id: i64 },
	Stop { workspace_id: i64 },
	Destroy { workspace_id: i64 },
	State { workspace_id: i64 },
}

impl WorkspaceRequest {
	pub fn workspace_id(&self) -> i64 {
		match self {
			WorkspaceRequest::Create(req) => req.workspace_id,
			WorkspaceRequest::Start { workspace_id }
			| WorkspaceRequest::Stop { workspace_id }
			| WorkspaceRequest::Destroy { workspace_id }
			| WorkspaceRequest::State { workspace_id } => *workspace_id,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateRequest {
	pub workspace_id: i64,
	pub owner_id: i64,
	pub cpu: i64,
	pub memory_gb: i64,
	pub disk_gb: i64,
	pub image: String,
	#[serde(default)]
	pub storage_class: Option<String>,
	#[serde(default)]
	pub access_url: Option<String>,
}

/// A create request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateWorkspace {
	pub workspace_id: i64,
	pub owner_id: i64,
	pub cpu: i64,
	pub memory_gb: i64,
	pub disk_gb: i64,
	pub image: String,
	pub storage_class: Option<String>,
	pub access_url: Option<Url>,
}

pub fn validate_workspace_id(id: i64) -> Result<i64> {
	if id <= 0 {
		return Err(WorkspaceError::Malformed(format!(
			"workspace_id must be positive, got {id}"
		)));
	}
	Ok(id)
}

fn positive(field: &str, value: i64) -> Result<()> {
	if value <= 0 {
		return Err(WorkspaceError::Malformed(format!(
			"{field} must be positive, got {value}"
		)));
	}
	Ok(())
}

impl CreateRequest {
	pub fn validate(self) -> Result<CreateWorkspace> {
		validate_workspace_id(self.workspace_id)?;
		positive("owner_id", self.owner_id)?;
		positive("cpu", self.cpu)?;
		positive("memory_gb", self.memory_gb)?;
		positive("disk_gb", self.disk_gb)?;

		let image = self.image.trim();
		if image.is_empty() || image.chars().any(char::is_whitespace) {
			return Err(WorkspaceError::Malformed(format!(
				"invalid container image {:?}",
				self.image
			)));
		}

		let storage_class = match self.storage_class.as_deref().map(str::trim) {
			Some("") | None => None,
			Some(class) => Some(class.to_string()),
		};

		let access_url = match self.access_url.as_deref() {
			None | Some("") => None,
			Some(raw) => {
				let url = Url::parse(raw)
					.map_err(|e| WorkspaceError::Malformed(format!("invalid access_url {raw:?}: {e}")))?;
				if !matches!(url.scheme(), "http" | "https") {
					return Err(WorkspaceError::Malformed(format!(
						"access_url must be http or https, got {}",
						url.scheme()
					)));
				}
				Some(url)
			}
		};

		Ok(CreateWorkspace {
			workspace_id: self.workspace_id,
			owner_id: self.owner_id,
			cpu: self.cpu,
			memory_gb: self.memory_gb,
			disk_gb: self.disk_gb,
			image: image.to_string(),
			storage_class,
			access_url,
		})
	}
}
