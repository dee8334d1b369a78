// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Coordination keys stored as Kubernetes ConfigMaps.
//!
//! Each key maps to one ConfigMap whose `data.value` holds the value. Object
//! creation is atomic on the API server, so `put_if_absent` is a plain create
//! that treats `409 Conflict` as "already present". `replace` sends the
//! `resourceVersion` it read, so a concurrent writer turns it into a 409.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{DeleteParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use tracing::{debug, instrument};

use crate::error::{CoordinationError, Result};
use crate::store::CoordinationStore;

const NAME_PREFIX: &str = "spindle.";
const VALUE_FIELD: &str = "value";
const KEY_ANNOTATION: &str = "spindle.dev/coordination-key";
const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const FIELD_MANAGER: &str = "spindle";
const MAX_NAME_LEN: usize = 253;

/// ConfigMap name for a coordination key. `/` becomes `.`; the result must
/// be a valid DNS subdomain.
pub fn object_name(key: &str) -> Result<String> {
	let valid = !key.is_empty()
		&& key
			.chars()
			.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '/')
		&& key
			.split('/')
			.all(|s| !s.is_empty() && !s.starts_with('-') && !s.ends_with('-'));
	let name = format!("{NAME_PREFIX}{}", key.replace('/', "."));
	if !valid || name.len() > MAX_NAME_LEN {
		return Err(CoordinationError::InvalidKey(key.to_string()));
	}
	Ok(name)
}

fn is_status(err: &kube::Error, code: u16) -> bool {
	matches!(err, kube::Error::Api(response) if response.code == code)
}

#[derive(Clone)]
pub struct ConfigMapCoordinationStore {
	api: Api<ConfigMap>,
	namespace: String,
}

impl std::fmt::Debug for ConfigMapCoordinationStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ConfigMapCoordinationStore")
			.field("namespace", &self.namespace)
			.finish_non_exhaustive()
	}
}

impl ConfigMapCoordinationStore {
	pub fn new(client: Client, namespace: impl Into<String>) -> Self {
		let namespace = namespace.into();
		Self {
			api: Api::namespaced(client, &namespace),
			namespace,
		}
	}

	/// Uses the in-cluster configuration, or the local kubeconfig.
	pub async fn try_default(namespace: impl Into<String>) -> Result<Self> {
		let client = Client::try_default().await?;
		Ok(Self::new(client, namespace))
	}

	fn config_map(name: &str, key: &str, value: &str) -> ConfigMap {
		ConfigMap {
			metadata: ObjectMeta {
				name: Some(name.to_string()),
				labels: Some(BTreeMap::from([(
					MANAGED_BY_LABEL.to_string(),
					"spindle".to_string(),
				)])),
				annotations: Some(BTreeMap::from([(KEY_ANNOTATION.to_string(), key.to_string())])),
				..Default::default()
			},
			data: Some(BTreeMap::from([(VALUE_FIELD.to_string(), value.to_string())])),
			..Default::default()
		}
	}
}

#[async_trait]
impl CoordinationStore for ConfigMapCoordinationStore {
	fn name(&self) -> &'static str {
		"kubernetes"
	}

	#[instrument(skip(self), fields(namespace = %self.namespace))]
	async fn get(&self, key: &str) -> Result<Option<String>> {
		let name = object_name(key)?;
		let config_map = self.api.get_opt(&name).await?;
		Ok(config_map
			.and_then(|cm| cm.data)
			.and_then(|mut data| data.remove(VALUE_FIELD)))
	}

	#[instrument(skip(self, value), fields(namespace = %self.namespace))]
	async fn put(&self, key: &str, value: &str) -> Result<()> {
		let name = object_name(key)?;
		let config_map = Self::config_map(&name, key, value);
		self.api
			.patch(
				&name,
				&PatchParams::apply(FIELD_MANAGER).force(),
				&Patch::Apply(&config_map),
			)
			.await?;
		Ok(())
	}

	#[instrument(skip(self, value), fields(namespace = %self.namespace))]
	async fn put_if_absent(&self, key: &str, value: &str) -> Result<bool> {
		let name = object_name(key)?;
		let config_map = Self::config_map(&name, key, value);
		match self.api.create(&PostParams::default(), &config_map).await {
			Ok(_) => Ok(true),
			Err(e) if is_status(&e, 409) => {
				debug!(key, "coordination key already present");
				Ok(false)
			}
			Err(e) => Err(e.into()),
		}
	}

	#[instrument(skip(self, value), fields(namespace = %self.namespace))]
	async fn replace(&self, key: &str, expected: &str, value: &str) -> Result<bool> {
		let name = object_name(key)?;
		let Some(current) = self.api.get_opt(&name).await? else {
			return Ok(false);
		};
		let matches = current
			.data
			.as_ref()
			.and_then(|data| data.get(VALUE_FIELD))
			.is_some_and(|v| v == expected);
		if !matches {
			return Ok(false);
		}

		let mut config_map = Self::config_map(&name, key, value);
		config_map.metadata.resource_version = current.metadata.resource_version;
		match self.api.replace(&name, &PostParams::default(), &config_map).await {
			Ok(_) => Ok(true),
			Err(e) if is_status(&e, 409) || is_status(&e, 404) => {
				debug!(key, "coordination key changed concurrently");
				Ok(false)
			}
			Err(e) => Err(e.into()),
		}
	}

	#[instrument(skip(self), fields(namespace = %self.namespace))]
	async fn delete(&self, key: &str) -> Result<()> {
		let name = object_name(key)?;
		match self.api.delete(&name, &DeleteParams::default()).await {
			Ok(_) => Ok(()),
			Err(e) if is_status(&e, 404) => Ok(()),
			Err(e) => Err(e.into()),
		}
	}
}
