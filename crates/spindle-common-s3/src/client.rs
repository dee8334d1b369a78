// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use reqwest::{Method, StatusCode};
use spindle_common_secret::SecretString;
use tracing::{debug, instrument};
use url::Url;

use crate::error::{Result, S3Error};
use crate::sign::{self, Credentials, RequestParts};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection settings for one bucket.
#[derive(Debug, Clone)]
pub struct S3Config {
	/// Base endpoint, e.g. `https://s3.eu-west-1.amazonaws.com` or `http://minio:9000`.
	pub endpoint: String,
	pub region: String,
	pub bucket: String,
	pub access_key: String,
	pub secret_key: SecretString,
	/// Address the bucket as a path segment instead of a subdomain.
	pub path_style: bool,
}

/// A resolved object location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
	pub url: Url,
	pub host: String,
	pub canonical_uri: String,
}

#[derive(Clone)]
pub struct S3Client {
	http: reqwest::Client,
	config: S3Config,
	endpoint: Url,
}

impl std::fmt::Debug for S3Client {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("S3Client")
			.field("endpoint", &self.config.endpoint)
			.field("bucket", &self.config.bucket)
			.field("region", &self.config.region)
			.finish()
	}
}

impl S3Client {
	pub fn new(config: S3Config) -> Result<Self> {
		Self::with_timeout(config, DEFAULT_TIMEOUT)
	}

	pub fn with_timeout(config: S3Config, timeout: Duration) -> Result<Self> {
		let endpoint = Url::parse(&config.endpoint)
			.map_err(|e| S3Error::InvalidEndpoint(format!("{}: {e}", config.endpoint)))?;
		if endpoint.host_str().is_none() {
			return Err(S3Error::InvalidEndpoint(config.endpoint.clone()));
		}

		let http = reqwest::Client::builder().timeout(timeout).build()?;
		Ok(Self {
			http,
			config,
			endpoint,
		})
	}

	pub fn bucket(&self) -> &str {
		&self.config.bucket
	}

	pub fn location(&self, key: &str) -> Result<ObjectLocation> {
		if key.is_empty() || key.starts_with('/') {
			return Err(S3Error::InvalidKey(key.to_string()));
		}

		let base_host = self
			.endpoint
			.host_str()
			.ok_or_else(|| S3Error::InvalidEndpoint(self.config.endpoint.clone()))?;
		let port = self.endpoint.port().map(|p| format!(":{p}")).unwrap_or_default();
		let encoded_key = sign::uri_encode(key, false);

		let (host, canonical_uri) = if self.config.path_style {
			(
				format!("{base_host}{port}"),
				format!("/{}/{encoded_key}", sign::uri_encode(&self.config.bucket, true)),
			)
		} else {
			(
				format!("{}.{base_host}{port}", self.config.bucket),
				format!("/{encoded_key}"),
			)
		};

		let url = Url::parse(&format!("{}://{host}{canonical_uri}", self.endpoint.scheme()))
			.map_err(|e| S3Error::InvalidKey(format!("{key}: {e}")))?;

		Ok(ObjectLocation {
			url,
			host,
			canonical_uri,
		})
	}

	async fn send(
		&self,
		method: Method,
		key: &str,
		body: Option<Vec<u8>>,
	) -> Result<reqwest::Response> {
		let location = self.location(key)?;
		let payload = body.as_deref().unwrap_or_default();
		let payload_hash = sign::sha256_hex(payload);

		let creds = Credentials {
			access_key: &self.config.access_key,
			secret_key: self.config.secret_key.expose(),
			region: &self.config.region,
			service: "s3",
		};
		let parts = RequestParts {
			method: method.as_str(),
			canonical_uri: &location.canonical_uri,
			canonical_query: "",
			headers: vec![("host".to_string(), location.host.clone())],
			payload_hash: &payload_hash,
		};
		let signed = sign::sign(&creds, &parts, Utc::now());

		let mut request = self
			.http
			.request(method.clone(), location.url)
			.header("authorization", signed.authorization)
			.header("x-amz-date", signed.amz_date)
			.header("x-amz-content-sha256", signed.content_sha256);
		if let Some(body) = body {
			request = request.body(body);
		}

		Ok(request.send().await?)
	}

	async fn unexpected(method: &'static str, key: &str, response: reqwest::Response) -> S3Error {
		let status = response.status().as_u16();
		let body = response.text().await.unwrap_or_default();
		S3Error::UnexpectedStatus {
			method,
			key: key.to_string(),
			status,
			body,
		}
	}

	/// Fetches an object. A missing object is `Ok(None)`.
	#[instrument(skip(self), fields(bucket = %self.config.bucket))]
	pub async fn get_object(&self, key: &str) -> Result<Option<Bytes>> {
		let response = self.send(Method::GET, key, None).await?;
		match response.status() {
			StatusCode::OK => {
				let bytes = response.bytes().await?;
				debug!(size = bytes.len(), "object fetched");
				Ok(Some(bytes))
			}
			StatusCode::NOT_FOUND => Ok(None),
			_ => Err(Self::unexpected("GET", key, response).await),
		}
	}

	#[instrument(skip(self, body), fields(bucket = %self.config.bucket, size = body.len()))]
	pub async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<()> {
		let response = self.send(Method::PUT, key, Some(body)).await?;
		if response.status().is_success() {
			Ok(())
		} else {
			Err(Self::unexpected("PUT", key, response).await)
		}
	}

	/// Deletes an object. Deleting a missing object succeeds.
	#[instrument(skip(self), fields(bucket = %self.config.bucket))]
	pub async fn delete_object(&self, key: &str) -> Result<()> {
		let response = self.send(Method::DELETE, key, None).await?;
		match response.status() {
			s if s.is_success() => Ok(()),
			StatusCode::NOT_FOUND => Ok(()),
			_ => Err(Self::unexpected("DELETE", key, response).await),
		}
	}

	#[instrument(skip(self), fields(bucket = %self.config.bucket))]
	pub async fn head_object(&self, key: &str) -> Result<bool> {
		let response = self.send(Method::HEAD, key, None).await?;
		match response.status() {
			StatusCode::OK => Ok(true),
			StatusCode::NOT_FOUND => Ok(false),
			_ => Err(Self::unexpected("HEAD", key, response).await),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn config(endpoint: &str, path_style: bool) -> S3Config {
		S3Config {
			endpoint: endpoint.to_string(),
			region: "us-east-1".to_string(),
			bucket: "spindle-state".to_string(),
			access_key: "AKID".to_string(),
			secret_key: SecretString::from("secret"),
			path_style,
		}
	}

	#[test]
	fn path_style_location() {
		let client = S3Client::new(config("http://minio:9000", true)).unwrap();
		let loc = client.location("states/42").unwrap();
		assert_eq!(loc.host, "minio:9000");
		assert_eq!(loc.canonical_uri, "/spindle-state/states/42");
		assert_eq!(loc.url.as_str(), "http://minio:9000/spindle-state/states/42");
	}

	#[test]
	fn virtual_host_location() {
		let client = S3Client::new(config("https://s3.amazonaws.com", false)).unwrap();
		let loc = client.location("modules/7").unwrap();
		assert_eq!(loc.host, "spindle-state.s3.amazonaws.com");
		assert_eq!(loc.canonical_uri, "/modules/7");
		assert_eq!(
			loc.url.as_str(),
			"https://spindle-state.s3.amazonaws.com/modules/7"
		);
	}

	#[test]
	fn key_is_percent_encoded() {
		let client = S3Client::new(config("http://minio:9000", true)).unwrap();
		let loc = client.location("states/a b").unwrap();
		assert_eq!(loc.canonical_uri, "/spindle-state/states/a%20b");
	}

	#[test]
	fn rejects_empty_and_absolute_keys() {
		let client = S3Client::new(config("http://minio:9000", true)).unwrap();
		assert!(matches!(client.location(""), Err(S3Error::InvalidKey(_))));
		assert!(matches!(
			client.location("/states/1"),
			Err(S3Error::InvalidKey(_))
		));
	}

	#[test]
	fn rejects_invalid_endpoint() {
		let result = S3Client::new(config("not a url", true));
		assert!(matches!(result, Err(S3Error::InvalidEndpoint(_))));
	}

	#[test]
	fn debug_does_not_include_secret() {
		let client = S3Client::new(config("http://minio:9000", true)).unwrap();
		let out = format!("{client:?}");
		assert!(out.contains("spindle-state"));
		assert!(!out.contains("secret\""));
	}
}
