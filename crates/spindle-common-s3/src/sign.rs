// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! AWS Signature Version 4 request signing.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Hex-encoded SHA-256 of a request payload.
pub fn sha256_hex(data: &[u8]) -> String {
	hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
	let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
	mac.update(data);
	mac.finalize().into_bytes().to_vec()
}

/// Percent-encodes a string per the SigV4 rules (RFC 3986 unreserved set).
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
	let mut out = String::with_capacity(input.len());
	for byte in input.bytes() {
		match byte {
			b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
			b'/' if !encode_slash => out.push('/'),
			_ => out.push_str(&format!("%{byte:02X}")),
		}
	}
	out
}

/// Derives the per-day signing key.
pub fn signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
	let k_date = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.as_bytes());
	let k_region = hmac_sha256(&k_date, region.as_bytes());
	let k_service = hmac_sha256(&k_region, service.as_bytes());
	hmac_sha256(&k_service, b"aws4_request")
}

/// Inputs that identify who is signing and where.
#[derive(Debug, Clone)]
pub struct Credentials<'a> {
	pub access_key: &'a str,
	pub secret_key: &'a str,
	pub region: &'a str,
	pub service: &'a str,
}

/// The request being signed. `headers` must not include the `x-amz-*`
/// headers added by [`sign`]; `host` is required.
#[derive(Debug, Clone)]
pub struct RequestParts<'a> {
	pub method: &'a str,
	pub canonical_uri: &'a str,
	pub canonical_query: &'a str,
	pub headers: Vec<(String, String)>,
	pub payload_hash: &'a str,
}

/// Headers to attach to the outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
	pub authorization: String,
	pub amz_date: String,
	pub content_sha256: String,
}

pub fn canonical_request(parts: &RequestParts<'_>, headers: &[(String, String)]) -> String {
	let canonical_headers: String = headers
		.iter()
		.map(|(name, value)| format!("{name}:{}\n", value.trim()))
		.collect();
	let signed_headers = signed_header_names(headers);

	format!(
		"{}\n{}\n{}\n{}\n{}\n{}",
		parts.method,
		parts.canonical_uri,
		parts.canonical_query,
		canonical_headers,
		signed_headers,
		parts.payload_hash
	)
}

fn signed_header_names(headers: &[(String, String)]) -> String {
	headers
		.iter()
		.map(|(name, _)| name.as_str())
		.collect::<Vec<_>>()
		.join(";")
}

/// Signs a request at `now`.
pub fn sign(creds: &Credentials<'_>, parts: &RequestParts<'_>, now: DateTime<Utc>) -> SignedRequest {
	let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
	let date = now.format("%Y%m%d").to_string();

	let mut headers: Vec<(String, String)> = parts
		.headers
		.iter()
		.map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
		.collect();
	headers.push(("x-amz-content-sha256".to_string(), parts.payload_hash.to_string()));
	headers.push(("x-amz-date".to_string(), amz_date.clone()));
	headers.sort_by(|a, b| a.0.cmp(&b.0));

	let canonical = canonical_request(parts, &headers);
	let scope = format!("{date}/{}/{}/aws4_request", creds.region, creds.service);
	let string_to_sign = format!(
		"{ALGORITHM}\n{amz_date}\n{scope}\n{}",
		sha256_hex(canonical.as_bytes())
	);

	let key = signing_key(creds.secret_key, &date, creds.region, creds.service);
	let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

	SignedRequest {
		authorization: format!(
			"{ALGORITHM} Credential={}/{scope}, SignedHeaders={}, Signature={signature}",
			creds.access_key,
			signed_header_names(&headers)
		),
		amz_date,
		content_sha256: parts.payload_hash.to_string(),
	}
}
