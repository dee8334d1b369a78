// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Minimal S3-compatible object client.
//!
//! Spindle only needs four object operations (get, put, delete, head) against
//! a single bucket, for both persisted modules and IaC statefiles. Requests are
//! signed with AWS Signature Version 4 so the client works against AWS S3,
//! MinIO, Ceph RGW and similar stores.

pub mod client;
pub mod error;
pub mod sign;

pub use client::{S3Client, S3Config};
pub use error::{Result, S3Error};
