// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod pool_reconcile;

pub use pool_reconcile::{PoolReconcileJob, VOLUME_RECONCILE_JOB, WORKSPACE_RECONCILE_JOB};
