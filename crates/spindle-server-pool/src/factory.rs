// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt::Display;
use std::future::Future;
use std::ops::Range;

use async_trait::async_trait;
use spindle_server_db::PoolKind;
use spindle_server_iac::{state_path, IacError, Module, ModuleStore, Provisioner, Transition};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// Pool-generated ids never collide with caller-assigned workspace ids below
/// 2^32 and stay exact in an IEEE double.
pub const RESOURCE_ID_RANGE: Range<i64> = (1 << 32)..(1 << 53);

pub fn new_resource_id() -> i64 {
	fastrand::i64(RESOURCE_ID_RANGE)
}

/// Creates and tears down the infrastructure behind one pool.
#[async_trait]
pub trait ResourceFactory<K: PoolKind>: Send + Sync {
	/// Provisions resource `id` with the given shape and returns the data
	/// stored alongside its row.
	async fn provision(&self, id: i64, shape: &K::Shape, cancel: &CancellationToken) -> Result<K::Payload>;

	/// Destroys resource `id` and everything persisted for it.
	async fn teardown(&self, id: i64, cancel: &CancellationToken) -> Result<()>;
}

/// Awaits a cleanup step whose failure must not replace the caller's error.
/// Failures are logged at warn and swallowed.
pub async fn best_effort<T, E, F>(action: &str, step: F) -> Option<T>
where
	E: Display,
	F: Future<Output = std::result::Result<T, E>>,
{
	match step.await {
		Ok(value) => Some(value),
		Err(e) => {
			warn!(action, error = %e, "best-effort cleanup failed");
			None
		}
	}
}

/// Destroys `module` as a compensating action under a fresh cancellation
/// scope. Returns whether the infrastructure is gone; a destroy that committed
/// with an unreadable log counts. A failure is logged and swallowed.
pub async fn compensating_destroy(provisioner: &Provisioner, module: &mut Module, action: &str) -> bool {
	let cleanup = CancellationToken::new();
	match provisioner.destroy(module, &cleanup).await {
		Ok(_) => true,
		Err(e @ IacError::LogParse { .. }) => {
			warn!(action, module_id = module.id, error = %e, "destroy committed but its log was unreadable");
			true
		}
		Err(e) => {
			warn!(action, module_id = module.id, error = %e, "best-effort cleanup failed");
			false
		}
	}
}

/// Applies a freshly rendered module and persists it.
///
/// A compensable apply failure tears the module down again under a fresh
/// cancellation scope. The statefile is only removed once that destroy went
/// through; otherwise the statefile and the persisted module are kept as the
/// record of what may still exist. A log-parse failure means the change
/// committed, so the module is kept and persisted.
pub async fn apply_new_module(
	provisioner: &Provisioner,
	modules: &ModuleStore,
	module: &mut Module,
	cancel: &CancellationToken,
) -> Result<()> {
	match provisioner.apply(module, cancel).await {
		Ok(_) => {}
		Err(e @ IacError::LogParse { .. }) => {
			warn!(module_id = module.id, error = %e, "apply committed but its log was unreadable");
		}
		Err(e) => {
			if e.is_compensable() {
				if compensating_destroy(provisioner, module, "destroy after failed apply").await {
					best_effort(
						"remove statefile after failed apply",
						provisioner.backend().remove_statefile(&state_path(module.id)),
					)
					.await;
				} else {
					error!(module_id = module.id, "rollback failed, keeping statefile and module");
					best_effort("persist module after failed rollback", modules.save(module)).await;
				}
			}
			return Err(e.into());
		}
	}

	if let Err(e) = modules.save(module).await {
		if compensating_destroy(provisioner, module, "destroy unpersisted module").await {
			best_effort(
				"remove statefile of unpersisted module",
				provisioner.backend().remove_statefile(&state_path(module.id)),
			)
			.await;
		} else {
			error!(module_id = module.id, "module could not be persisted or destroyed, keeping statefile");
		}
		return Err(e.into());
	}
	Ok(())
}

/// Destroys the persisted module for `id`, then removes the module and the
/// statefile. When `transition` is set, the destroy marker is recorded under
/// that environment key first. A missing module only removes the statefile.
pub async fn teardown_module(
	provisioner: &Provisioner,
	modules: &ModuleStore,
	id: i64,
	transition_env: Option<&str>,
	cancel: &CancellationToken,
) -> Result<()> {
	match modules.load(id).await {
		Ok(mut module) => {
			if let Some(key) = transition_env {
				module.set_transition(key, Transition::Destroy);
			}
			match provisioner.destroy(&mut module, cancel).await {
				Ok(_) => {}
				Err(e @ IacError::LogParse { .. }) => {
					warn!(module_id = id, error = %e, "destroy committed but its log was unreadable");
				}
				Err(e) => return Err(e.into()),
			}
			modules.delete(id).await?;
		}
		Err(e) if e.is_not_found() => {
			debug!(module_id = id, "no persisted module, removing statefile only");
		}
		Err(e) => return Err(e.into()),
	}

	provisioner.backend().remove_statefile(&state_path(id)).await?;
	info!(module_id = id, "torn down");
	Ok(())
}
