// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Drives the IaC engine over a [`Module`].
//!
//! Every operation prepares the module first: the backend block is injected,
//! backend credentials are added to the environment, the configuration is
//! materialized under `{work_root}/{id}` and `init` is run. Preparation is
//! idempotent.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::backend::{state_path, StateBackend};
use crate::error::{IacError, Result};
use crate::log::{ApplyLog, DestroyLog, ExecutionLog};
use crate::module::{configuration_hash, Module, BACKEND_PLACEHOLDER};
use crate::runner::{IacOperation, IacRunner, Invocation, ProcessOutput};

const CONFIGURATION_FILE: &str = "main.tf";
const MAX_STDERR_BYTES: usize = 4096;

/// Structured result of `validate -json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
	pub valid: bool,
	#[serde(default)]
	pub error_count: u32,
	#[serde(default)]
	pub warning_count: u32,
	#[serde(default)]
	pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
	pub severity: String,
	pub summary: String,
	#[serde(default)]
	pub detail: String,
}

/// Owns one state backend and the runner used to reach the engine.
#[derive(Clone)]
pub struct Provisioner {
	backend: Arc<dyn StateBackend>,
	runner: Arc<dyn IacRunner>,
	work_root: PathBuf,
}

impl std::fmt::Debug for Provisioner {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Provisioner")
			.field("backend", &self.backend.name())
			.field("work_root", &self.work_root)
			.finish_non_exhaustive()
	}
}

impl Provisioner {
	pub fn new(
		backend: Arc<dyn StateBackend>,
		runner: Arc<dyn IacRunner>,
		work_root: impl Into<PathBuf>,
	) -> Self {
		Self {
			backend,
			runner,
			work_root: work_root.into(),
		}
	}

	pub fn backend(&self) -> &Arc<dyn StateBackend> {
		&self.backend
	}

	/// Keys of the credential entries prepare adds. They must not be persisted.
	pub fn credential_keys(&self) -> Vec<String> {
		self.backend.credentials().into_iter().map(|e| e.key).collect()
	}

	pub fn workdir_for(&self, id: i64) -> PathBuf {
		self.work_root.join(id.to_string())
	}

	#[instrument(skip(self, module, cancel), fields(module_id = module.id, backend = self.backend.name()))]
	pub async fn prepare(&self, module: &mut Module, cancel: &CancellationToken) -> Result<()> {
		if module.has_backend_placeholder() {
			let block = self.backend.configuration(&state_path(module.id));
			module.configuration = module.configuration.replace(BACKEND_PLACEHOLDER, &block);
		}
		if module.has_backend_placeholder() {
			return Err(IacError::Validation(format!(
				"module {} still contains {BACKEND_PLACEHOLDER} after backend injection",
				module.id
			)));
		}

		for entry in self.backend.credentials() {
			module.set_env(&entry.key, entry.value);
		}

		let workdir = self.workdir_for(module.id);
		materialize(&workdir, &module.configuration).await?;
		module.workdir = Some(workdir);

		let output = self.run(IacOperation::Init, module, cancel).await?;
		check_exit(IacOperation::Init, &output)?;
		debug!("module prepared");
		Ok(())
	}

	/// `Ok(None)` when the module is valid, in which case it is marked
	/// validated. An invalid module yields its report.
	#[instrument(skip(self, module, cancel), fields(module_id = module.id))]
	pub async fn validate(
		&self,
		module: &mut Module,
		cancel: &CancellationToken,
	) -> Result<Option<ValidationReport>> {
		self.prepare(module, cancel).await?;
		let output = self.run(IacOperation::Validate, module, cancel).await?;

		// validate exits non-zero for an invalid module but still prints the report.
		let report = match serde_json::from_str::<ValidationReport>(output.stdout.trim()) {
			Ok(report) => report,
			Err(e) if output.success() => {
				return Err(IacError::Validation(format!("unreadable validate output: {e}")));
			}
			Err(_) => return Err(command_failed(IacOperation::Validate, &output)),
		};

		if report.valid {
			module.validated = true;
			Ok(None)
		} else {
			info!(errors = report.error_count, "module failed validation");
			Ok(Some(report))
		}
	}

	#[instrument(skip(self, module, cancel), fields(module_id = module.id))]
	pub async fn apply(&self, module: &mut Module, cancel: &CancellationToken) -> Result<ApplyLog> {
		self.prepare(module, cancel).await?;
		let output = self.run(IacOperation::Apply, module, cancel).await?;
		// A failed apply may be half done; its stdout is not trusted.
		check_exit(IacOperation::Apply, &output)?;
		let log = ExecutionLog::parse(IacOperation::Apply, &output.stdout)?;
		info!(entries = log.len(), "apply complete");
		Ok(log)
	}

	#[instrument(skip(self, module, cancel), fields(module_id = module.id))]
	pub async fn destroy(&self, module: &mut Module, cancel: &CancellationToken) -> Result<DestroyLog> {
		self.prepare(module, cancel).await?;
		let output = self.run(IacOperation::Destroy, module, cancel).await?;
		check_exit(IacOperation::Destroy, &output)?;

		if let Some(workdir) = module.workdir.take() {
			if let Err(e) = tokio::fs::remove_dir_all(&workdir).await {
				warn!(workdir = %workdir.display(), error = %e, "failed to remove working directory");
			}
		}

		let log = ExecutionLog::parse(IacOperation::Destroy, &output.stdout)?;
		info!(entries = log.len(), "destroy complete");
		Ok(log)
	}

	async fn run(
		&self,
		operation: IacOperation,
		module: &Module,
		cancel: &CancellationToken,
	) -> Result<ProcessOutput> {
		let workdir = module
			.workdir
			.clone()
			.unwrap_or_else(|| self.workdir_for(module.id));
		self.runner
			.run(
				Invocation {
					operation,
					module_id: module.id,
					workdir,
					env: module.env.clone(),
				},
				cancel,
			)
			.await
	}
}

fn check_exit(operation: IacOperation, output: &ProcessOutput) -> Result<()> {
	if output.success() {
		return Ok(());
	}
	Err(command_failed(operation, output))
}

fn command_failed(operation: IacOperation, output: &ProcessOutput) -> IacError {
	IacError::CommandFailed {
		operation,
		exit_code: output.exit_code,
		stderr: stderr_tail(&output.stderr),
	}
}

fn stderr_tail(stderr: &str) -> String {
	let stderr = stderr.trim();
	if stderr.len() <= MAX_STDERR_BYTES {
		return stderr.to_string();
	}
	let mut start = stderr.len() - MAX_STDERR_BYTES;
	while !stderr.is_char_boundary(start) {
		start += 1;
	}
	format!("...{}", &stderr[start..])
}

/// Writes the configuration to `workdir`, reusing an existing file only when
/// its content matches.
async fn materialize(workdir: &Path, configuration: &str) -> Result<()> {
	let path = workdir.join(CONFIGURATION_FILE);
	match tokio::fs::read_to_string(&path).await {
		Ok(existing) => {
			if configuration_hash(&existing) == configuration_hash(configuration) {
				return Ok(());
			}
			return Err(IacError::Conflict(format!(
				"{} exists with different configuration",
				path.display()
			)));
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
		Err(e) => return Err(e.into()),
	}

	tokio::fs::create_dir_all(workdir).await?;
	let tmp = workdir.join(format!("{CONFIGURATION_FILE}.tmp"));
	tokio::fs::write(&tmp, configuration).await?;
	tokio::fs::rename(&tmp, &path).await?;
	debug!(path = %path.display(), "materialized configuration");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::LocalBackend;
	use crate::statefile::{read_agent, read_workspace_state, WorkspaceState};
	use crate::testing::{FailureRule, FakeEngine, FakeFailure};
	use tempfile::TempDir;

	const CONFIG: &str = "{{backend}}\nresource \"spindle_workspace\" \"main\" {}\nresource \"spindle_agent\" \"main\" {}\n";

	struct Harness {
		_tmp: TempDir,
		engine: Arc<FakeEngine>,
		backend: Arc<LocalBackend>,
		provisioner: Provisioner,
	}

	fn harness() -> Harness {
		let tmp = TempDir::new().unwrap();
		let backend = Arc::new(LocalBackend::new(tmp.path().join("state")));
		let engine = Arc::new(FakeEngine::new(tmp.path().join("state")));
		let provisioner = Provisioner::new(backend.clone(), engine.clone(), tmp.path().join("work"));
		Harness {
			_tmp: tmp,
			engine,
			backend,
			provisioner,
		}
	}

	mod prepare {
		use super::*;

		#[tokio::test]
		async fn injects_backend_and_writes_workdir() {
			let h = harness();
			let mut module = Module::new(42, CONFIG);
			h.provisioner
				.prepare(&mut module, &CancellationToken::new())
				.await
				.unwrap();

			assert!(!module.has_backend_placeholder());
			assert!(module.configuration.contains("backend \"local\""));
			let workdir = module.workdir.clone().unwrap();
			let on_disk = std::fs::read_to_string(workdir.join("main.tf")).unwrap();
			assert_eq!(on_disk, module.configuration);
			assert_eq!(h.engine.count(IacOperation::Init), 1);
		}

		#[tokio::test]
		async fn is_idempotent() {
			let h = harness();
			let mut module = Module::new(42, CONFIG);
			let cancel = CancellationToken::new();
			h.provisioner.prepare(&mut module, &cancel).await.unwrap();
			let prepared = module.configuration.clone();
			h.provisioner.prepare(&mut module, &cancel).await.unwrap();
			assert_eq!(module.configuration, prepared);
			assert_eq!(h.engine.count(IacOperation::Init), 2);
		}

		#[tokio::test]
		async fn mismatched_workdir_is_conflict() {
			let h = harness();
			let cancel = CancellationToken::new();
			let mut first = Module::new(42, CONFIG);
			h.provisioner.prepare(&mut first, &cancel).await.unwrap();

			let mut second = Module::new(42, format!("{CONFIG}# changed\n"));
			let err = h.provisioner.prepare(&mut second, &cancel).await.unwrap_err();
			assert!(matches!(err, IacError::Conflict(_)));
		}

		#[tokio::test]
		async fn failed_init_is_command_failed() {
			let h = harness();
			h.engine.inject(FailureRule::new(
				IacOperation::Init,
				FakeFailure::Exit {
					code: 1,
					stderr: "provider not found".to_string(),
				},
			));
			let mut module = Module::new(1, CONFIG);
			let err = h
				.provisioner
				.prepare(&mut module, &CancellationToken::new())
				.await
				.unwrap_err();
			assert!(matches!(
				err,
				IacError::CommandFailed {
					operation: IacOperation::Init,
					exit_code: 1,
					..
				}
			));
		}
	}

	mod apply {
		use super::*;

		#[tokio::test]
		async fn writes_statefile_and_parses_log() {
			let h = harness();
			let mut module = Module::new(42, CONFIG);
			let log = h
				.provisioner
				.apply(&mut module, &CancellationToken::new())
				.await
				.unwrap();
			assert!(!log.is_empty());
			assert_eq!(
				read_workspace_state(h.backend.as_ref(), 42, "spindle_workspace")
					.await
					.unwrap(),
				WorkspaceState::Active
			);
			assert!(read_agent(h.backend.as_ref(), 42, "spindle_agent").await.is_ok());
		}

		#[tokio::test]
		async fn non_zero_exit_does_not_parse_stdout() {
			let h = harness();
			h.engine.inject(FailureRule::new(
				IacOperation::Apply,
				FakeFailure::Exit {
					code: 1,
					stderr: "Error: quota exceeded".to_string(),
				},
			));
			let mut module = Module::new(42, CONFIG);
			let err = h
				.provisioner
				.apply(&mut module, &CancellationToken::new())
				.await
				.unwrap_err();
			assert!(err.is_compensable());
			match err {
				IacError::CommandFailed { stderr, .. } => assert_eq!(stderr, "Error: quota exceeded"),
				other => panic!("unexpected error: {other:?}"),
			}
		}

		#[tokio::test]
		async fn garbage_output_is_log_parse_and_state_is_committed() {
			let h = harness();
			h.engine
				.inject(FailureRule::new(IacOperation::Apply, FakeFailure::GarbageOutput));
			let mut module = Module::new(42, CONFIG);
			let err = h
				.provisioner
				.apply(&mut module, &CancellationToken::new())
				.await
				.unwrap_err();
			assert!(!err.is_compensable());
			assert_eq!(
				read_workspace_state(h.backend.as_ref(), 42, "spindle_workspace")
					.await
					.unwrap(),
				WorkspaceState::Active
			);
		}

		#[tokio::test]
		async fn cancellation_is_distinct_error() {
			let h = harness();
			h.engine.inject(FailureRule::new(
				IacOperation::Apply,
				FakeFailure::Delay(std::time::Duration::from_secs(30)),
			));
			let cancel = CancellationToken::new();
			let mut module = Module::new(42, CONFIG);
			let apply = h.provisioner.apply(&mut module, &cancel);
			let canceller = async {
				tokio::time::sleep(std::time::Duration::from_millis(20)).await;
				cancel.cancel();
			};
			let (result, ()) = tokio::join!(apply, canceller);
			assert!(matches!(
				result,
				Err(IacError::Cancelled {
					operation: IacOperation::Apply
				})
			));
		}
	}

	mod destroy {
		use super::*;

		#[tokio::test]
		async fn clears_state_and_workdir() {
			let h = harness();
			let cancel = CancellationToken::new();
			let mut module = Module::new(42, CONFIG);
			h.provisioner.apply(&mut module, &cancel).await.unwrap();
			let workdir = h.provisioner.workdir_for(42);
			assert!(workdir.exists());

			h.provisioner.destroy(&mut module, &cancel).await.unwrap();
			assert!(!workdir.exists());
			assert!(module.workdir.is_none());
			assert_eq!(
				read_workspace_state(h.backend.as_ref(), 42, "spindle_workspace")
					.await
					.unwrap(),
				WorkspaceState::Destroyed
			);

			// A different configuration can be prepared for the same id afterwards.
			let mut recreated = Module::new(42, format!("{CONFIG}# v2\n"));
			h.provisioner.prepare(&mut recreated, &cancel).await.unwrap();
		}
	}

	mod validate {
		use super::*;

		#[tokio::test]
		async fn valid_module_is_marked() {
			let h = harness();
			let mut module = Module::new(1, CONFIG);
			let report = h
				.provisioner
				.validate(&mut module, &CancellationToken::new())
				.await
				.unwrap();
			assert!(report.is_none());
			assert!(module.validated);
		}

		#[tokio::test]
		async fn invalid_module_returns_report() {
			let h = harness();
			h.engine.inject(FailureRule::new(IacOperation::Validate, FakeFailure::Invalid {
				summary: "Unsupported argument".to_string(),
			}));
			let mut module = Module::new(1, CONFIG);
			let report = h
				.provisioner
				.validate(&mut module, &CancellationToken::new())
				.await
				.unwrap()
				.unwrap();
			assert!(!report.valid);
			assert_eq!(report.error_count, 1);
			assert_eq!(report.diagnostics[0].summary, "Unsupported argument");
			assert!(!module.validated);
		}
	}

	#[test]
	fn test_stderr_tail_keeps_end() {
		let long = format!("{}END", "x".repeat(MAX_STDERR_BYTES * 2));
		let tail = stderr_tail(&long);
		assert!(tail.starts_with("..."));
		assert!(tail.ends_with("END"));
		assert!(tail.len() <= MAX_STDERR_BYTES + 3);
	}
}
