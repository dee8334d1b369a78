// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{IacError, Result};
use crate::module::EnvEntry;

/// One invocation of the IaC engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IacOperation {
	Init,
	Validate,
	Apply,
	Destroy,
}

impl IacOperation {
	pub fn as_str(&self) -> &'static str {
		match self {
			IacOperation::Init => "init",
			IacOperation::Validate => "validate",
			IacOperation::Apply => "apply",
			IacOperation::Destroy => "destroy",
		}
	}

	/// Full argument list, subcommand first.
	pub fn args(&self) -> &'static [&'static str] {
		match self {
			IacOperation::Init => &["init", "-input=false", "-no-color"],
			IacOperation::Validate => &["validate", "-json", "-no-color"],
			IacOperation::Apply => &["apply", "-auto-approve", "-input=false", "-json"],
			IacOperation::Destroy => &["destroy", "-auto-approve", "-input=false", "-json"],
		}
	}
}

impl fmt::Display for IacOperation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone)]
pub struct Invocation {
	pub operation: IacOperation,
	pub module_id: i64,
	pub workdir: PathBuf,
	pub env: Vec<EnvEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
	pub exit_code: i32,
	pub stdout: String,
	pub stderr: String,
}

impl ProcessOutput {
	pub fn success(&self) -> bool {
		self.exit_code == 0
	}
}

/// Runs the IaC engine. A non-zero exit is returned as output, not an error;
/// errors are reserved for the process never completing.
#[async_trait]
pub trait IacRunner: Send + Sync {
	async fn run(&self, invocation: Invocation, cancel: &CancellationToken) -> Result<ProcessOutput>;
}

/// Runs the engine binary as a child process.
#[derive(Debug, Clone)]
pub struct CommandRunner {
	binary: PathBuf,
	timeout: Duration,
	plugin_cache_dir: Option<PathBuf>,
}

impl CommandRunner {
	pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
		Self {
			binary: binary.into(),
			timeout,
			plugin_cache_dir: None,
		}
	}

	pub fn with_plugin_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.plugin_cache_dir = Some(dir.into());
		self
	}
}

#[async_trait]
impl IacRunner for CommandRunner {
	#[instrument(
		skip(self, invocation, cancel),
		fields(operation = %invocation.operation, module_id = invocation.module_id)
	)]
	async fn run(&self, invocation: Invocation, cancel: &CancellationToken) -> Result<ProcessOutput> {
		let operation = invocation.operation;
		let mut command = Command::new(&self.binary);
		command
			.args(operation.args())
			.current_dir(&invocation.workdir)
			.env("TF_IN_AUTOMATION", "1")
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);
		if let Some(dir) = &self.plugin_cache_dir {
			command.env("TF_PLUGIN_CACHE_DIR", dir);
		}
		for entry in &invocation.env {
			command.env(&entry.key, &entry.value);
		}

		let child = command.spawn().map_err(|e| {
			if e.kind() == std::io::ErrorKind::NotFound {
				warn!(binary = %self.binary.display(), "IaC binary not found");
			}
			IacError::Io(e)
		})?;

		// Dropping the wait future kills the child.
		let output = tokio::select! {
			biased;
			_ = cancel.cancelled() => {
				warn!("IaC command cancelled");
				return Err(IacError::Cancelled { operation });
			}
			_ = tokio::time::sleep(self.timeout) => {
				warn!(timeout = ?self.timeout, "IaC command timed out");
				return Err(IacError::TimedOut { operation, timeout: self.timeout });
			}
			output = child.wait_with_output() => output?,
		};

		let exit_code = output.status.code().unwrap_or(-1);
		debug!(exit_code, stdout_len = output.stdout.len(), "IaC command finished");

		Ok(ProcessOutput {
			exit_code,
			stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
			stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_operation_args() {
		assert_eq!(IacOperation::Init.args(), &["init", "-input=false", "-no-color"]);
		assert_eq!(
			IacOperation::Apply.args(),
			&["apply", "-auto-approve", "-input=false", "-json"]
		);
		assert_eq!(IacOperation::Destroy.args()[0], "destroy");
		assert_eq!(IacOperation::Validate.to_string(), "validate");
	}

	#[cfg(unix)]
	mod process {
		use super::*;
		use tempfile::TempDir;

		fn invocation(workdir: &TempDir) -> Invocation {
			Invocation {
				operation: IacOperation::Apply,
				module_id: 1,
				workdir: workdir.path().to_path_buf(),
				env: vec![EnvEntry::new("SPINDLE_TEST", "x")],
			}
		}

		#[tokio::test]
		async fn test_missing_binary_is_io_error() {
			let dir = TempDir::new().unwrap();
			let runner = CommandRunner::new("/nonexistent/spindle-iac", Duration::from_secs(5));
			let err = runner
				.run(invocation(&dir), &CancellationToken::new())
				.await
				.unwrap_err();
			assert!(matches!(err, IacError::Io(_)));
		}

		#[tokio::test]
		async fn test_non_zero_exit_is_output() {
			let dir = TempDir::new().unwrap();
			let runner = CommandRunner::new("false", Duration::from_secs(5));
			let output = runner
				.run(invocation(&dir), &CancellationToken::new())
				.await
				.unwrap();
			assert!(!output.success());
		}

		#[tokio::test]
		async fn test_cancelled_before_exit() {
			let dir = TempDir::new().unwrap();
			let runner = CommandRunner::new("sleep", Duration::from_secs(30));
			let cancel = CancellationToken::new();
			cancel.cancel();
			let err = runner.run(invocation(&dir), &cancel).await.unwrap_err();
			assert!(matches!(
				err,
				IacError::Cancelled {
					operation: IacOperation::Apply
				}
			));
		}
	}
}
