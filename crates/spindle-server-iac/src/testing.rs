// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Scripted IaC engine for tests.
//!
//! [`FakeEngine`] implements [`IacRunner`] without a binary. `apply` scans the
//! materialized `main.tf` for `resource "TYPE"` blocks and writes a statefile
//! under `{state_root}/states/{id}`, the layout [`LocalBackend`] reads.
//! `destroy` writes a statefile with no resources. Failures are injected with
//! [`FailureRule`].
//!
//! [`LocalBackend`]: crate::backend::LocalBackend

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::backend::{state_path, BACKUP_SUFFIX};
use crate::error::{IacError, Result};
use crate::runner::{IacOperation, IacRunner, Invocation, ProcessOutput};

pub const WORKSPACE_RESOURCE_TYPE: &str = "spindle_workspace";
pub const AGENT_RESOURCE_TYPE: &str = "spindle_agent";
pub const TRANSITION_ENV: &str = "SPINDLE_WORKSPACE_TRANSITION";

#[derive(Debug, Clone)]
pub enum FakeFailure {
	/// Exit non-zero without touching state.
	Exit { code: i32, stderr: String },
	/// Commit state as a successful run would, then exit non-zero.
	ExitAfterCommit { code: i32, stderr: String },
	/// Exit zero after committing state, with an unparseable stdout line.
	GarbageOutput,
	/// Wait before running. Cancellation during the wait is honoured.
	Delay(Duration),
	/// `validate` reports one error.
	Invalid { summary: String },
}

#[derive(Debug, Clone)]
pub struct FailureRule {
	operation: IacOperation,
	module_id: Option<i64>,
	remaining: Option<usize>,
	failure: FakeFailure,
}

impl FailureRule {
	/// Applies to every matching invocation until removed.
	pub fn new(operation: IacOperation, failure: FakeFailure) -> Self {
		Self {
			operation,
			module_id: None,
			remaining: None,
			failure,
		}
	}

	pub fn for_module(mut self, id: i64) -> Self {
		self.module_id = Some(id);
		self
	}

	pub fn times(mut self, n: usize) -> Self {
		self.remaining = Some(n);
		self
	}

	fn matches(&self, invocation: &Invocation) -> bool {
		self.operation == invocation.operation
			&& self.module_id.map_or(true, |id| id == invocation.module_id)
			&& self.remaining.map_or(true, |n| n > 0)
	}
}

#[derive(Debug)]
pub struct FakeEngine {
	state_root: PathBuf,
	workspace_type: String,
	agent_type: String,
	transition_env: String,
	next_agent_id: AtomicI64,
	invocations: Mutex<Vec<Invocation>>,
	rules: Mutex<Vec<FailureRule>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl FakeEngine {
	pub fn new(state_root: impl Into<PathBuf>) -> Self {
		Self {
			state_root: state_root.into(),
			workspace_type: WORKSPACE_RESOURCE_TYPE.to_string(),
			agent_type: AGENT_RESOURCE_TYPE.to_string(),
			transition_env: TRANSITION_ENV.to_string(),
			next_agent_id: AtomicI64::new(1000),
			invocations: Mutex::new(Vec::new()),
			rules: Mutex::new(Vec::new()),
		}
	}

	pub fn with_resource_types(mut self, workspace: impl Into<String>, agent: impl Into<String>) -> Self {
		self.workspace_type = workspace.into();
		self.agent_type = agent.into();
		self
	}

	pub fn with_transition_env(mut self, key: impl Into<String>) -> Self {
		self.transition_env = key.into();
		self
	}

	pub fn inject(&self, rule: FailureRule) {
		lock(&self.rules).push(rule);
	}

	pub fn clear_failures(&self) {
		lock(&self.rules).clear();
	}

	pub fn invocations(&self) -> Vec<Invocation> {
		lock(&self.invocations).clone()
	}

	pub fn count(&self, operation: IacOperation) -> usize {
		lock(&self.invocations)
			.iter()
			.filter(|i| i.operation == operation)
			.count()
	}

	pub fn count_for(&self, operation: IacOperation, module_id: i64) -> usize {
		lock(&self.invocations)
			.iter()
			.filter(|i| i.operation == operation && i.module_id == module_id)
			.count()
	}

	pub fn statefile_path(&self, id: i64) -> PathBuf {
		self.state_root.join(state_path(id))
	}

	fn take_failure(&self, invocation: &Invocation) -> Option<FakeFailure> {
		let mut rules = lock(&self.rules);
		let rule = rules.iter_mut().find(|r| r.matches(invocation))?;
		if let Some(n) = rule.remaining.as_mut() {
			*n -= 1;
		}
		Some(rule.failure.clone())
	}

	fn resource(&self, resource_type: &str, name: &str, invocation: &Invocation) -> Value {
		let attributes = if resource_type == self.workspace_type {
			let stopping = invocation
				.env
				.iter()
				.rev()
				.find(|e| e.key == self.transition_env)
				.is_some_and(|e| e.value == "stop");
			json!({ "start_count": if stopping { 0 } else { 1 } })
		} else if resource_type == self.agent_type {
			let id = self.next_agent_id.fetch_add(1, Ordering::SeqCst);
			json!({ "id": id.to_string(), "token": format!("agent-token-{id}") })
		} else {
			json!({})
		};
		json!({
			"mode": "managed",
			"type": resource_type,
			"name": name,
			"instances": [{ "attributes": attributes }],
		})
	}

	async fn write_state(&self, id: i64, resources: Vec<Value>) -> Result<()> {
		let path = self.statefile_path(id);
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		if tokio::fs::try_exists(&path).await? {
			let backup = PathBuf::from(format!("{}{BACKUP_SUFFIX}", path.display()));
			tokio::fs::copy(&path, backup).await?;
		}
		let state = json!({ "version": 4, "resources": resources });
		tokio::fs::write(&path, serde_json::to_vec(&state)?).await?;
		Ok(())
	}

	async fn apply(&self, invocation: &Invocation) -> Result<Vec<Value>> {
		let configuration = read_configuration(&invocation.workdir).await?;
		let resources: Vec<Value> = scan_resources(&configuration)
			.into_iter()
			.map(|(resource_type, name)| self.resource(&resource_type, &name, invocation))
			.collect();
		let count = resources.len();
		self.write_state(invocation.module_id, resources).await?;
		Ok(vec![
			log_line("version", "Terraform 1.9.0"),
			log_line(
				"change_summary",
				&format!("Apply complete! Resources: {count} added, 0 changed, 0 destroyed."),
			),
		])
	}

	async fn destroy(&self, invocation: &Invocation) -> Result<Vec<Value>> {
		self.write_state(invocation.module_id, Vec::new()).await?;
		Ok(vec![
			log_line("version", "Terraform 1.9.0"),
			log_line("change_summary", "Destroy complete! Resources: 0 destroyed."),
		])
	}
}

fn log_line(kind: &str, message: &str) -> Value {
	json!({ "@level": "info", "@message": message, "type": kind })
}

async fn read_configuration(workdir: &Path) -> Result<String> {
	Ok(tokio::fs::read_to_string(workdir.join("main.tf")).await?)
}

/// `(type, name)` of every `resource "TYPE" "NAME"` line, in order.
fn scan_resources(configuration: &str) -> Vec<(String, String)> {
	configuration
		.lines()
		.filter_map(|line| {
			let rest = line.trim().strip_prefix("resource")?;
			let mut quoted = rest.split('"').skip(1).step_by(2);
			let resource_type = quoted.next()?.to_string();
			let name = quoted.next().unwrap_or_default().to_string();
			Some((resource_type, name))
		})
		.collect()
}

fn render(lines: &[Value]) -> String {
	lines.iter().map(|l| format!("{l}\n")).collect()
}

#[async_trait]
impl IacRunner for FakeEngine {
	async fn run(&self, invocation: Invocation, cancel: &CancellationToken) -> Result<ProcessOutput> {
		lock(&self.invocations).push(invocation.clone());
		let operation = invocation.operation;

		let mut garbage = false;
		let mut invalid = None;
		let mut exit_after = None;
		match self.take_failure(&invocation) {
			Some(FakeFailure::Exit { code, stderr }) => {
				return Ok(ProcessOutput {
					exit_code: code,
					stdout: String::new(),
					stderr,
				});
			}
			Some(FakeFailure::Delay(delay)) => {
				tokio::select! {
					_ = cancel.cancelled() => return Err(IacError::Cancelled { operation }),
					_ = tokio::time::sleep(delay) => {}
				}
			}
			Some(FakeFailure::ExitAfterCommit { code, stderr }) => exit_after = Some((code, stderr)),
			Some(FakeFailure::GarbageOutput) => garbage = true,
			Some(FakeFailure::Invalid { summary }) => invalid = Some(summary),
			None => {}
		}

		let (exit_code, mut stdout) = match operation {
			IacOperation::Init => (0, "Terraform has been successfully initialized!\n".to_string()),
			IacOperation::Validate => match invalid {
				Some(summary) => (
					1,
					json!({
						"format_version": "1.0",
						"valid": false,
						"error_count": 1,
						"warning_count": 0,
						"diagnostics": [{ "severity": "error", "summary": summary, "detail": "" }],
					})
					.to_string(),
				),
				None => (
					0,
					json!({
						"format_version": "1.0",
						"valid": true,
						"error_count": 0,
						"warning_count": 0,
						"diagnostics": [],
					})
					.to_string(),
				),
			},
			IacOperation::Apply => (0, render(&self.apply(&invocation).await?)),
			IacOperation::Destroy => (0, render(&self.destroy(&invocation).await?)),
		};
		if garbage {
			stdout.push_str("Warning: provider produced inconsistent result\n");
		}
		if let Some((code, stderr)) = exit_after {
			return Ok(ProcessOutput {
				exit_code: code,
				stdout,
				stderr,
			});
		}

		Ok(ProcessOutput {
			exit_code,
			stdout,
			stderr: String::new(),
		})
	}
}
