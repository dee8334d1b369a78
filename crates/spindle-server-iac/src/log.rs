// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{IacError, Result};
use crate::runner::IacOperation;

/// One line of the engine's JSON log stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
	#[serde(rename = "@level", default)]
	pub level: String,
	#[serde(rename = "@message", default)]
	pub message: String,
	#[serde(rename = "type", default)]
	pub kind: String,
	#[serde(flatten)]
	pub fields: Map<String, Value>,
}

impl LogEntry {
	pub fn is_error(&self) -> bool {
		self.level == "error"
	}
}

/// Ordered log of one apply or destroy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
	pub entries: Vec<LogEntry>,
}

pub type ApplyLog = ExecutionLog;
pub type DestroyLog = ExecutionLog;

impl ExecutionLog {
	/// Parses the stdout of a successful run. Blank lines are skipped; any
	/// other line that is not a JSON object is a [`IacError::LogParse`].
	pub fn parse(operation: IacOperation, stdout: &str) -> Result<Self> {
		let mut entries = Vec::new();
		for (index, line) in stdout.lines().enumerate() {
			let line = line.trim();
			if line.is_empty() {
				continue;
			}
			let entry = serde_json::from_str::<LogEntry>(line).map_err(|e| IacError::LogParse {
				operation,
				line: index + 1,
				message: e.to_string(),
			})?;
			entries.push(entry);
		}
		Ok(Self { entries })
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn errors(&self) -> impl Iterator<Item = &LogEntry> {
		self.entries.iter().filter(|e| e.is_error())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const APPLY_OUTPUT: &str = r#"{"@level":"info","@message":"Terraform 1.9.0","type":"version","terraform":"1.9.0"}
{"@level":"info","@message":"spindle_workspace.main: Creating...","type":"apply_start","hook":{"action":"create"}}

{"@level":"info","@message":"Apply complete! Resources: 1 added, 0 changed, 0 destroyed.","type":"change_summary"}
"#;

	#[test]
	fn test_parse_keeps_order_and_extra_fields() {
		let log = ExecutionLog::parse(IacOperation::Apply, APPLY_OUTPUT).unwrap();
		assert_eq!(log.len(), 3);
		assert_eq!(log.entries[0].kind, "version");
		assert_eq!(log.entries[0].fields["terraform"], "1.9.0");
		assert_eq!(log.entries[2].kind, "change_summary");
		assert_eq!(log.errors().count(), 0);
	}

	#[test]
	fn test_unparseable_line_reports_line_number() {
		let stdout = "{\"@level\":\"info\",\"@message\":\"ok\",\"type\":\"version\"}\nnot json\n";
		let err = ExecutionLog::parse(IacOperation::Destroy, stdout).unwrap_err();
		match err {
			IacError::LogParse { operation, line, .. } => {
				assert_eq!(operation, IacOperation::Destroy);
				assert_eq!(line, 2);
			}
			other => panic!("unexpected error: {other:?}"),
		}
	}

	#[test]
	fn test_json_array_line_is_rejected() {
		assert!(matches!(
			ExecutionLog::parse(IacOperation::Apply, "[1, 2]"),
			Err(IacError::LogParse { .. })
		));
	}

	#[test]
	fn test_empty_output_is_empty_log() {
		assert!(ExecutionLog::parse(IacOperation::Apply, "").unwrap().is_empty());
	}
}
