// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Spindle provisioning server binary.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use spindle_server::cli::{outcome_json, Args, Command, PoolTarget};
use spindle_server::jobs::{VOLUME_RECONCILE_JOB, WORKSPACE_RECONCILE_JOB};
use spindle_server::{logging, version, App, Result};
use spindle_server_jobs::TriggerSource;
use spindle_server_workspaces::deadline_token;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
	let args = Args::parse();
	let command = args.command.unwrap_or(Command::Serve);

	if command == Command::Version {
		println!("{}", version::format_version_info());
		return ExitCode::SUCCESS;
	}

	match run(args.config, command).await {
		Ok(code) => code,
		Err(e) => {
			tracing::error!(error = %e, "spindle-server failed");
			eprintln!("error: {e}");
			ExitCode::FAILURE
		}
	}
}

async fn run(config_path: Option<std::path::PathBuf>, command: Command) -> Result<ExitCode> {
	let config = match config_path {
		Some(path) => spindle_server_config::load_config_with_file(path)?,
		None => spindle_server_config::load_config()?,
	};
	logging::init_logging(&config.logging)?;

	tracing::info!(
		version = version::VERSION,
		database = %config.database.url,
		"starting spindle-server"
	);

	let app = App::build(config).await?;

	match command {
		Command::Serve => serve(app).await,
		Command::Version => Ok(ExitCode::SUCCESS),
		Command::CheckTemplates => check_templates(&app).await,
		Command::Reconcile { pool } => reconcile(&app, pool).await,
		Command::Status => status(&app).await,
		Command::Workspace {
			timeout_secs,
			command,
		} => {
			let cancel = deadline_token(Duration::from_secs(timeout_secs));
			let outcome = app.orchestrator().execute(command.into_request(), &cancel).await;
			println!("{:#}", outcome_json(&outcome));
			Ok(if outcome.is_success() {
				ExitCode::SUCCESS
			} else {
				ExitCode::FAILURE
			})
		}
	}
}

async fn serve(app: App) -> Result<ExitCode> {
	let scheduler = Arc::new(app.scheduler());
	scheduler.start().await?;

	// Fill the pools now instead of one interval after start.
	for job_id in [VOLUME_RECONCILE_JOB, WORKSPACE_RECONCILE_JOB] {
		let scheduler = Arc::clone(&scheduler);
		tokio::spawn(async move {
			if let Err(e) = scheduler.trigger_job(job_id, TriggerSource::Schedule).await {
				tracing::warn!(job_id, error = %e, "Initial pool reconcile failed");
			}
		});
	}

	tokio::signal::ctrl_c().await?;
	tracing::info!("Received shutdown signal");

	app.shutdown();
	tracing::info!("Shutting down job scheduler...");
	scheduler.shutdown().await;

	let health = scheduler.health_status().await;
	tracing::info!(jobs_health = ?health.status, "Server shutdown complete");
	Ok(ExitCode::SUCCESS)
}

async fn check_templates(app: &App) -> Result<ExitCode> {
	let checks = app.check_templates(&CancellationToken::new()).await?;
	let mut all_valid = true;

	for check in &checks {
		match &check.report {
			None => println!("ok    {}", check.name),
			Some(report) => {
				all_valid = false;
				println!(
					"FAIL  {} ({} errors, {} warnings)",
					check.name, report.error_count, report.warning_count
				);
				for diagnostic in &report.diagnostics {
					println!("      {}: {}", diagnostic.severity, diagnostic.summary);
					if !diagnostic.detail.is_empty() {
						println!("        {}", diagnostic.detail);
					}
				}
			}
		}
	}

	Ok(if all_valid {
		ExitCode::SUCCESS
	} else {
		ExitCode::FAILURE
	})
}

async fn reconcile(app: &App, pool: PoolTarget) -> Result<ExitCode> {
	let (pass, provisioned, drained, destroyed, failures) = match pool {
		PoolTarget::Volumes => {
			let report = app.context().volumes.reconcile().await?;
			for failure in &report.drain_failures {
				println!("failure  draining: {failure}");
			}
			for bucket in &report.buckets {
				for failure in &bucket.failures {
					println!("failure  {:?}: {failure}", bucket.shape);
				}
			}
			(
				report.pass,
				report.provisioned(),
				report.drained,
				report.destroyed(),
				report.failures(),
			)
		}
		PoolTarget::Workspaces => {
			let report = app.context().workspaces.reconcile().await?;
			for failure in &report.drain_failures {
				println!("failure  draining: {failure}");
			}
			for bucket in &report.buckets {
				for failure in &bucket.failures {
					println!("failure  {:?}: {failure}", bucket.shape);
				}
			}
			(
				report.pass,
				report.provisioned(),
				report.drained,
				report.destroyed(),
				report.failures(),
			)
		}
	};

	println!(
		"pass {pass}: provisioned {provisioned}, destroyed {destroyed}, drained {drained}, {failures} failures"
	);
	Ok(if failures == 0 {
		ExitCode::SUCCESS
	} else {
		ExitCode::FAILURE
	})
}

async fn status(app: &App) -> Result<ExitCode> {
	println!("volumes");
	for bucket in app.context().volumes.status().await? {
		println!(
			"  {:?}: target {}, available {}, in use {}, draining {}",
			bucket.shape, bucket.target, bucket.available, bucket.in_use, bucket.draining
		);
	}

	println!("warm workspaces");
	for bucket in app.context().workspaces.status().await? {
		println!(
			"  {:?}: target {}, available {}, in use {}, draining {}",
			bucket.shape, bucket.target, bucket.available, bucket.in_use, bucket.draining
		);
	}
	Ok(ExitCode::SUCCESS)
}
