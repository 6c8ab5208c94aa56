//! `fleetbench deploy` — run the whole fleet to completion.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;

use crate::application::ports::{NullReporter, ProgressReporter, Provisioner};
use crate::application::services::lifecycle::TaskContext;
use crate::application::services::orchestrator;
use crate::domain::{ActiveInstanceRegistry, SpecError, TaskReport, TaskState};
use crate::infra::config::FleetFile;
use crate::infra::fetch::UreqFetcher;
use crate::infra::provision::{CommandProvisioner, UnmanagedProvisioner};
use crate::infra::ssh::Ssh2Shell;
use crate::output::reporter::ConsoleReporter;
use crate::output::{OutputContext, progress};

#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Path to the fleet file.
    #[arg(long = "config-file", short = 'c', default_value = "fleet.yml")]
    pub config_file: PathBuf,
}

/// Loads the fleet file, fans every host's lifecycle out concurrently and
/// prints the terminal report.
///
/// # Errors
///
/// Returns an error if the fleet file is unusable or any task ends `Failed`
/// (partial results are still on disk and in the printed report).
pub async fn run(ctx: &OutputContext, json: bool, args: &DeployArgs) -> Result<()> {
    let fleet = FleetFile::load(&args.config_file)?;
    let policies = fleet.policies();
    std::fs::create_dir_all(&policies.results_root).with_context(|| {
        format!(
            "creating results directory {}",
            policies.results_root.display()
        )
    })?;

    let provisioner: Arc<dyn Provisioner> = match &fleet.terminate_command {
        Some(argv) => Arc::new(CommandProvisioner::new(argv.clone())?),
        None => Arc::new(UnmanagedProvisioner),
    };
    let reporter: Arc<dyn ProgressReporter> = if ctx.quiet {
        Arc::new(NullReporter)
    } else {
        Arc::new(ConsoleReporter::new(ctx.clone()))
    };
    let task_ctx = TaskContext {
        shell: Arc::new(Ssh2Shell::new(fleet.defaults.max_concurrent_sessions)),
        provisioner,
        fetcher: Arc::new(UreqFetcher),
        registry: Arc::new(ActiveInstanceRegistry::new()),
        reporter,
        policies: Arc::new(policies),
    };

    // A host record that fails validation fails alone; the rest of the
    // fleet still deploys.
    let mut reports: Vec<TaskReport> = Vec::new();
    let mut tasks = Vec::new();
    for resolved in fleet.resolve_tasks() {
        match resolved {
            Ok(task) => tasks.push(task),
            Err(err) => {
                ctx.error(&err.to_string());
                let (SpecError::MissingField { instance, .. }
                | SpecError::InvalidField { instance, .. }) = &err;
                reports.push(TaskReport {
                    id: String::new(),
                    instance: instance.clone(),
                    state: TaskState::Failed,
                    runs: Vec::new(),
                    error: Some(err.to_string()),
                    finished_at: Utc::now(),
                });
            }
        }
    }

    ctx.header(&format!(
        "deploying {} host(s) from {}",
        tasks.len(),
        args.config_file.display()
    ));
    let spinner = (ctx.is_tty && !ctx.quiet && !json)
        .then(|| progress::spinner(&format!("{} task(s) in flight...", tasks.len())));
    reports.extend(orchestrator::run_all(tasks, task_ctx.clone()).await);
    if let Some(pb) = spinner {
        progress::finish_ok(&pb, "all tasks reached a terminal state");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        render_summary(ctx, &reports, &task_ctx.registry);
    }

    let failed = reports
        .iter()
        .filter(|r| r.state == TaskState::Failed)
        .count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} task(s) failed", reports.len());
    }
    Ok(())
}

fn render_summary(ctx: &OutputContext, reports: &[TaskReport], registry: &ActiveInstanceRegistry) {
    ctx.header("fleet summary");
    for report in reports {
        match report.state {
            TaskState::Done if report.succeeded() => {
                ctx.success(&format!(
                    "{}: done ({} config(s), {} artifact(s))",
                    report.instance,
                    report.runs.len(),
                    report.runs.iter().map(|r| r.artifacts).sum::<usize>()
                ));
            }
            TaskState::Done => {
                ctx.warn(&format!("{}: finished with incomplete runs", report.instance));
                for run in &report.runs {
                    let detail = run
                        .error
                        .clone()
                        .unwrap_or_else(|| "completion flag not observed".to_owned());
                    ctx.warn(&format!("  {} — {detail}", run.config));
                }
            }
            _ => {
                let reason = report.error.as_deref().unwrap_or("unknown failure");
                ctx.error(&format!("{}: failed — {reason}", report.instance));
            }
        }
    }

    let survivors = registry.snapshot();
    if !survivors.is_empty() {
        ctx.info(&format!(
            "{} instance(s) still running: {}",
            survivors.len(),
            survivors
                .iter()
                .map(|h| h.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
}
