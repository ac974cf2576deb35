//! Sync-wave ordered scale-down

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tabled::Tabled;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use wavedown_lib::{
    ArgoCdClient, ControlPlane, DrainState, KubeConnector, ScaleDownConfig, ScaleDownMetrics,
    ScaleDownReport, ScaleDownRequest, WaveScheduler,
};

use crate::output::{
    format_duration_ms, print_error, print_json, print_success, print_table, print_warning,
    OutputFormat,
};

pub struct DownOptions {
    pub name: String,
    pub project: Option<String>,
    pub no_grace: bool,
    pub grace_period: Option<i64>,
    pub timeout: Option<u64>,
    pub metrics_file: Option<PathBuf>,
}

/// Row for the per-workload drain table
#[derive(Tabled)]
struct DrainRow {
    #[tabled(rename = "Wave")]
    wave: i64,
    #[tabled(rename = "Workload")]
    workload: String,
    #[tabled(rename = "Polls")]
    polls: u32,
    #[tabled(rename = "Force Deleted")]
    force_deleted: usize,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Took")]
    took: String,
}

/// Request for the given options, plus whether a grace period is being ignored
fn build_request(project: &str, options: &DownOptions) -> (ScaleDownRequest, bool) {
    let request = ScaleDownRequest::new(project, &options.name);
    if options.no_grace {
        let grace = options.grace_period.unwrap_or(0).max(0);
        (request.with_force_delete(grace), false)
    } else {
        (request, options.grace_period.is_some())
    }
}

/// Scale an application down and report per-wave results
pub async fn scale_down(
    client: ArgoCdClient,
    settings: ScaleDownConfig,
    options: DownOptions,
    format: OutputFormat,
) -> Result<()> {
    let project = options
        .project
        .clone()
        .context("No project given (use --project or set default_project in the config file)")?;

    let (request, grace_ignored) = build_request(&project, &options);
    if grace_ignored {
        print_warning("--grace-period only applies together with --no-grace; ignoring it");
    }

    let deadline = options
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| settings.deadline());

    let connector = Arc::new(KubeConnector::new(client.bearer_token()));
    let scheduler = WaveScheduler::new(Arc::new(client), connector, settings);

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling scale down");
                cancel.cancel();
            }
        }
    });

    let result = scheduler
        .scale_down_with_deadline(request, deadline, cancel)
        .await;
    interrupt.abort();

    if let Some(path) = &options.metrics_file {
        std::fs::write(path, ScaleDownMetrics::new().render())
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    }

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            if e.is_timeout() {
                print_error(&format!(
                    "Scale down did not finish within {}s or was interrupted",
                    deadline.as_secs()
                ));
            }
            return Err(e).with_context(|| format!("Scale down of {} failed", options.name));
        }
    };

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_report(&report),
    }

    Ok(())
}

fn print_report(report: &ScaleDownReport) {
    if report.waves.is_empty() {
        print_warning("No scalable workloads found");
        return;
    }

    let rows = report
        .waves
        .iter()
        .flat_map(|wave| {
            wave.workloads.iter().map(move |d| DrainRow {
                wave: wave.wave,
                workload: d.workload.to_string(),
                polls: d.polls,
                force_deleted: d.force_deleted,
                result: describe(d.final_state, d.already_gone),
                took: format_duration_ms(d.elapsed_ms),
            })
        })
        .collect();
    print_table::<DrainRow>(rows);

    let elapsed = report.finished_at - report.started_at;
    print_success(&format!(
        "Scaled down {} workloads in {} waves ({} pods force deleted) in {}",
        report.workloads(),
        report.waves.len(),
        report.pods_force_deleted(),
        format_duration_ms(elapsed.num_milliseconds().max(0) as u64)
    ));
}

fn describe(state: DrainState, already_gone: bool) -> String {
    match state {
        DrainState::Drained if already_gone => "gone".dimmed().to_string(),
        DrainState::Drained => "drained".green().to_string(),
        other => format!("{:?}", other).yellow().to_string(),
    }
}
