//! Application inspection and sync commands

use anyhow::{Context, Result};
use colored::Colorize;
use std::time::Duration;
use tabled::Tabled;
use wavedown_lib::health::wait_for_healthy;
use wavedown_lib::scale::SCALABLE_KINDS;
use wavedown_lib::{Application, ArgoCdClient, ControlPlane, ScaleDownConfig};

use crate::output::{
    color_health_status, color_sync_status, format_timestamp, print_info, print_json,
    print_success, print_table, print_warning, OutputFormat,
};

/// Row for the applications table
#[derive(Tabled)]
struct ApplicationRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Project")]
    project: String,
    #[tabled(rename = "Sync")]
    sync: String,
    #[tabled(rename = "Health")]
    health: String,
    #[tabled(rename = "Destination")]
    destination: String,
}

/// Row for the resources of one application
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Wave")]
    wave: i64,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Scalable")]
    scalable: String,
}

impl From<&Application> for ApplicationRow {
    fn from(app: &Application) -> Self {
        let dest = &app.spec.destination;
        let cluster = if dest.name.is_empty() { &dest.server } else { &dest.name };
        Self {
            name: app.name().to_string(),
            project: app.spec.project.clone(),
            sync: color_sync_status(&app.status.sync.status),
            health: color_health_status(&app.status.health.status),
            destination: format!("{}/{}", cluster, dest.namespace),
        }
    }
}

/// List applications, optionally restricted to one project
pub async fn list_applications(
    client: &ArgoCdClient,
    project: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let list = client
        .list_applications()
        .await
        .context("Failed to list applications")?;

    let apps: Vec<_> = list
        .items
        .into_iter()
        .filter(|a| project.as_ref().map(|p| &a.spec.project == p).unwrap_or(true))
        .collect();

    match format {
        OutputFormat::Json => print_json(&apps)?,
        OutputFormat::Table => {
            if apps.is_empty() {
                print_warning("No applications found");
                return Ok(());
            }
            print_table(apps.iter().map(ApplicationRow::from).collect());
            println!("\nTotal: {} applications", apps.len());
        }
    }

    Ok(())
}

/// Show one application with its managed resources
pub async fn get_application(
    client: &ArgoCdClient,
    name: &str,
    project: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let app = client
        .get_application(project.as_deref().unwrap_or_default(), name)
        .await
        .with_context(|| format!("Failed to get application {}", name))?;

    match format {
        OutputFormat::Json => print_json(&app)?,
        OutputFormat::Table => {
            println!("{}", "Application".bold());
            println!("{}", "=".repeat(60));
            println!("Name:        {}", app.name().cyan());
            println!("Project:     {}", app.spec.project);
            println!("Server:      {}", app.spec.destination.server);
            println!("Namespace:   {}", app.spec.destination.namespace);
            println!("Sync:        {}", color_sync_status(&app.status.sync.status));
            println!("Health:      {}", color_health_status(&app.status.health.status));
            if let Some(reconciled) = &app.status.reconciled_at {
                println!("Reconciled:  {}", format_timestamp(reconciled));
            }
            println!();

            if app.status.resources.is_empty() {
                print_warning("No managed resources");
                return Ok(());
            }

            let mut resources = app.status.resources.clone();
            resources.sort_by(|a, b| b.sync_wave.cmp(&a.sync_wave));
            let rows = resources
                .iter()
                .map(|r| ResourceRow {
                    wave: r.sync_wave,
                    kind: r.kind.clone(),
                    namespace: r.namespace.clone(),
                    name: r.name.clone(),
                    status: color_sync_status(r.status.as_deref().unwrap_or_default()),
                    scalable: if SCALABLE_KINDS.contains(&r.kind.as_str()) {
                        "yes".green().to_string()
                    } else {
                        String::new()
                    },
                })
                .collect();
            print_table::<ResourceRow>(rows);
        }
    }

    Ok(())
}

pub struct SyncOptions {
    pub prune: bool,
    pub dry_run: bool,
    /// Seconds to wait for Synced + Healthy
    pub wait: Option<u64>,
}

/// Trigger a sync and optionally wait for the application to settle
pub async fn sync_application(
    client: &ArgoCdClient,
    name: &str,
    project: Option<String>,
    options: SyncOptions,
    settings: &ScaleDownConfig,
    format: OutputFormat,
) -> Result<()> {
    let app = client
        .sync_application(name, options.prune, options.dry_run)
        .await
        .with_context(|| format!("Failed to sync application {}", name))?;

    if options.dry_run {
        print_info("Dry run, nothing applied");
    }

    let app = match options.wait {
        Some(secs) if !options.dry_run => {
            print_info(&format!("Waiting up to {}s for {} to become healthy", secs, name));
            wait_for_healthy(
                client,
                project.as_deref().unwrap_or_default(),
                name,
                Duration::from_secs(secs),
                settings.poll_interval(),
            )
            .await?
        }
        _ => app,
    };

    match format {
        OutputFormat::Json => print_json(&app)?,
        OutputFormat::Table => print_success(&format!(
            "Application {} sync={} health={}",
            name,
            color_sync_status(&app.status.sync.status),
            color_health_status(&app.status.health.status)
        )),
    }

    Ok(())
}
