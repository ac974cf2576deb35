//! Wavedown CLI
//!
//! A command-line tool for inspecting Argo CD applications and scaling
//! their workloads down in reverse sync-wave order.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{app, down, login};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wavedown_lib::ScaleDownConfig;

/// Wavedown CLI
#[derive(Parser)]
#[command(name = "wavedown")]
#[command(author, version, about = "Sync-wave ordered scale-down for Argo CD applications", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub connection: client::ConnectionArgs,

    /// Output format
    #[arg(long, short, default_value = "table", global = true)]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in to Argo CD and check connectivity
    Login {
        /// Save server and session token to the config file
        #[arg(long)]
        save: bool,
    },

    /// Application commands
    #[command(subcommand)]
    App(AppCommands),
}

#[derive(Subcommand)]
pub enum AppCommands {
    /// List applications
    List {
        /// Only show applications of this project
        #[arg(long, short)]
        project: Option<String>,
    },

    /// Show an application and its resources
    Get {
        /// Application name
        name: String,

        /// Project the application belongs to
        #[arg(long, short)]
        project: Option<String>,
    },

    /// Sync an application
    Sync {
        /// Application name
        name: String,

        /// Project the application belongs to
        #[arg(long, short)]
        project: Option<String>,

        /// Delete resources no longer in git
        #[arg(long)]
        prune: bool,

        /// Preview the sync without applying it
        #[arg(long)]
        dry_run: bool,

        /// Wait up to this many seconds for the application to become healthy
        #[arg(long, value_name = "SECONDS")]
        wait: Option<u64>,
    },

    /// Scale all workloads to zero, highest sync wave first
    Down {
        /// Application name
        name: String,

        /// Project the application belongs to
        #[arg(long, short)]
        project: Option<String>,

        /// Force delete pods that are still running after the patch
        #[arg(long)]
        no_grace: bool,

        /// Grace period for forced pod deletion (requires --no-grace)
        #[arg(long, value_name = "SECONDS")]
        grace_period: Option<i64>,

        /// Overall deadline in seconds (default 30 minutes)
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,

        /// Write Prometheus metrics of the run to this file
        #[arg(long)]
        metrics_file: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let file = config::Config::load()?;
    let settings = ScaleDownConfig::load()?;

    match cli.command {
        Commands::Login { save } => {
            login::login(&cli.connection, &file, save, cli.format).await?;
        }
        Commands::App(app_cmd) => {
            let client = client::connect(&cli.connection, &file).await?;
            match app_cmd {
                AppCommands::List { project } => {
                    let project = client::resolve_project(project, &file);
                    app::list_applications(&client, project, cli.format).await?;
                }
                AppCommands::Get { name, project } => {
                    let project = client::resolve_project(project, &file);
                    app::get_application(&client, &name, project, cli.format).await?;
                }
                AppCommands::Sync {
                    name,
                    project,
                    prune,
                    dry_run,
                    wait,
                } => {
                    let project = client::resolve_project(project, &file);
                    let options = app::SyncOptions {
                        prune,
                        dry_run,
                        wait,
                    };
                    app::sync_application(&client, &name, project, options, &settings, cli.format)
                        .await?;
                }
                AppCommands::Down {
                    name,
                    project,
                    no_grace,
                    grace_period,
                    timeout,
                    metrics_file,
                } => {
                    let options = down::DownOptions {
                        name,
                        project: client::resolve_project(project, &file),
                        no_grace,
                        grace_period,
                        timeout,
                        metrics_file,
                    };
                    down::scale_down(client, settings, options, cli.format).await?;
                }
            }
        }
    }

    Ok(())
}
