//! Session login

use anyhow::{Context, Result};
use serde::Serialize;
use wavedown_lib::ArgoCdClient;

use crate::client::{connect, ConnectionArgs};
use crate::config::Config;
use crate::output::{print_info, print_json, print_success, print_warning, OutputFormat};

#[derive(Serialize)]
struct LoginSummary<'a> {
    server: &'a str,
    version: &'a str,
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    saved_to: Option<String>,
}

/// Log in, probe the API version and optionally persist the session
pub async fn login(
    args: &ConnectionArgs,
    file: &Config,
    save: bool,
    format: OutputFormat,
) -> Result<()> {
    let client = connect(args, file).await?;
    let version = client
        .version()
        .await
        .context("Failed to reach the Argo CD API")?;

    let saved_to = if save {
        let path = saved_config(file, &client)
            .save()
            .context("Failed to save session")?;
        Some(path.display().to_string())
    } else {
        None
    };

    match format {
        OutputFormat::Json => print_json(&LoginSummary {
            server: client.base_url().as_str(),
            version: &version,
            authenticated: client.token().is_some(),
            saved_to,
        })?,
        OutputFormat::Table => {
            print_success(&format!(
                "Connected to {} (Argo CD {})",
                client.base_url(),
                version
            ));
            if client.token().is_none() {
                print_warning("No session token; requests are anonymous");
            }
            if let Some(path) = saved_to {
                print_info(&format!("Session saved to {}", path));
            }
        }
    }

    Ok(())
}

/// Config file contents after a successful login
fn saved_config(file: &Config, client: &ArgoCdClient) -> Config {
    let used = client.config();
    Config {
        server: Some(used.server.clone()),
        username: used.username.clone().or_else(|| file.username.clone()),
        auth_token: client.token().map(str::to_string).or_else(|| file.auth_token.clone()),
        default_project: file.default_project.clone(),
        root_path: used.root_path.clone().or_else(|| file.root_path.clone()),
    }
}
