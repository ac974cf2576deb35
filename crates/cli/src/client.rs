//! Argo CD connection setup from flags, environment and the config file

use anyhow::{Context, Result};
use clap::Args;
use wavedown_lib::{ArgoCdClient, ArgoCdClientBuilder, ClientConfig};

use crate::config::Config;

/// Connection flags shared by every command
#[derive(Debug, Clone, Default, Args)]
pub struct ConnectionArgs {
    /// Argo CD server address (host:port or URL)
    #[arg(long, env = "ARGOCD_SERVER", global = true)]
    pub server: Option<String>,

    /// Use plain HTTP instead of TLS
    #[arg(long, global = true)]
    pub insecure: bool,

    /// Skip TLS certificate verification
    #[arg(long, global = true)]
    pub tls_no_verify: bool,

    /// Username for session login
    #[arg(long, env = "ARGOCD_USERNAME", global = true)]
    pub username: Option<String>,

    /// Password for session login
    #[arg(long, env = "ARGOCD_PASSWORD", global = true, hide_env_values = true)]
    pub password: Option<String>,

    /// Bearer token (skips session login)
    #[arg(long, env = "ARGOCD_AUTH_TOKEN", global = true, hide_env_values = true)]
    pub auth_token: Option<String>,

    /// API path prefix when the server sits behind a reverse proxy
    #[arg(long, global = true)]
    pub root_path: Option<String>,
}

/// Merge flags over the config file into a client configuration
pub fn client_config(args: &ConnectionArgs, file: &Config) -> Result<ClientConfig> {
    let server = args
        .server
        .clone()
        .or_else(|| file.server.clone())
        .context("No Argo CD server given (use --server, ARGOCD_SERVER or `wavedown login --save`)")?;

    // an explicit username means a fresh login, not the saved token
    let auth_token = match (&args.auth_token, &args.username) {
        (Some(token), _) => Some(token.clone()),
        (None, Some(_)) => None,
        (None, None) => file.auth_token.clone(),
    };

    let builder = ArgoCdClientBuilder::new()
        .server(server)
        .plaintext(args.insecure)
        .tls_no_verify(args.tls_no_verify)
        .auth_token(auth_token)
        .credentials(
            args.username.clone().or_else(|| file.username.clone()),
            args.password.clone(),
        )
        .root_path(args.root_path.clone().or_else(|| file.root_path.clone()));

    Ok(builder.into_config())
}

/// Build a client and log in if needed
pub async fn connect(args: &ConnectionArgs, file: &Config) -> Result<ArgoCdClient> {
    let config = client_config(args, file)?;
    ArgoCdClient::connect(config)
        .await
        .context("Failed to connect to Argo CD")
}

/// Project from the flag, falling back to the configured default
pub fn resolve_project(flag: Option<String>, file: &Config) -> Option<String> {
    flag.or_else(|| file.default_project.clone())
}
