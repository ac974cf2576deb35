//! REST client for the Argo CD API server
//!
//! This module provides an HTTP client that:
//! - Talks to the grpc-gateway REST surface of Argo CD
//! - Bootstraps a session token from username/password when no token is given
//! - Retries the session login once without certificate verification on TLS failure

use super::ControlPlane;
use crate::error::ApiError;
use crate::models::{Application, ApplicationList, ApplicationTree, ResourceStatus};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Configuration for connecting to the Argo CD API server
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, either `host:port` or a full URL
    pub server: String,
    /// Use plain HTTP when the address carries no scheme
    pub plaintext: bool,
    /// Skip TLS certificate verification
    pub tls_no_verify: bool,
    /// Bearer token, takes precedence over username/password
    pub auth_token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Path prefix when the API is served behind a reverse proxy (e.g. "/argocd")
    pub root_path: Option<String>,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            plaintext: false,
            tls_no_verify: false,
            auth_token: None,
            username: None,
            password: None,
            root_path: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize)]
struct SessionCreateRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    #[serde(default)]
    token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncRequest {
    prune: bool,
    dry_run: bool,
}

#[derive(Debug, Deserialize)]
struct VersionMessage {
    #[serde(rename = "Version", default)]
    version: String,
}

/// Argo CD API client
#[derive(Clone)]
pub struct ArgoCdClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
    config: ClientConfig,
}

impl ArgoCdClient {
    /// Create a client without performing any session login
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let base_url = base_url(&config)?;
        let http = http_client(&config)?;
        let token = config.auth_token.clone().filter(|t| !t.is_empty());

        Ok(Self {
            http,
            base_url,
            token,
            config,
        })
    }

    /// Create a client and obtain a session token from username/password if needed
    pub async fn connect(config: ClientConfig) -> Result<Self, ApiError> {
        info!(
            server = %config.server,
            plaintext = config.plaintext,
            tls_no_verify = config.tls_no_verify,
            has_token = config.auth_token.is_some(),
            user = config.username.as_deref().unwrap_or(""),
            "Initializing Argo CD client"
        );

        let mut client = Self::new(config)?;
        if client.token.is_some() {
            return Ok(client);
        }
        let Some(username) = client.config.username.clone() else {
            return Ok(client);
        };
        let password = client.config.password.clone().unwrap_or_default();

        debug!(user = %username, "No token, creating session");
        let token = match client.create_session(&username, &password).await {
            Ok(token) => token,
            Err(ApiError::Transport(e)) if is_certificate_error(&e) && !client.config.tls_no_verify => {
                warn!("Session login failed certificate verification, retrying with tls-no-verify");
                let mut config = client.config.clone();
                config.tls_no_verify = true;
                client = Self::new(config)?;
                client.create_session(&username, &password).await?
            }
            Err(e) => return Err(e),
        };

        if !token.is_empty() {
            info!("Session login succeeded");
            client.token = Some(token);
        }
        Ok(client)
    }

    /// Base URL all API paths are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Configuration the client was built from (with TLS fallback applied)
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current session token
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    async fn create_session(&self, username: &str, password: &str) -> Result<String, ApiError> {
        let request = self
            .http
            .post(self.url(&["api", "v1", "session"])?)
            .json(&SessionCreateRequest { username, password });
        let response: SessionResponse = self.send(request).await?;
        Ok(response.token)
    }

    /// Probe connectivity and return the server version
    pub async fn version(&self) -> Result<String, ApiError> {
        let request = self.authorized(self.http.get(self.url(&["api", "version"])?));
        let response: VersionMessage = self.send(request).await?;
        Ok(response.version)
    }

    /// List all applications visible to the session
    pub async fn list_applications(&self) -> Result<ApplicationList, ApiError> {
        let request = self.authorized(self.http.get(self.url(&["api", "v1", "applications"])?));
        self.send(request).await
    }

    /// Trigger a sync of an application
    pub async fn sync_application(
        &self,
        name: &str,
        prune: bool,
        dry_run: bool,
    ) -> Result<Application, ApiError> {
        let url = self.url(&["api", "v1", "applications", name, "sync"])?;
        let request = self
            .authorized(self.http.post(url))
            .json(&SyncRequest { prune, dry_run });
        self.send(request).await
    }

    /// Append path segments to the base URL, percent-encoding each one
    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ApiError::from_response(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn send_discarding(&self, request: RequestBuilder) -> Result<(), ApiError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_response(status.as_u16(), &body));
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for ArgoCdClient {
    async fn get_application(&self, project: &str, name: &str) -> Result<Application, ApiError> {
        let url = self.url(&["api", "v1", "applications", name])?;
        let mut request = self.authorized(self.http.get(url));
        if !project.is_empty() {
            request = request.query(&[("projects", project)]);
        }
        self.send(request).await
    }

    async fn resource_tree(&self, project: &str, name: &str) -> Result<ApplicationTree, ApiError> {
        let url = self.url(&["api", "v1", "applications", name, "resource-tree"])?;
        let mut request = self.authorized(self.http.get(url));
        if !project.is_empty() {
            request = request.query(&[("project", project)]);
        }
        self.send(request).await
    }

    async fn patch_resource(
        &self,
        project: &str,
        application: &str,
        resource: &ResourceStatus,
        patch_type: &str,
        patch: &str,
    ) -> Result<(), ApiError> {
        let url = self.url(&["api", "v1", "applications", application, "resource"])?;
        let mut query = vec![
            ("namespace", resource.namespace.as_str()),
            ("resourceName", resource.name.as_str()),
            ("version", resource.version.as_str()),
            ("group", resource.group.as_str()),
            ("kind", resource.kind.as_str()),
            ("patchType", patch_type),
        ];
        if !project.is_empty() {
            query.push(("project", project));
        }

        // The gateway maps the request body onto the string `patch` field
        let request = self.authorized(self.http.post(url)).query(&query).json(&patch);
        self.send_discarding(request).await
    }

    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// Builder for `ArgoCdClient`
pub struct ArgoCdClientBuilder {
    config: ClientConfig,
}

impl ArgoCdClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.config.server = server.into();
        self
    }

    pub fn plaintext(mut self, plaintext: bool) -> Self {
        self.config.plaintext = plaintext;
        self
    }

    pub fn tls_no_verify(mut self, skip: bool) -> Self {
        self.config.tls_no_verify = skip;
        self
    }

    pub fn auth_token(mut self, token: Option<String>) -> Self {
        self.config.auth_token = token;
        self
    }

    pub fn credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.config.username = username;
        self.config.password = password;
        self
    }

    pub fn root_path(mut self, root_path: Option<String>) -> Self {
        self.config.root_path = root_path;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn into_config(self) -> ClientConfig {
        self.config
    }

    /// Build the client without logging in
    pub fn build(self) -> Result<ArgoCdClient, ApiError> {
        ArgoCdClient::new(self.config)
    }

    /// Build the client and bootstrap a session if needed
    pub async fn connect(self) -> Result<ArgoCdClient, ApiError> {
        ArgoCdClient::connect(self.config).await
    }
}

impl Default for ArgoCdClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn http_client(config: &ClientConfig) -> Result<Client, ApiError> {
    Ok(Client::builder()
        .timeout(config.request_timeout)
        .danger_accept_invalid_certs(config.tls_no_verify)
        .build()?)
}

/// Resolve the server address and root path into a base URL ending in `/`
fn base_url(config: &ClientConfig) -> Result<Url, ApiError> {
    let server = config.server.trim().trim_end_matches('/');
    if server.is_empty() {
        return Err(ApiError::InvalidUrl("server address must not be empty".into()));
    }

    let address = if server.contains("://") {
        server.to_string()
    } else if config.plaintext {
        format!("http://{}", server)
    } else {
        format!("https://{}", server)
    };

    let root = config
        .root_path
        .as_deref()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty());
    let full = match root {
        Some(root) => format!("{}/{}/", address, root),
        None => format!("{}/", address),
    };

    Url::parse(&full).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", full, e)))
}

/// Whether a transport error was caused by certificate verification
fn is_certificate_error(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        let text = e.to_string();
        if text.contains("certificate") || text.contains("UnknownIssuer") {
            return true;
        }
        source = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argocd::{MERGE_PATCH_TYPE, ZERO_REPLICAS_PATCH};
    use mockito::Matcher;
    use serde_json::json;

    fn config_for(server: &str) -> ClientConfig {
        ClientConfig {
            server: server.to_string(),
            auth_token: Some("tok".to_string()),
            ..Default::default()
        }
    }

    fn deployment() -> ResourceStatus {
        ResourceStatus {
            group: "apps".into(),
            version: "v1".into(),
            kind: "Deployment".into(),
            namespace: "game".into(),
            name: "api".into(),
            sync_wave: 2,
            status: None,
        }
    }

    #[test]
    fn test_base_url_resolution() {
        let mut config = ClientConfig {
            server: "argocd.example.com:443".into(),
            ..Default::default()
        };
        assert_eq!(base_url(&config).unwrap().as_str(), "https://argocd.example.com/");

        config.plaintext = true;
        config.server = "localhost:8080".into();
        assert_eq!(base_url(&config).unwrap().as_str(), "http://localhost:8080/");

        config.root_path = Some("/argocd/".into());
        assert_eq!(
            base_url(&config).unwrap().as_str(),
            "http://localhost:8080/argocd/"
        );

        config.server = "https://cd.example.com/".into();
        config.root_path = None;
        assert_eq!(base_url(&config).unwrap().as_str(), "https://cd.example.com/");
    }

    #[test]
    fn test_empty_server_rejected() {
        let result = ArgoCdClient::new(ClientConfig::default());
        assert!(matches!(result, Err(ApiError::InvalidUrl(_))));
    }

    #[test]
    fn test_builder_pattern() {
        let client = ArgoCdClientBuilder::new()
            .server("argocd.example.com")
            .auth_token(Some("abc".into()))
            .root_path(Some("api-proxy".into()))
            .request_timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        assert_eq!(client.token(), Some("abc"));
        assert_eq!(client.base_url().as_str(), "https://argocd.example.com/api-proxy/");
        assert_eq!(client.config().request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_application_names_are_single_path_segments() {
        let client = ArgoCdClient::new(config_for("https://cd.example.com/argocd")).unwrap();

        let url = client
            .url(&["api", "v1", "applications", "demo", "resource-tree"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://cd.example.com/argocd/api/v1/applications/demo/resource-tree"
        );

        let url = client
            .url(&["api", "v1", "applications", "a/b?x#y", "sync"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://cd.example.com/argocd/api/v1/applications/a%2Fb%3Fx%23y/sync"
        );
    }

    #[tokio::test]
    async fn test_get_application() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/applications/demo")
            .match_query(Matcher::UrlEncoded("projects".into(), "games".into()))
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "metadata": {"name": "demo", "namespace": "argocd"},
                    "spec": {
                        "project": "games",
                        "destination": {"server": "https://10.0.0.1:6443", "namespace": "game"}
                    },
                    "status": {
                        "resources": [
                            {"group": "apps", "version": "v1", "kind": "Deployment", "namespace": "game", "name": "api", "syncWave": 2},
                            {"version": "v1", "kind": "Service", "namespace": "game", "name": "api"}
                        ],
                        "sync": {"status": "Synced"},
                        "health": {"status": "Healthy"}
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = ArgoCdClient::new(config_for(&server.url())).unwrap();
        let app = client.get_application("games", "demo").await.unwrap();

        mock.assert_async().await;
        assert_eq!(app.name(), "demo");
        assert_eq!(app.spec.destination.server, "https://10.0.0.1:6443");
        assert_eq!(app.status.resources.len(), 2);
        assert_eq!(app.status.resources[0].sync_wave, 2);
        assert_eq!(app.status.resources[1].sync_wave, 0);
    }

    #[tokio::test]
    async fn test_resource_tree() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/applications/demo/resource-tree")
            .match_query(Matcher::UrlEncoded("project".into(), "games".into()))
            .with_status(200)
            .with_body(
                json!({
                    "nodes": [
                        {"group": "apps", "version": "v1", "kind": "Deployment", "namespace": "game", "name": "api"},
                        {"version": "v1", "kind": "Pod", "namespace": "game", "name": "api-1",
                         "parentRefs": [{"group": "apps", "kind": "ReplicaSet", "namespace": "game", "name": "api-7d9f"}]}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = ArgoCdClient::new(config_for(&server.url())).unwrap();
        let tree = client.resource_tree("games", "demo").await.unwrap();

        mock.assert_async().await;
        assert_eq!(tree.nodes.len(), 2);
        assert_eq!(tree.nodes[1].parent_refs[0].kind, "ReplicaSet");
    }

    #[tokio::test]
    async fn test_patch_resource_request_shape() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/applications/demo/resource")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("namespace".into(), "game".into()),
                Matcher::UrlEncoded("resourceName".into(), "api".into()),
                Matcher::UrlEncoded("version".into(), "v1".into()),
                Matcher::UrlEncoded("group".into(), "apps".into()),
                Matcher::UrlEncoded("kind".into(), "Deployment".into()),
                Matcher::UrlEncoded("patchType".into(), MERGE_PATCH_TYPE.into()),
                Matcher::UrlEncoded("project".into(), "games".into()),
            ]))
            .match_header("authorization", "Bearer tok")
            .match_body(Matcher::Json(json!(ZERO_REPLICAS_PATCH)))
            .with_status(200)
            .with_body(r#"{"manifest":"{}"}"#)
            .create_async()
            .await;

        let client = ArgoCdClient::new(config_for(&server.url())).unwrap();
        client
            .patch_resource(
                "games",
                "demo",
                &deployment(),
                MERGE_PATCH_TYPE,
                ZERO_REPLICAS_PATCH,
            )
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_patch_resource_not_found_is_classified() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v1/applications/demo/resource")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(
                r#"{"error":"Deployment game/api not found as part of application demo","code":5,"message":"Deployment game/api not found as part of application demo"}"#,
            )
            .create_async()
            .await;

        let client = ArgoCdClient::new(config_for(&server.url())).unwrap();
        let err = client
            .patch_resource("games", "demo", &deployment(), "t", "{}")
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_session_login_sets_token() {
        let mut server = mockito::Server::new_async().await;
        let login = server
            .mock("POST", "/api/v1/session")
            .match_body(Matcher::Json(json!({"username": "admin", "password": "secret"})))
            .with_status(200)
            .with_body(r#"{"token":"session-token"}"#)
            .create_async()
            .await;
        let version = server
            .mock("GET", "/api/version")
            .match_header("authorization", "Bearer session-token")
            .with_status(200)
            .with_body(r#"{"Version":"v2.10.4"}"#)
            .create_async()
            .await;

        let client = ArgoCdClientBuilder::new()
            .server(server.url())
            .credentials(Some("admin".into()), Some("secret".into()))
            .connect()
            .await
            .unwrap();

        assert_eq!(client.bearer_token().as_deref(), Some("session-token"));
        assert_eq!(client.version().await.unwrap(), "v2.10.4");
        login.assert_async().await;
        version.assert_async().await;
    }

    #[tokio::test]
    async fn test_session_login_failure_propagates() {
        let mut server = mockito::Server::new_async().await;
        let _login = server
            .mock("POST", "/api/v1/session")
            .with_status(401)
            .with_body(r#"{"error":"Invalid username or password","code":16,"message":"Invalid username or password"}"#)
            .create_async()
            .await;

        let result = ArgoCdClientBuilder::new()
            .server(server.url())
            .credentials(Some("admin".into()), Some("wrong".into()))
            .connect()
            .await;

        match result {
            Err(ApiError::Status { status, code, .. }) => {
                assert_eq!(status, 401);
                assert_eq!(code, Some(16));
            }
            other => panic!("expected status error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_sync_application() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/applications/demo/sync")
            .match_body(Matcher::Json(json!({"prune": true, "dryRun": false})))
            .with_status(200)
            .with_body(r#"{"metadata":{"name":"demo"}}"#)
            .create_async()
            .await;

        let client = ArgoCdClient::new(config_for(&server.url())).unwrap();
        let app = client.sync_application("demo", true, false).await.unwrap();

        mock.assert_async().await;
        assert_eq!(app.name(), "demo");
    }
}
