//! Direct access to the workload cluster for forced pod eviction
//!
//! The control plane only exposes declared resources; deleting stuck pods
//! needs a second connection straight to the destination cluster's API server.

use crate::error::RuntimeError;
use crate::models::Destination;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams};
use kube::{Client, Config};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, info};

/// Deletes pods in the workload cluster
#[async_trait]
pub trait PodDeleter: Send + Sync {
    /// Delete a pod with the given grace period
    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_secs: i64,
    ) -> Result<(), RuntimeError>;
}

/// Builds a `PodDeleter` for an application destination
#[async_trait]
pub trait RuntimeConnector: Send + Sync {
    async fn connect(&self, destination: &Destination) -> Result<Arc<dyn PodDeleter>, RuntimeError>;
}

/// Connects to the destination cluster with the control-plane bearer token
pub struct KubeConnector {
    token: Option<String>,
}

impl KubeConnector {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    /// Client configuration for a destination: bearer token, no certificate validation
    pub fn client_config(&self, destination: &Destination) -> Result<Config, RuntimeError> {
        if destination.server.is_empty() {
            return Err(RuntimeError::Client(format!(
                "destination {:?} has no server URL",
                destination.name
            )));
        }

        let cluster_url: http::Uri = destination.server.parse().map_err(|e| {
            RuntimeError::Client(format!("invalid server URL {}: {}", destination.server, e))
        })?;

        let mut config = Config::new(cluster_url);
        config.accept_invalid_certs = true;
        if !destination.namespace.is_empty() {
            config.default_namespace = destination.namespace.clone();
        }
        if let Some(token) = &self.token {
            config.auth_info.token = Some(SecretString::new(token.clone()));
        }
        Ok(config)
    }
}

#[async_trait]
impl RuntimeConnector for KubeConnector {
    async fn connect(&self, destination: &Destination) -> Result<Arc<dyn PodDeleter>, RuntimeError> {
        let config = self.client_config(destination)?;
        let client = Client::try_from(config).map_err(|e| RuntimeError::Client(e.to_string()))?;

        info!(server = %destination.server, "Connected to workload cluster");
        Ok(Arc::new(KubePodDeleter { client }))
    }
}

/// Pod deletion through the Kubernetes API
pub struct KubePodDeleter {
    client: Client,
}

#[async_trait]
impl PodDeleter for KubePodDeleter {
    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_secs: i64,
    ) -> Result<(), RuntimeError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = DeleteParams {
            grace_period_seconds: Some(grace_period(grace_period_secs)),
            ..DeleteParams::default()
        };

        match api.delete(name, &params).await {
            Ok(_) => {
                debug!(namespace, name, "Pod delete accepted");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Err(RuntimeError::NotFound),
            Err(kube::Error::Api(ae)) => Err(RuntimeError::Api {
                code: ae.code,
                message: ae.message,
            }),
            Err(e) => Err(RuntimeError::Client(e.to_string())),
        }
    }
}

fn grace_period(secs: i64) -> u32 {
    u32::try_from(secs.max(0)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_client_config_from_destination() {
        let connector = KubeConnector::new(Some("argocd-token".into()));
        let destination = Destination {
            server: "https://10.0.0.1:6443".into(),
            namespace: "game".into(),
            name: String::new(),
        };

        let config = connector.client_config(&destination).unwrap();
        assert!(config
            .cluster_url
            .to_string()
            .starts_with("https://10.0.0.1:6443"));
        assert!(config.accept_invalid_certs);
        assert_eq!(config.default_namespace, "game");
        assert_eq!(
            config.auth_info.token.as_ref().map(|t| t.expose_secret().as_str()),
            Some("argocd-token")
        );
    }

    #[test]
    fn test_destination_without_server() {
        let connector = KubeConnector::new(None);
        let destination = Destination {
            server: String::new(),
            namespace: "game".into(),
            name: "in-cluster".into(),
        };

        assert!(matches!(
            connector.client_config(&destination),
            Err(RuntimeError::Client(_))
        ));
    }

    #[test]
    fn test_grace_period_clamped() {
        assert_eq!(grace_period(-5), 0);
        assert_eq!(grace_period(30), 30);
        assert_eq!(grace_period(i64::MAX), u32::MAX);
    }
}
