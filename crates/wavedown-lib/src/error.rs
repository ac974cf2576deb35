//! Error types for control-plane calls, pod deletion and scale-down runs

use crate::models::ResourceKey;
use serde::Deserialize;
use thiserror::Error;

/// gRPC status code the Argo CD gateway reports for missing objects
pub const GRPC_CODE_NOT_FOUND: i32 = 5;

/// Failure talking to the Argo CD API
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server answered with a non-success status
    #[error("API error ({status}): {message}")]
    Status {
        status: u16,
        code: Option<i32>,
        message: String,
    },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Build a status error from an HTTP status and the raw response body
    pub fn from_response(status: u16, body: &str) -> Self {
        match serde_json::from_str::<GatewayError>(body) {
            Ok(err) => Self::Status {
                status,
                code: err.code,
                message: err
                    .message
                    .or(err.error)
                    .unwrap_or_else(|| body.to_string()),
            },
            Err(_) => Self::Status {
                status,
                code: None,
                message: body.to_string(),
            },
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::Status {
            status: 404,
            code: Some(GRPC_CODE_NOT_FOUND),
            message: message.into(),
        }
    }

    /// True when the object the request addressed does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Status { status, code, .. } => {
                *status == 404 || *code == Some(GRPC_CODE_NOT_FOUND)
            }
            _ => false,
        }
    }
}

/// Error body produced by the grpc-gateway in front of Argo CD
#[derive(Debug, Deserialize)]
struct GatewayError {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<i32>,
    #[serde(default)]
    message: Option<String>,
}

/// Failure deleting a pod through the cluster API
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("pod not found")]
    NotFound,

    #[error("kubernetes API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("kubernetes client error: {0}")]
    Client(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Fatal outcome of a scale-down run
#[derive(Debug, Error)]
pub enum ScaleDownError {
    #[error("failed to discover workloads of application {project}/{application}: {source}")]
    Discovery {
        project: String,
        application: String,
        #[source]
        source: ApiError,
    },

    #[error("scale-down of application {project}/{application} cancelled or timed out during discovery")]
    DiscoveryCancelled { project: String, application: String },

    #[error("wave {wave}: patch replicas=0 for {workload} failed: {source}")]
    Patch {
        wave: i64,
        workload: ResourceKey,
        #[source]
        source: ApiError,
    },

    #[error("wave {wave}: fetching resource tree while draining {workload} failed: {source}")]
    TreeFetch {
        wave: i64,
        workload: ResourceKey,
        #[source]
        source: ApiError,
    },

    #[error("wave {wave}: force delete of pod {pod} for {workload} failed: {source}")]
    ForceDelete {
        wave: i64,
        workload: ResourceKey,
        pod: ResourceKey,
        #[source]
        source: RuntimeError,
    },

    #[error("wave {wave}: cancelled or timed out while draining {workload}")]
    Timeout {
        wave: i64,
        workload: ResourceKey,
        /// Pods still observed at the last poll, if any poll completed
        remaining_pods: Option<usize>,
    },

    #[error("wave {wave}: cannot connect to the workload cluster for {workload}: {reason}")]
    RuntimeClient {
        wave: i64,
        workload: ResourceKey,
        reason: String,
    },

    #[error("wave {wave}: scale-down task aborted: {reason}")]
    TaskAborted { wave: i64, reason: String },
}

impl ScaleDownError {
    /// Wave the failure happened in, if it is tied to one
    pub fn wave(&self) -> Option<i64> {
        match self {
            Self::Discovery { .. } | Self::DiscoveryCancelled { .. } => None,
            Self::Patch { wave, .. }
            | Self::TreeFetch { wave, .. }
            | Self::ForceDelete { wave, .. }
            | Self::Timeout { wave, .. }
            | Self::RuntimeClient { wave, .. }
            | Self::TaskAborted { wave, .. } => Some(*wave),
        }
    }

    /// Workload the failure happened on, if it is tied to one
    pub fn workload(&self) -> Option<&ResourceKey> {
        match self {
            Self::Patch { workload, .. }
            | Self::TreeFetch { workload, .. }
            | Self::ForceDelete { workload, .. }
            | Self::Timeout { workload, .. }
            | Self::RuntimeClient { workload, .. } => Some(workload),
            Self::Discovery { .. }
            | Self::DiscoveryCancelled { .. }
            | Self::TaskAborted { .. } => None,
        }
    }

    /// True when the run was cancelled or ran past its deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::DiscoveryCancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_not_found_by_code() {
        let body = r#"{"error":"Deployment game/api not found as part of application demo","code":5,"message":"Deployment game/api not found as part of application demo"}"#;
        let err = ApiError::from_response(404, body);
        assert!(err.is_not_found());

        // grpc code alone is enough even behind a proxy that rewrites the status
        let err = ApiError::from_response(500, r#"{"code":5,"message":"gone"}"#);
        assert!(err.is_not_found());
    }

    #[test]
    fn test_other_errors_are_not_not_found() {
        let err = ApiError::from_response(403, r#"{"code":7,"message":"permission denied"}"#);
        assert!(!err.is_not_found());

        // message text mentioning "not found" does not matter
        let err = ApiError::from_response(500, "resource not found as part of application");
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn test_scale_down_error_context() {
        let key = ResourceKey::new("apps", "Deployment", "game", "api");
        let err = ScaleDownError::Timeout {
            wave: 3,
            workload: key.clone(),
            remaining_pods: Some(2),
        };
        assert_eq!(err.wave(), Some(3));
        assert_eq!(err.workload(), Some(&key));
        assert!(err.is_timeout());
        assert!(err.to_string().contains("Deployment game/api"));

        let err = ScaleDownError::DiscoveryCancelled {
            project: "games".into(),
            application: "arena".into(),
        };
        assert_eq!(err.wave(), None);
        assert_eq!(err.workload(), None);
        assert!(err.is_timeout());
    }
}
