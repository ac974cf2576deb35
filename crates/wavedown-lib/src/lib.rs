//! Sync-wave ordered scale-down for Argo CD applications
//!
//! This crate provides the core functionality for:
//! - Talking to the Argo CD API server (applications, resource trees, patches)
//! - Discovering scalable workloads and grouping them by sync wave
//! - Draining workloads wave by wave with optional forced pod deletion
//! - Application health tracking and observability

pub mod argocd;
pub mod config;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod runtime;
pub mod scale;

pub use argocd::{ArgoCdClient, ArgoCdClientBuilder, ClientConfig, ControlPlane};
pub use config::ScaleDownConfig;
pub use error::{ApiError, RuntimeError, ScaleDownError};
pub use models::*;
pub use observability::{ScaleDownLogger, ScaleDownMetrics};
pub use runtime::{KubeConnector, PodDeleter, RuntimeConnector};
pub use scale::{
    DrainReport, DrainState, ScaleDownReport, ScaleDownRequest, WaveGroup, WaveReport,
    WaveScheduler,
};
