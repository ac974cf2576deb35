//! Argo CD control-plane access
//!
//! This module provides:
//! - The `ControlPlane` trait the scale-down core talks to
//! - A REST client for the Argo CD API server with session bootstrap

mod client;

pub use client::{ArgoCdClient, ArgoCdClientBuilder, ClientConfig};

use crate::error::ApiError;
use crate::models::{Application, ApplicationTree, ResourceStatus};
use async_trait::async_trait;

/// Patch content type used when scaling workloads
pub const MERGE_PATCH_TYPE: &str = "application/merge-patch+json";

/// Merge patch that sets a workload's replica count to zero
pub const ZERO_REPLICAS_PATCH: &str = r#"{"spec": {"replicas": 0}}"#;

/// Operations the scale-down core needs from the control plane
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Fetch an application with its live resource statuses
    async fn get_application(&self, project: &str, name: &str) -> Result<Application, ApiError>;

    /// Fetch the live resource tree of an application
    async fn resource_tree(&self, project: &str, name: &str) -> Result<ApplicationTree, ApiError>;

    /// Apply a partial update to one live resource of an application
    async fn patch_resource(
        &self,
        project: &str,
        application: &str,
        resource: &ResourceStatus,
        patch_type: &str,
        patch: &str,
    ) -> Result<(), ApiError>;

    /// Bearer token of the current session, if any
    fn bearer_token(&self) -> Option<String>;
}
