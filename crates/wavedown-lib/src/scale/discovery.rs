//! Scalable workload discovery and sync-wave grouping

use crate::argocd::ControlPlane;
use crate::error::ScaleDownError;
use crate::models::{Application, ResourceStatus};
use serde::Serialize;
use tracing::debug;

/// Kinds whose instance count is driven by `spec.replicas`
pub const SCALABLE_KINDS: &[&str] = &["Deployment", "StatefulSet", "GameDeployment", "GameStatefulSet"];

/// Workloads sharing one sync wave, torn down together
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaveGroup {
    pub wave: i64,
    pub workloads: Vec<ResourceStatus>,
}

impl WaveGroup {
    pub fn len(&self) -> usize {
        self.workloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }
}

pub fn is_scalable_kind(kind: &str) -> bool {
    SCALABLE_KINDS.contains(&kind)
}

/// Scalable workloads of an application, stably sorted by sync wave descending
pub fn scalable_workloads(app: &Application) -> Vec<ResourceStatus> {
    let mut workloads: Vec<ResourceStatus> = app
        .status
        .resources
        .iter()
        .filter(|r| is_scalable_kind(&r.kind))
        .cloned()
        .collect();
    workloads.sort_by(|a, b| b.sync_wave.cmp(&a.sync_wave));
    workloads
}

/// Partition wave-sorted workloads into groups at sync wave boundaries
pub fn group_by_wave(workloads: Vec<ResourceStatus>) -> Vec<WaveGroup> {
    let mut groups: Vec<WaveGroup> = Vec::new();
    let mut current: Option<WaveGroup> = None;

    for workload in workloads {
        match current.as_mut() {
            Some(group) if group.wave == workload.sync_wave => group.workloads.push(workload),
            _ => {
                if let Some(done) = current.take() {
                    groups.push(done);
                }
                current = Some(WaveGroup {
                    wave: workload.sync_wave,
                    workloads: vec![workload],
                });
            }
        }
    }
    if let Some(done) = current {
        groups.push(done);
    }

    groups
}

/// Fetch an application and return its scalable workloads grouped by wave, highest first
pub async fn discover(
    control: &dyn ControlPlane,
    project: &str,
    application: &str,
) -> Result<Vec<WaveGroup>, ScaleDownError> {
    let app = control
        .get_application(project, application)
        .await
        .map_err(|source| ScaleDownError::Discovery {
            project: project.to_string(),
            application: application.to_string(),
            source,
        })?;

    let workloads = scalable_workloads(&app);
    for w in &workloads {
        debug!(wave = w.sync_wave, workload = %w.key(), "Scalable workload");
    }

    Ok(group_by_wave(workloads))
}
