//! Observability for scale-down runs
//!
//! Provides:
//! - Prometheus metrics (patches, forced evictions, wave progress, drain latency)
//! - Structured logging of run events with tracing

use crate::models::ResourceKey;
use prometheus::{
    register_histogram, register_int_counter, Encoder, Histogram, IntCounter, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for drain durations (in seconds)
const DRAIN_BUCKETS: &[f64] = &[1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ScaleDownMetricsInner> = OnceLock::new();

struct ScaleDownMetricsInner {
    workloads_patched: IntCounter,
    pods_force_deleted: IntCounter,
    waves_completed: IntCounter,
    tree_polls: IntCounter,
    drain_duration_seconds: Histogram,
}

impl ScaleDownMetricsInner {
    fn new() -> Self {
        Self {
            workloads_patched: register_int_counter!(
                "wavedown_workloads_patched_total",
                "Workloads whose replica count was patched to zero"
            )
            .expect("Failed to register workloads_patched"),

            pods_force_deleted: register_int_counter!(
                "wavedown_pods_force_deleted_total",
                "Pods deleted directly through the workload cluster API"
            )
            .expect("Failed to register pods_force_deleted"),

            waves_completed: register_int_counter!(
                "wavedown_waves_completed_total",
                "Sync waves fully drained"
            )
            .expect("Failed to register waves_completed"),

            tree_polls: register_int_counter!(
                "wavedown_tree_polls_total",
                "Resource tree fetches made while draining workloads"
            )
            .expect("Failed to register tree_polls"),

            drain_duration_seconds: register_histogram!(
                "wavedown_drain_duration_seconds",
                "Time from patching a workload to observing all of its pods gone",
                DRAIN_BUCKETS.to_vec()
            )
            .expect("Failed to register drain_duration_seconds"),
        }
    }
}

/// Handle to the process-wide scale-down metrics
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct ScaleDownMetrics {
    _private: (),
}

impl Default for ScaleDownMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ScaleDownMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ScaleDownMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ScaleDownMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_workloads_patched(&self) {
        self.inner().workloads_patched.inc();
    }

    pub fn add_pods_force_deleted(&self, count: u64) {
        self.inner().pods_force_deleted.inc_by(count);
    }

    pub fn inc_waves_completed(&self) {
        self.inner().waves_completed.inc();
    }

    pub fn inc_tree_polls(&self) {
        self.inner().tree_polls.inc();
    }

    pub fn observe_drain_duration(&self, duration_secs: f64) {
        self.inner().drain_duration_seconds.observe(duration_secs);
    }

    /// Render every registered metric in the Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Structured logger for scale-down events
#[derive(Clone)]
pub struct ScaleDownLogger {
    project: String,
    application: String,
}

impl ScaleDownLogger {
    pub fn new(project: impl Into<String>, application: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            application: application.into(),
        }
    }

    pub fn scale_down_started(&self, force_delete: bool, grace_period_secs: i64) {
        info!(
            event = "scale_down_started",
            project = %self.project,
            application = %self.application,
            force_delete,
            grace_period_secs,
            "Starting scale down"
        );
    }

    pub fn workloads_discovered(&self, workloads: usize, waves: usize) {
        info!(
            event = "workloads_discovered",
            application = %self.application,
            workloads,
            waves,
            "Found scalable workloads (sorted by sync wave desc)"
        );
    }

    pub fn wave_started(&self, wave: i64, workloads: usize) {
        info!(
            event = "wave_started",
            application = %self.application,
            wave,
            workloads,
            "Processing wave in parallel"
        );
    }

    pub fn workload_patched(&self, wave: i64, workload: &ResourceKey, already_gone: bool) {
        info!(
            event = "workload_patched",
            application = %self.application,
            wave,
            workload = %workload,
            already_gone,
            "Patched replicas=0"
        );
    }

    pub fn pods_remaining(&self, wave: i64, workload: &ResourceKey, remaining: usize) {
        info!(
            event = "pods_remaining",
            application = %self.application,
            wave,
            workload = %workload,
            remaining,
            "Waiting for pods to terminate"
        );
    }

    pub fn force_delete_issued(
        &self,
        wave: i64,
        workload: &ResourceKey,
        pods: usize,
        grace_period_secs: i64,
    ) {
        warn!(
            event = "force_delete_issued",
            application = %self.application,
            wave,
            workload = %workload,
            pods,
            grace_period_secs,
            "Force deleting remaining pods"
        );
    }

    pub fn workload_drained(&self, wave: i64, workload: &ResourceKey, polls: u32) {
        info!(
            event = "workload_drained",
            application = %self.application,
            wave,
            workload = %workload,
            polls,
            "All pods deleted"
        );
    }

    pub fn wave_completed(&self, wave: i64) {
        info!(
            event = "wave_completed",
            application = %self.application,
            wave,
            "Wave completed"
        );
    }

    pub fn scale_down_finished(&self, waves: usize, elapsed_secs: f64) {
        info!(
            event = "scale_down_finished",
            project = %self.project,
            application = %self.application,
            waves,
            elapsed_secs,
            "Scale down finished"
        );
    }

    pub fn scale_down_failed(&self, error: &str) {
        warn!(
            event = "scale_down_failed",
            project = %self.project,
            application = %self.application,
            error = %error,
            "Scale down aborted"
        );
    }
}
