//! Wave-ordered scale-down of an application's workloads
//!
//! Waves are processed from the highest sync wave to the lowest. Every
//! workload of a wave is patched to zero replicas and drained concurrently,
//! and the next wave only starts once the whole wave has drained. The first
//! failure inside a wave cancels its siblings and aborts the run.

use super::discovery::{discover, WaveGroup};
use super::poller::{DrainPoller, DrainReport};
use crate::argocd::{ControlPlane, MERGE_PATCH_TYPE, ZERO_REPLICAS_PATCH};
use crate::config::ScaleDownConfig;
use crate::error::{RuntimeError, ScaleDownError};
use crate::models::{ResourceKey, ResourceStatus};
use crate::observability::{ScaleDownLogger, ScaleDownMetrics};
use crate::runtime::{PodDeleter, RuntimeConnector};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One scale-down invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScaleDownRequest {
    pub project: String,
    pub application: String,
    /// Delete pods directly once they are observed after the patch
    pub force_delete: bool,
    /// Grace period for forced deletions; only meaningful with `force_delete`
    pub grace_period_secs: i64,
}

impl ScaleDownRequest {
    pub fn new(project: impl Into<String>, application: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            application: application.into(),
            ..Default::default()
        }
    }

    pub fn with_force_delete(mut self, grace_period_secs: i64) -> Self {
        self.force_delete = true;
        self.grace_period_secs = grace_period_secs;
        self
    }
}

/// Drain outcome of one wave
#[derive(Debug, Clone, Serialize)]
pub struct WaveReport {
    pub wave: i64,
    pub workloads: Vec<DrainReport>,
}

/// Outcome of a completed scale-down
#[derive(Debug, Clone, Serialize)]
pub struct ScaleDownReport {
    pub project: String,
    pub application: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub waves: Vec<WaveReport>,
}

impl ScaleDownReport {
    pub fn workloads(&self) -> usize {
        self.waves.iter().map(|w| w.workloads.len()).sum()
    }

    pub fn pods_force_deleted(&self) -> usize {
        self.waves
            .iter()
            .flat_map(|w| w.workloads.iter())
            .map(|d| d.force_deleted)
            .sum()
    }
}

/// Runs scale-downs against a control plane
#[derive(Clone)]
pub struct WaveScheduler {
    control: Arc<dyn ControlPlane>,
    connector: Arc<dyn RuntimeConnector>,
    config: ScaleDownConfig,
    metrics: ScaleDownMetrics,
}

impl WaveScheduler {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        connector: Arc<dyn RuntimeConnector>,
        config: ScaleDownConfig,
    ) -> Self {
        Self {
            control,
            connector,
            config,
            metrics: ScaleDownMetrics::new(),
        }
    }

    pub fn config(&self) -> &ScaleDownConfig {
        &self.config
    }

    /// Scale every workload of an application to zero, wave by wave.
    ///
    /// Cancelling `token` makes every in-flight drain return
    /// [`ScaleDownError::Timeout`], or [`ScaleDownError::DiscoveryCancelled`]
    /// while the workloads are still being discovered.
    pub async fn scale_down_by_sync_wave(
        &self,
        request: ScaleDownRequest,
        token: CancellationToken,
    ) -> Result<ScaleDownReport, ScaleDownError> {
        let run = Arc::new(ScaleDownRun::new(self, request));
        run.execute(token).await
    }

    /// Like [`Self::scale_down_by_sync_wave`] with an overall deadline.
    ///
    /// `cancel` still aborts the run early, e.g. on Ctrl-C.
    pub async fn scale_down_with_deadline(
        &self,
        request: ScaleDownRequest,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> Result<ScaleDownReport, ScaleDownError> {
        let token = cancel.child_token();
        let timer = tokio::spawn({
            let token = token.clone();
            async move {
                tokio::time::sleep(deadline).await;
                debug!(deadline_secs = deadline.as_secs(), "Scale down deadline reached");
                token.cancel();
            }
        });

        let result = self.scale_down_by_sync_wave(request, token).await;
        timer.abort();
        result
    }

    /// Scale down using the configured deadline
    pub async fn scale_down(
        &self,
        request: ScaleDownRequest,
        cancel: CancellationToken,
    ) -> Result<ScaleDownReport, ScaleDownError> {
        self.scale_down_with_deadline(request, self.config.deadline(), cancel)
            .await
    }
}

/// State shared by every task of a single run
pub(crate) struct ScaleDownRun {
    pub(crate) control: Arc<dyn ControlPlane>,
    connector: Arc<dyn RuntimeConnector>,
    pub(crate) request: ScaleDownRequest,
    pub(crate) poll_interval: Duration,
    pub(crate) metrics: ScaleDownMetrics,
    pub(crate) logger: ScaleDownLogger,
    /// Workload cluster handle, built on the first forced deletion
    runtime: OnceCell<Arc<dyn PodDeleter>>,
}

impl ScaleDownRun {
    fn new(scheduler: &WaveScheduler, request: ScaleDownRequest) -> Self {
        let logger = ScaleDownLogger::new(&request.project, &request.application);
        Self {
            control: scheduler.control.clone(),
            connector: scheduler.connector.clone(),
            poll_interval: scheduler.config.poll_interval(),
            metrics: scheduler.metrics.clone(),
            logger,
            request,
            runtime: OnceCell::new(),
        }
    }

    async fn execute(
        self: Arc<Self>,
        token: CancellationToken,
    ) -> Result<ScaleDownReport, ScaleDownError> {
        let started_at = Utc::now();
        let started = Instant::now();
        self.logger
            .scale_down_started(self.request.force_delete, self.request.grace_period_secs);

        let result = self.clone().run_waves(&token).await;
        match result {
            Ok(waves) => {
                self.logger
                    .scale_down_finished(waves.len(), started.elapsed().as_secs_f64());
                Ok(ScaleDownReport {
                    project: self.request.project.clone(),
                    application: self.request.application.clone(),
                    started_at,
                    finished_at: Utc::now(),
                    waves,
                })
            }
            Err(e) => {
                self.logger.scale_down_failed(&e.to_string());
                Err(e)
            }
        }
    }

    async fn run_waves(
        self: Arc<Self>,
        token: &CancellationToken,
    ) -> Result<Vec<WaveReport>, ScaleDownError> {
        let groups = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Err(ScaleDownError::DiscoveryCancelled {
                    project: self.request.project.clone(),
                    application: self.request.application.clone(),
                })
            }
            groups = discover(
                self.control.as_ref(),
                &self.request.project,
                &self.request.application,
            ) => groups?,
        };

        let workloads: usize = groups.iter().map(WaveGroup::len).sum();
        self.logger.workloads_discovered(workloads, groups.len());

        let mut reports = Vec::with_capacity(groups.len());
        for group in groups {
            if group.is_empty() {
                continue;
            }
            let wave = group.wave;
            let report = self.clone().run_wave(group, token).await?;
            self.metrics.inc_waves_completed();
            self.logger.wave_completed(wave);
            reports.push(report);
        }
        Ok(reports)
    }

    /// Drain one wave concurrently; the first failure cancels the rest
    async fn run_wave(
        self: Arc<Self>,
        group: WaveGroup,
        parent: &CancellationToken,
    ) -> Result<WaveReport, ScaleDownError> {
        let wave = group.wave;
        self.logger.wave_started(wave, group.len());

        let wave_token = parent.child_token();
        let mut tasks = JoinSet::new();
        for workload in group.workloads {
            let run = self.clone();
            let token = wave_token.clone();
            tasks.spawn(async move { run.scale_workload(wave, workload, token).await });
        }

        let mut drained = Vec::new();
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|e| ScaleDownError::TaskAborted {
                    wave,
                    reason: e.to_string(),
                })
                .and_then(|r| r);

            match outcome {
                Ok(report) => drained.push(report),
                Err(e) if first_error.is_none() => {
                    debug!(wave, error = %e, "Cancelling remaining workloads of wave");
                    wave_token.cancel();
                    first_error = Some(e);
                }
                Err(e) => debug!(wave, error = %e, "Sibling stopped after cancellation"),
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        drained.sort_by(|a, b| a.workload.cmp(&b.workload));
        Ok(WaveReport {
            wave,
            workloads: drained,
        })
    }

    async fn scale_workload(
        &self,
        wave: i64,
        workload: ResourceStatus,
        token: CancellationToken,
    ) -> Result<DrainReport, ScaleDownError> {
        let started = Instant::now();
        let already_gone = self.patch_replicas_zero(wave, &workload, &token).await?;

        let report = DrainPoller::new(self, &workload, wave, &token)
            .drain(already_gone)
            .await?;
        self.metrics
            .observe_drain_duration(started.elapsed().as_secs_f64());
        Ok(report)
    }

    /// Patch `spec.replicas` to zero; a workload that no longer exists counts as done
    async fn patch_replicas_zero(
        &self,
        wave: i64,
        workload: &ResourceStatus,
        token: &CancellationToken,
    ) -> Result<bool, ScaleDownError> {
        let key = workload.key();
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Err(ScaleDownError::Timeout {
                    wave,
                    workload: key,
                    remaining_pods: None,
                })
            }
            r = self.control.patch_resource(
                &self.request.project,
                &self.request.application,
                workload,
                MERGE_PATCH_TYPE,
                ZERO_REPLICAS_PATCH,
            ) => r,
        };

        let already_gone = match result {
            Ok(()) => {
                self.metrics.inc_workloads_patched();
                false
            }
            Err(e) if e.is_not_found() => true,
            Err(source) => {
                return Err(ScaleDownError::Patch {
                    wave,
                    workload: key,
                    source,
                })
            }
        };

        self.logger.workload_patched(wave, &key, already_gone);
        Ok(already_gone)
    }

    /// Workload cluster handle, connected at most once per run
    pub(crate) async fn pod_deleter(
        &self,
        wave: i64,
        workload: &ResourceKey,
    ) -> Result<Arc<dyn PodDeleter>, ScaleDownError> {
        self.runtime
            .get_or_try_init(|| async {
                let app = self
                    .control
                    .get_application(&self.request.project, &self.request.application)
                    .await
                    .map_err(|e| RuntimeError::Client(format!("fetching destination: {}", e)))?;
                self.connector.connect(&app.spec.destination).await
            })
            .await
            .cloned()
            .map_err(|e| ScaleDownError::RuntimeClient {
                wave,
                workload: workload.clone(),
                reason: e.to_string(),
            })
    }
}
