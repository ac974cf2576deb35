//! Pod drain polling for one scaled-down workload
//!
//! Each tick fetches the application's resource tree and counts the pods
//! still owned by the workload. When force deletion is enabled the first
//! tick that still sees pods deletes them directly, once per workload.

use super::orchestrator::ScaleDownRun;
use super::tree::remaining_pods;
use crate::error::ScaleDownError;
use crate::models::{ResourceKey, ResourceRef, ResourceStatus};
use serde::Serialize;
use std::future::Future;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Where a drain target currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum DrainState {
    /// No tree observed yet
    Polling,
    /// Pods were still present at the last tick
    Draining { remaining: usize },
    /// Remaining pods were deleted directly
    ForceDeleteIssued { deleted: usize },
    /// Workload and all its pods are gone
    Drained,
}

/// Outcome of draining one workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub workload: ResourceKey,
    /// The patch hit a workload that was already gone
    pub already_gone: bool,
    pub polls: u32,
    pub force_deleted: usize,
    pub final_state: DrainState,
    pub elapsed_ms: u64,
}

/// Polling state machine for one drain target
pub(crate) struct DrainPoller<'a> {
    run: &'a ScaleDownRun,
    target: &'a ResourceStatus,
    key: ResourceKey,
    wave: i64,
    token: &'a CancellationToken,
    state: DrainState,
    polls: u32,
    force_deleted: usize,
    force_issued: bool,
    last_remaining: Option<usize>,
}

impl<'a> DrainPoller<'a> {
    pub(crate) fn new(
        run: &'a ScaleDownRun,
        target: &'a ResourceStatus,
        wave: i64,
        token: &'a CancellationToken,
    ) -> Self {
        Self {
            run,
            target,
            key: target.key(),
            wave,
            token,
            state: DrainState::Polling,
            polls: 0,
            force_deleted: 0,
            force_issued: false,
            last_remaining: None,
        }
    }

    /// Poll until the workload's pods are gone or the token is cancelled
    pub(crate) async fn drain(mut self, already_gone: bool) -> Result<DrainReport, ScaleDownError> {
        let started = Instant::now();
        let period = self.run.poll_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return Err(self.timed_out()),
                _ = ticker.tick() => {}
            }

            if self.tick().await? {
                let report = DrainReport {
                    workload: self.key.clone(),
                    already_gone,
                    polls: self.polls,
                    force_deleted: self.force_deleted,
                    final_state: self.state,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };
                self.run.logger.workload_drained(self.wave, &self.key, self.polls);
                return Ok(report);
            }
        }
    }

    /// One poll; returns true once the target is drained
    async fn tick(&mut self) -> Result<bool, ScaleDownError> {
        self.polls += 1;
        self.run.metrics.inc_tree_polls();

        let run = self.run;
        let tree = self
            .cancellable(run.control.resource_tree(&run.request.project, &run.request.application))
            .await?
            .map_err(|source| ScaleDownError::TreeFetch {
                wave: self.wave,
                workload: self.key.clone(),
                source,
            })?;

        let pods = match remaining_pods(&tree, &self.key) {
            None => {
                debug!(workload = %self.key, "Workload no longer in resource tree");
                self.state = DrainState::Drained;
                return Ok(true);
            }
            Some(pods) if pods.is_empty() => {
                self.state = DrainState::Drained;
                return Ok(true);
            }
            Some(pods) => pods,
        };

        self.last_remaining = Some(pods.len());
        self.state = DrainState::Draining {
            remaining: pods.len(),
        };
        self.run.logger.pods_remaining(self.wave, &self.key, pods.len());

        if self.run.request.force_delete && !self.force_issued {
            let deleted = self.force_delete(&pods).await?;
            self.force_issued = true;
            self.force_deleted = deleted;
            self.state = DrainState::ForceDeleteIssued { deleted };
        }

        Ok(false)
    }

    /// Delete every currently observed pod once, tolerating pods that are already gone
    async fn force_delete(&self, pods: &[ResourceRef]) -> Result<usize, ScaleDownError> {
        let grace = self.run.request.grace_period_secs;
        let deleter = self.cancellable(self.run.pod_deleter(self.wave, &self.key)).await??;

        self.run
            .logger
            .force_delete_issued(self.wave, &self.key, pods.len(), grace);

        let mut deleted = 0;
        for pod in pods {
            let result = self
                .cancellable(deleter.delete_pod(&pod.namespace, &pod.name, grace))
                .await?;
            match result {
                Ok(()) => deleted += 1,
                Err(e) if e.is_not_found() => {
                    debug!(pod = %pod.key(), "Pod already gone");
                }
                Err(source) => {
                    return Err(ScaleDownError::ForceDelete {
                        wave: self.wave,
                        workload: self.key.clone(),
                        pod: pod.key(),
                        source,
                    })
                }
            }
        }

        self.run.metrics.add_pods_force_deleted(deleted as u64);
        Ok(deleted)
    }

    /// Race a network call against cancellation of the run
    async fn cancellable<F: Future>(&self, fut: F) -> Result<F::Output, ScaleDownError> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(self.timed_out()),
            out = fut => Ok(out),
        }
    }

    fn timed_out(&self) -> ScaleDownError {
        debug!(workload = %self.key, target = %self.target.name, state = ?self.state, "Drain cancelled");
        ScaleDownError::Timeout {
            wave: self.wave,
            workload: self.key.clone(),
            remaining_pods: self.last_remaining,
        }
    }
}
