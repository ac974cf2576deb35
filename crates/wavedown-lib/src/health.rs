//! Application sync and health status tracking
//!
//! Provides typed sync/health status codes and a poller that waits
//! until an application is both synced and healthy.

use crate::argocd::ControlPlane;
use crate::error::ApiError;
use crate::models::Application;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::debug;

/// Sync status of an application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatusCode {
    Synced,
    OutOfSync,
    Unknown,
}

impl SyncStatusCode {
    pub fn parse(status: &str) -> Self {
        match status {
            "Synced" => Self::Synced,
            "OutOfSync" => Self::OutOfSync,
            _ => Self::Unknown,
        }
    }
}

/// Aggregated health of an application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatusCode {
    Healthy,
    Progressing,
    Degraded,
    Suspended,
    Missing,
    Unknown,
}

impl HealthStatusCode {
    pub fn parse(status: &str) -> Self {
        match status {
            "Healthy" => Self::Healthy,
            "Progressing" => Self::Progressing,
            "Degraded" => Self::Degraded,
            "Suspended" => Self::Suspended,
            "Missing" => Self::Missing,
            _ => Self::Unknown,
        }
    }
}

/// Returns true once an application is synced and healthy
pub fn is_synced_and_healthy(app: &Application) -> bool {
    SyncStatusCode::parse(&app.status.sync.status) == SyncStatusCode::Synced
        && HealthStatusCode::parse(&app.status.health.status) == HealthStatusCode::Healthy
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("timed out waiting for application {name} to become healthy (sync={sync}, health={health})")]
    Timeout {
        name: String,
        sync: String,
        health: String,
    },

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Poll an application until it is synced and healthy or the timeout passes
pub async fn wait_for_healthy(
    control: &dyn ControlPlane,
    project: &str,
    name: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Application, WaitError> {
    let expired = tokio::time::sleep_until(Instant::now() + timeout);
    tokio::pin!(expired);
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = (String::new(), String::new());

    let timed_out = |last: (String, String)| WaitError::Timeout {
        name: name.to_string(),
        sync: last.0,
        health: last.1,
    };

    loop {
        tokio::select! {
            _ = &mut expired => return Err(timed_out(last)),
            _ = ticker.tick() => {}
        }

        // a slow read must not outlive the timeout either
        let app = tokio::select! {
            _ = &mut expired => return Err(timed_out(last)),
            app = control.get_application(project, name) => app?,
        };
        if is_synced_and_healthy(&app) {
            return Ok(app);
        }
        debug!(
            application = %name,
            sync = %app.status.sync.status,
            health = %app.status.health.status,
            "Application not healthy yet"
        );
        last = (app.status.sync.status, app.status.health.status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApplicationTree, HealthStatus, ResourceStatus, SyncStatus};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Application that becomes healthy after a number of reads
    struct BecomesHealthy {
        healthy_after: usize,
        reads: AtomicUsize,
        read_delay: Duration,
    }

    impl BecomesHealthy {
        fn new(healthy_after: usize) -> Self {
            Self {
                healthy_after,
                reads: AtomicUsize::new(0),
                read_delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl ControlPlane for BecomesHealthy {
        async fn get_application(&self, _project: &str, name: &str) -> Result<Application, ApiError> {
            tokio::time::sleep(self.read_delay).await;
            let reads = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            let mut app = Application::default();
            app.metadata.name = name.to_string();
            app.status.sync = SyncStatus {
                status: "Synced".into(),
            };
            app.status.health = HealthStatus {
                status: if reads >= self.healthy_after {
                    "Healthy".into()
                } else {
                    "Progressing".into()
                },
            };
            Ok(app)
        }

        async fn resource_tree(&self, _project: &str, _name: &str) -> Result<ApplicationTree, ApiError> {
            Ok(ApplicationTree::default())
        }

        async fn patch_resource(
            &self,
            _project: &str,
            _application: &str,
            _resource: &ResourceStatus,
            _patch_type: &str,
            _patch: &str,
        ) -> Result<(), ApiError> {
            Ok(())
        }

        fn bearer_token(&self) -> Option<String> {
            None
        }
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(SyncStatusCode::parse("Synced"), SyncStatusCode::Synced);
        assert_eq!(SyncStatusCode::parse("OutOfSync"), SyncStatusCode::OutOfSync);
        assert_eq!(SyncStatusCode::parse(""), SyncStatusCode::Unknown);
        assert_eq!(HealthStatusCode::parse("Degraded"), HealthStatusCode::Degraded);
        assert_eq!(HealthStatusCode::parse("weird"), HealthStatusCode::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_healthy_succeeds() {
        let control = BecomesHealthy::new(3);

        let app = wait_for_healthy(
            &control,
            "",
            "demo",
            Duration::from_secs(60),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert_eq!(app.name(), "demo");
        assert_eq!(control.reads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_healthy_times_out() {
        let control = BecomesHealthy::new(usize::MAX);

        let err = wait_for_healthy(
            &control,
            "",
            "demo",
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

        match err {
            WaitError::Timeout { name, health, .. } => {
                assert_eq!(name, "demo");
                assert_eq!(health, "Progressing");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_read_does_not_outlive_timeout() {
        let control = BecomesHealthy {
            read_delay: Duration::from_secs(100),
            ..BecomesHealthy::new(1)
        };

        let started = Instant::now();
        let err = wait_for_healthy(
            &control,
            "",
            "demo",
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, WaitError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(control.reads.load(Ordering::SeqCst), 0);
    }
}
