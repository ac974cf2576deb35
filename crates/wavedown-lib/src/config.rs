//! Scale-down tunables

use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

/// Scale-down configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScaleDownConfig {
    /// Interval between resource tree polls while draining
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Deadline for a whole scale-down run
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_deadline_secs() -> u64 {
    30 * 60
}

impl Default for ScaleDownConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

impl ScaleDownConfig {
    /// Load configuration from `WAVEDOWN_*` environment variables
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("WAVEDOWN").try_parsing(true))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_default())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_secs = deadline.as_secs();
        self
    }
}
