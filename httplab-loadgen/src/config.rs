use httplab_common::lifecycle::DEFAULT_DRAIN_GRACE;
use httplab_common::{LabError, Result};
use std::time::Duration;

/// Validated load generator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadConfig {
    pub target: String,
    pub concurrency: usize,
    pub duration: Duration,
    pub keep_alive: bool,
    pub timeout: Duration,
    pub report_interval: Duration,
    pub drain_grace: Duration,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            target: "http://localhost:8080/health".to_string(),
            concurrency: 10,
            duration: Duration::from_secs(10),
            keep_alive: true,
            timeout: Duration::from_secs(10),
            report_interval: Duration::from_secs(2),
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }
}

impl LoadConfig {
    pub fn validate(&self) -> Result<()> {
        httplab_client::validate_target(&self.target)?;
        if self.concurrency == 0 {
            return Err(LabError::InvalidConfig("concurrency must be at least 1".to_string()));
        }
        if self.duration.is_zero() {
            return Err(LabError::InvalidConfig("duration must be positive".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(LabError::InvalidConfig("timeout must be positive".to_string()));
        }
        if self.report_interval.is_zero() {
            return Err(LabError::InvalidConfig("report interval must be positive".to_string()));
        }
        Ok(())
    }
}
