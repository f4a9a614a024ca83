use httplab_common::lifecycle::DEFAULT_DRAIN_GRACE;
use httplab_common::{LabError, Result};
use std::net::SocketAddr;
use std::time::Duration;

/// Validated slow-connection simulator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SlowConfig {
    /// `host:port` of the server under test.
    pub target: String,
    /// Number of simulated connections held open concurrently.
    pub conns: usize,
    /// Pause between two header lines on one connection.
    pub delay: Duration,
    /// Total run time; `None` runs until interrupted.
    pub duration: Option<Duration>,
    /// Keep dripping headers forever. When false, a connection gives up after
    /// `max_headers` custom header lines.
    pub keep_open: bool,
    pub max_headers: usize,
    pub dial_timeout: Duration,
    /// Read deadline used to check whether the peer reacted. Shorter detects
    /// closes sooner but risks reporting a busy peer as silent.
    pub peek_timeout: Duration,
    pub write_timeout: Duration,
    /// Pause before redialing after a connection ended.
    pub reconnect_delay: Duration,
    /// Gap between starting two workers.
    pub ramp_delay: Duration,
    pub report_interval: Duration,
    pub drain_grace: Duration,
}

impl Default for SlowConfig {
    fn default() -> Self {
        Self {
            target: "localhost:8080".to_string(),
            conns: 100,
            delay: Duration::from_secs(1),
            duration: None,
            keep_open: true,
            max_headers: 10,
            dial_timeout: Duration::from_secs(10),
            peek_timeout: Duration::from_millis(1),
            write_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_millis(100),
            ramp_delay: Duration::from_millis(10),
            report_interval: Duration::from_secs(5),
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }
}

impl SlowConfig {
    pub fn validate(&self) -> Result<()> {
        let port = self
            .target
            .rsplit_once(':')
            .filter(|(host, _)| !host.is_empty())
            .map(|(_, port)| port);
        match port.map(str::parse::<u16>) {
            Some(Ok(p)) if p != 0 => {}
            _ => {
                return Err(LabError::InvalidConfig(format!(
                    "target must be host:port, got {:?}",
                    self.target
                )))
            }
        }
        if self.conns == 0 {
            return Err(LabError::InvalidConfig("conns must be at least 1".to_string()));
        }
        if !self.keep_open && self.max_headers == 0 {
            return Err(LabError::InvalidConfig(
                "max headers must be at least 1 when keep-open is off".to_string(),
            ));
        }
        for (name, value) in [
            ("dial timeout", self.dial_timeout),
            ("peek timeout", self.peek_timeout),
            ("write timeout", self.write_timeout),
            ("report interval", self.report_interval),
        ] {
            if value.is_zero() {
                return Err(LabError::InvalidConfig(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    /// Resolve `target` once, up front. Failing to resolve is a startup error.
    pub async fn resolve(&self) -> Result<SocketAddr> {
        tokio::net::lookup_host(self.target.as_str())
            .await
            .map_err(|e| LabError::InvalidConfig(format!("cannot resolve {}: {e}", self.target)))?
            .next()
            .ok_or_else(|| {
                LabError::InvalidConfig(format!("{} resolved to no addresses", self.target))
            })
    }
}
