//! Run lifecycle: one broadcast stop signal per run, raced by a duration
//! timer and process signals, followed by a bounded drain of the workers.

use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Grace period the tools give in-flight work after the stop signal fires.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Owns the stop broadcast for one run.
///
/// Every worker gets a clone of [`Lifecycle::token`] and checks it at its
/// suspension points. Cancellation is idempotent, so the duration timer and
/// a signal racing each other is harmless.
pub struct Lifecycle {
    token: CancellationToken,
    started: Instant,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self { token: CancellationToken::new(), started: Instant::now() }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Stop the run once `duration` has elapsed. `None` runs until stopped
    /// some other way.
    pub fn arm_duration(&self, duration: Option<Duration>) {
        let Some(duration) = duration else { return };
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    info!(duration = ?duration, "duration reached");
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        });
    }

    /// Stop the run on SIGINT (and SIGTERM on unix).
    pub fn arm_signals(&self) {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_signal() => {
                    info!("shutdown signal received");
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        });
    }

    /// Resolves once the stop signal has fired.
    pub async fn stopped(&self) {
        self.token.cancelled().await
    }
}

/// Outcome of [`drain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    pub finished: usize,
    pub abandoned: usize,
}

/// Wait up to `grace` for every task in `workers` to return, then abort the
/// stragglers. Never waits longer than `grace`.
pub async fn drain(mut workers: JoinSet<()>, grace: Duration) -> DrainReport {
    let mut finished = 0;
    let all_done = tokio::time::timeout(grace, async {
        while let Some(res) = workers.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "worker task failed");
            }
            finished += 1;
        }
    })
    .await;

    let abandoned = workers.len();
    if all_done.is_err() {
        warn!(abandoned, grace = ?grace, "workers still busy after grace period");
        workers.abort_all();
    }
    DrainReport { finished, abandoned }
}

/// Resolves on the first SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
