use httplab_common::lifecycle::{drain, DrainReport};
use httplab_common::reporter::run_periodic;
use httplab_common::{Lifecycle, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::info;

use crate::config::SlowConfig;
use crate::stats::{SlowSnapshot, SlowStats};
use crate::worker::SlowConnectionWorker;

/// Counters and timing collected after the workers stopped.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub elapsed: Duration,
    pub totals: SlowSnapshot,
    pub drain: DrainReport,
}

/// Hold `config.conns` slow connections against the target until the run's
/// stop signal fires, then drain and summarise.
pub async fn run(config: &SlowConfig, lifecycle: &Lifecycle) -> Result<SimulationResult> {
    config.validate()?;
    let target = config.resolve().await?;

    info!(
        target = %config.target,
        resolved = %target,
        connections = config.conns,
        delay = ?config.delay,
        duration = ?config.duration,
        keep_open = config.keep_open,
        "starting slow connection simulation"
    );

    lifecycle.arm_duration(config.duration);

    let stats = Arc::new(SlowStats::new());
    let reporter_stats = Arc::clone(&stats);
    let reporter = tokio::spawn(run_periodic(config.report_interval, lifecycle.token(), move |_| {
        let s = reporter_stats.snapshot();
        info!(
            active = s.active,
            attempted = s.attempted,
            closed_by_peer = s.closed_by_peer,
            dial_errors = s.dial_errors,
            fragments_sent = s.fragments_sent,
            self_stopped = s.self_stopped,
            "stats"
        );
    }));

    let shared = Arc::new(config.clone());
    let mut workers = JoinSet::new();
    for id in 0..config.conns {
        if lifecycle.is_stopped() {
            break;
        }
        let worker = SlowConnectionWorker::new(
            id,
            target,
            Arc::clone(&shared),
            Arc::clone(&stats),
            lifecycle.token(),
        );
        workers.spawn(worker.run());

        // Open connections gradually rather than in one burst.
        if !config.ramp_delay.is_zero() {
            tokio::select! {
                _ = lifecycle.stopped() => break,
                _ = tokio::time::sleep(config.ramp_delay) => {}
            }
        }
    }

    lifecycle.stopped().await;
    info!("waiting for workers to finish...");

    let drain = drain(workers, config.drain_grace).await;
    reporter.await.ok();

    Ok(SimulationResult { elapsed: lifecycle.elapsed(), totals: stats.snapshot(), drain })
}
