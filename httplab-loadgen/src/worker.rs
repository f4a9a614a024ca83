use httplab_client::{Client, ClientConfig};
use httplab_common::lifecycle::{drain, DrainReport};
use httplab_common::reporter::run_periodic;
use httplab_common::{Lifecycle, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::LoadConfig;
use crate::metrics::{LatencySummary, StatsAggregator, StatsSnapshot};
use crate::report::RateWindow;

/// Everything the final report needs, collected after the workers stopped.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub elapsed: Duration,
    pub totals: StatsSnapshot,
    pub latency: LatencySummary,
    pub drain: DrainReport,
}

impl RunResult {
    pub fn requests_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.totals.total_requests as f64 / secs
    }
}

/// Drive `config.target` with `config.concurrency` workers until the run's
/// stop signal fires (duration elapsed or `lifecycle` stopped externally),
/// drain, and summarise.
pub async fn run(config: &LoadConfig, lifecycle: &Lifecycle) -> Result<RunResult> {
    config.validate()?;

    let client = Arc::new(Client::new(ClientConfig::for_concurrency(
        config.concurrency,
        config.keep_alive,
        config.timeout,
    ))?);
    let stats = Arc::new(StatsAggregator::new());
    let target: Arc<str> = Arc::from(config.target.as_str());

    info!(
        target = %config.target,
        concurrency = config.concurrency,
        duration = ?config.duration,
        keep_alive = config.keep_alive,
        "starting load generator"
    );

    lifecycle.arm_duration(Some(config.duration));

    let workers = spawn_pool(
        config.concurrency,
        client,
        target,
        Arc::clone(&stats),
        lifecycle.token(),
    );

    let reporter_stats = Arc::clone(&stats);
    let mut window = RateWindow::new(config.report_interval);
    let progress = move |elapsed: Duration| {
        let s = reporter_stats.snapshot();
        let (recent_rps, avg_rps) = window.observe(s.total_requests, elapsed);
        info!(
            total = s.total_requests,
            success = s.success_count,
            errors = s.error_count,
            recent_rps,
            avg_rps,
            "progress"
        );
    };
    let reporter = tokio::spawn(run_periodic(config.report_interval, lifecycle.token(), progress));

    lifecycle.stopped().await;
    info!("stopping workers...");

    let drain = drain(workers, config.drain_grace).await;
    reporter.await.ok();

    Ok(RunResult {
        elapsed: lifecycle.elapsed(),
        totals: stats.snapshot(),
        latency: LatencySummary::from_samples(stats.latency_samples()),
        drain,
    })
}

/// Spawn `concurrency` request loops sharing one client and one aggregator.
pub fn spawn_pool(
    concurrency: usize,
    client: Arc<Client>,
    target: Arc<str>,
    stats: Arc<StatsAggregator>,
    token: CancellationToken,
) -> JoinSet<()> {
    let mut workers = JoinSet::new();
    for id in 0..concurrency {
        workers.spawn(run_worker(
            id,
            Arc::clone(&client),
            Arc::clone(&target),
            Arc::clone(&stats),
            token.clone(),
        ));
    }
    workers
}

/// One saturation loop: request, record, repeat with no pause until the stop
/// signal is seen at the top of the loop. An in-flight request is allowed to
/// finish; it is bounded by the client timeout.
pub async fn run_worker(
    id: usize,
    client: Arc<Client>,
    target: Arc<str>,
    stats: Arc<StatsAggregator>,
    token: CancellationToken,
) {
    while !token.is_cancelled() {
        let start = Instant::now();
        let outcome = client.get(&target).await;
        let latency = start.elapsed();

        stats.record_attempt(latency, &outcome);
        if let Err(e) = &outcome {
            debug!(worker = id, error = %e, "request failed");
        }

        // A refused dial can complete without ever suspending.
        tokio::task::yield_now().await;
    }
}
