use std::fmt;
use std::time::Duration;

use crate::config::LoadConfig;
use crate::worker::RunResult;

const RULE: &str = "============================================================";
const THIN_RULE: &str = "------------------------------------------------------------";

/// Turns successive cumulative totals into a windowed and an overall rate.
pub struct RateWindow {
    interval: Duration,
    last_total: u64,
}

impl RateWindow {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_total: 0 }
    }

    /// Feed the cumulative `total` observed `elapsed` after the start.
    /// Returns `(recent_rps, avg_rps)`: the delta since the previous call over
    /// the tick interval, and the total over the elapsed time.
    pub fn observe(&mut self, total: u64, elapsed: Duration) -> (f64, f64) {
        let recent = total.saturating_sub(self.last_total);
        self.last_total = total;

        let recent_rps = per_sec(recent, self.interval);
        let avg_rps = per_sec(total, elapsed);
        (recent_rps, avg_rps)
    }
}

fn per_sec(count: u64, over: Duration) -> f64 {
    let secs = over.as_secs_f64();
    if secs == 0.0 {
        0.0
    } else {
        count as f64 / secs
    }
}

/// Round to whole microseconds for display.
fn round_micros(d: Duration) -> Duration {
    Duration::from_micros(((d.as_nanos() + 500) / 1_000) as u64)
}

fn round_millis(d: Duration) -> Duration {
    Duration::from_millis(((d.as_micros() + 500) / 1_000) as u64)
}

/// Plain-text summary block printed at the end of a run.
pub struct Report<'a> {
    pub config: &'a LoadConfig,
    pub result: &'a RunResult,
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (config, result) = (self.config, self.result);
        let t = &result.totals;
        let l = &result.latency;

        writeln!(f)?;
        writeln!(f, "{RULE}")?;
        writeln!(f, "LOAD TEST RESULTS")?;
        writeln!(f, "{RULE}")?;
        writeln!(f, "Target:       {}", config.target)?;
        writeln!(f, "Concurrency:  {}", config.concurrency)?;
        writeln!(f, "Duration:     {:?}", round_millis(result.elapsed))?;
        writeln!(f, "Keep-Alive:   {}", config.keep_alive)?;
        writeln!(f, "{THIN_RULE}")?;
        writeln!(f, "Total Requests: {}", t.total_requests)?;
        writeln!(
            f,
            "Successful:     {} ({:.1}%)",
            t.success_count,
            t.percent_of_total(t.success_count)
        )?;
        writeln!(
            f,
            "Errors:         {} ({:.1}%)",
            t.error_count,
            t.percent_of_total(t.error_count)
        )?;
        writeln!(f, "{THIN_RULE}")?;
        writeln!(f, "RPS:            {:.2} req/sec", result.requests_per_sec())?;
        writeln!(f, "{THIN_RULE}")?;
        writeln!(f, "Latency:")?;
        writeln!(f, "  Average:      {:?}", round_micros(l.average))?;
        writeln!(f, "  P50:          {:?}", round_micros(l.p50))?;
        writeln!(f, "  P95:          {:?}", round_micros(l.p95))?;
        writeln!(f, "  P99:          {:?}", round_micros(l.p99))?;
        writeln!(f, "{RULE}")
    }
}
