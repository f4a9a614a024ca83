use std::fmt;
use std::time::Duration;

use crate::config::SlowConfig;
use crate::simulation::SimulationResult;
use crate::stats::SlowSnapshot;

const RULE: &str = "============================================================";

/// What the counters say about the peer's slow-header handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The peer closed at least one slow connection.
    DefensiveTimeout,
    /// Connections were held and the peer never closed one.
    Vulnerable,
    /// No connection was ever established.
    Inconclusive,
}

impl Verdict {
    pub fn from_snapshot(s: &SlowSnapshot) -> Self {
        if s.closed_by_peer > 0 {
            Verdict::DefensiveTimeout
        } else if s.established() > 0 {
            Verdict::Vulnerable
        } else {
            Verdict::Inconclusive
        }
    }
}

fn round_millis(d: Duration) -> Duration {
    Duration::from_millis(((d.as_micros() + 500) / 1_000) as u64)
}

/// Plain-text summary block printed at the end of a run.
pub struct Report<'a> {
    pub config: &'a SlowConfig,
    pub result: &'a SimulationResult,
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.result.totals;

        writeln!(f)?;
        writeln!(f, "{RULE}")?;
        writeln!(f, "SLOW CONNECTION SIMULATION RESULTS")?;
        writeln!(f, "{RULE}")?;
        writeln!(f, "Target:                       {}", self.config.target)?;
        writeln!(f, "Connections:                  {}", self.config.conns)?;
        writeln!(f, "Line delay:                   {:?}", self.config.delay)?;
        writeln!(f, "Duration:                     {:?}", round_millis(self.result.elapsed))?;
        writeln!(f, "Active connections:           {}", t.active)?;
        writeln!(f, "Total connections attempted:  {}", t.attempted)?;
        writeln!(f, "Connections closed by peer:   {}", t.closed_by_peer)?;
        writeln!(f, "Connections stopped by us:    {}", t.self_stopped)?;
        writeln!(f, "Connection errors:            {}", t.dial_errors)?;
        writeln!(f, "Total headers sent:           {}", t.fragments_sent)?;
        writeln!(f, "{RULE}")?;

        match Verdict::from_snapshot(t) {
            Verdict::DefensiveTimeout => {
                writeln!(f, "\n[ANALYSIS]")?;
                writeln!(f, "Peer closed slow connections, likely a read-header timeout.")?;
                writeln!(f, "This server is protected against slow-header attacks.")?;
            }
            Verdict::Vulnerable => {
                writeln!(f, "\n[ANALYSIS]")?;
                writeln!(f, "Peer did NOT close slow connections!")?;
                writeln!(f, "This server may be VULNERABLE to slow-header attacks.")?;
                writeln!(f, "Recommendation: enforce a read-header timeout on the server.")?;
            }
            Verdict::Inconclusive => {}
        }
        Ok(())
    }
}
