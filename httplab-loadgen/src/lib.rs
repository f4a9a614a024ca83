pub mod config;
pub mod metrics;
pub mod report;
pub mod worker;

pub use config::LoadConfig;
pub use metrics::{LatencySummary, StatsAggregator, StatsSnapshot};
pub use worker::{run, RunResult};
