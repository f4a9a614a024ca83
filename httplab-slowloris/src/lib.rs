pub mod config;
pub mod drip;
pub mod report;
pub mod simulation;
pub mod stats;
pub mod worker;

pub use config::SlowConfig;
pub use drip::HeaderDrip;
pub use simulation::{run, SimulationResult};
pub use stats::{SlowSnapshot, SlowStats};
pub use worker::{ConnectionEnd, SlowConnectionWorker};
