use clap::Parser;
use httplab_common::logging::{self, LogFormat};
use httplab_common::Lifecycle;
use httplab_slowloris::report::Report;
use httplab_slowloris::{simulation, SlowConfig};
use std::process;
use std::time::Duration;

/// Holds many HTTP connections open by sending the request header one line
/// at a time. For testing servers you are authorised to test.
#[derive(Parser)]
#[command(name = "httplab-slowloris", about = "Slow-header connection simulator")]
struct Args {
    /// Target server address (host:port)
    #[arg(long, default_value = "localhost:8080")]
    target: String,

    /// Number of concurrent connections
    #[arg(long, default_value_t = 100)]
    conns: usize,

    /// Delay between header lines
    #[arg(long, default_value = "1s")]
    delay: humantime::Duration,

    /// Total run time (0 = until interrupted)
    #[arg(long, default_value = "0s")]
    duration: humantime::Duration,

    /// Keep sending headers to hold the connection
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    keep_open: bool,

    /// Custom header lines sent before giving up when --keep-open=false
    #[arg(long, default_value_t = 10)]
    max_headers: usize,

    /// Connect timeout
    #[arg(long, default_value = "10s")]
    dial_timeout: humantime::Duration,

    /// Read deadline used to detect a peer close
    #[arg(long, default_value = "1ms")]
    peek_timeout: humantime::Duration,

    /// Gap between starting two connections
    #[arg(long, default_value = "10ms")]
    ramp_delay: humantime::Duration,

    /// Interval between stats lines
    #[arg(long, default_value = "5s")]
    report_interval: humantime::Duration,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

impl Args {
    fn to_config(&self) -> SlowConfig {
        let duration: Duration = self.duration.into();
        SlowConfig {
            target: self.target.clone(),
            conns: self.conns,
            delay: self.delay.into(),
            duration: (!duration.is_zero()).then_some(duration),
            keep_open: self.keep_open,
            max_headers: self.max_headers,
            dial_timeout: self.dial_timeout.into(),
            peek_timeout: self.peek_timeout.into(),
            ramp_delay: self.ramp_delay.into(),
            report_interval: self.report_interval.into(),
            ..SlowConfig::default()
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    logging::init(args.debug, args.log_format);

    let config = args.to_config();
    let lifecycle = Lifecycle::new();
    lifecycle.arm_signals();

    let result = simulation::run(&config, &lifecycle).await.unwrap_or_else(|e| {
        eprintln!("Failed to start simulation: {e}");
        process::exit(3);
    });

    print!("{}", Report { config: &config, result: &result });
}
