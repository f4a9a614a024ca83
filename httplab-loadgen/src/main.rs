use clap::Parser;
use httplab_common::logging::{self, LogFormat};
use httplab_common::Lifecycle;
use httplab_loadgen::report::Report;
use httplab_loadgen::{worker, LoadConfig};
use std::process;

#[derive(Parser)]
#[command(name = "httplab-loadgen", about = "HTTP saturation load generator")]
struct Args {
    /// Target URL
    #[arg(long, default_value = "http://localhost:8080/health")]
    target: String,

    /// Number of concurrent workers
    #[arg(long, default_value_t = 10)]
    concurrency: usize,

    /// How long to run (e.g. 10s, 1m)
    #[arg(long, default_value = "10s")]
    duration: humantime::Duration,

    /// Reuse TCP connections between requests
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    keep_alive: bool,

    /// Per-request timeout
    #[arg(long, default_value = "10s")]
    timeout: humantime::Duration,

    /// Interval between progress lines
    #[arg(long, default_value = "2s")]
    report_interval: humantime::Duration,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

impl Args {
    fn to_config(&self) -> LoadConfig {
        LoadConfig {
            target: self.target.clone(),
            concurrency: self.concurrency,
            duration: self.duration.into(),
            keep_alive: self.keep_alive,
            timeout: self.timeout.into(),
            report_interval: self.report_interval.into(),
            ..LoadConfig::default()
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

    let result = worker::run(&config, &lifecycle).await.unwrap_or_else(|e| {
        eprintln!("Failed to start load generator: {e}");
        process::exit(3);
    });

    print!("{}", Report { config: &config, result: &result });
}
