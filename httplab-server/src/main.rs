use clap::Parser;
use httplab_common::lifecycle::shutdown_signal;
use httplab_common::logging::{self, LogFormat};
use httplab_server::{Server, ServerConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "httplab-server", about = "Demo HTTP server with connection state tracking")]
struct Args {
    /// Port to listen on
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Close connections whose request header is not complete in time (0 = no timeout)
    #[arg(long, default_value = "5s")]
    read_header_timeout: humantime::Duration,

    /// Deadline for a handler to respond (0 = no timeout)
    #[arg(long, default_value = "10s")]
    request_timeout: humantime::Duration,

    /// Close kept-alive connections idle this long (0 = no timeout)
    #[arg(long, default_value = "60s")]
    idle_timeout: humantime::Duration,

    /// Largest request header accepted, in bytes
    #[arg(long, default_value_t = 1 << 20)]
    max_header_bytes: usize,

    /// How long shutdown waits for in-flight requests
    #[arg(long, default_value = "30s")]
    shutdown_timeout: humantime::Duration,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

/// Zero means "disabled".
fn optional(d: humantime::Duration) -> Option<Duration> {
    let d: Duration = d.into();
    (!d.is_zero()).then_some(d)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    logging::init(args.debug, args.log_format);

    let config = ServerConfig {
        address: SocketAddr::from(([0, 0, 0, 0], args.port)),
        read_header_timeout: optional(args.read_header_timeout),
        request_timeout: optional(args.request_timeout),
        idle_timeout: optional(args.idle_timeout),
        max_header_bytes: args.max_header_bytes,
        shutdown_timeout: args.shutdown_timeout.into(),
    };

    info!(
        port = args.port,
        read_header_timeout = ?config.read_header_timeout,
        request_timeout = ?config.request_timeout,
        idle_timeout = ?config.idle_timeout,
        max_header_bytes = config.max_header_bytes,
        "starting server"
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_token.cancel();
    });

    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

    // Print "Listening on <addr>" once the server signals it is bound.
    tokio::spawn(async move {
        if let Ok(addr) = ready_rx.await {
            info!("listening on {}", addr);
        }
    });

    Server::new(config).run(ready_tx, shutdown).await?;
    info!("server stopped");
    Ok(())
}
