use axum::{
    body::Bytes,
    extract::{ConnectInfo, Query, Request, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use httplab_common::conn::ConnIdAllocator;
use httplab_common::lifecycle::drain;
use httplab_common::{ConnStateHook, ConnStateTracker, LabError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod config;
pub mod connection;

use config::{ACCEPT_ERROR_BACKOFF, DEFAULT_SLEEP_MS, MAX_SLEEP_MS, MIN_HEADER_BYTES};
use connection::{serve_connection, ConnLimits};

#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<ConnStateTracker>,
    pub requests: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(tracker: Arc<ConnStateTracker>) -> Self {
        Self { tracker, requests: Arc::new(AtomicU64::new(0)) }
    }
}

/// Server configuration. A `None` timeout disables that timeout.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: SocketAddr,
    /// Close a connection that has not delivered a complete request header
    /// within this long of being accepted. The defence against slow headers.
    pub read_header_timeout: Option<Duration>,
    /// Deadline for a handler to produce its response.
    pub request_timeout: Option<Duration>,
    /// Close a kept-alive connection idle for this long.
    pub idle_timeout: Option<Duration>,
    pub max_header_bytes: usize,
    /// How long shutdown waits for in-flight connections.
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            read_header_timeout: Some(Duration::from_secs(5)),
            request_timeout: Some(Duration::from_secs(10)),
            idle_timeout: Some(Duration::from_secs(60)),
            max_header_bytes: 1 << 20,
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    fn limits(&self) -> ConnLimits {
        ConnLimits {
            read_header_timeout: self.read_header_timeout,
            request_timeout: self.request_timeout,
            idle_timeout: self.idle_timeout,
            max_header_bytes: self.max_header_bytes.max(MIN_HEADER_BYTES),
        }
    }
}

/// Demo HTTP server with connection lifecycle tracking
pub struct Server {
    config: ServerConfig,
    tracker: Arc<ConnStateTracker>,
}

impl Server {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        Self { config, tracker: Arc::new(ConnStateTracker::new()) }
    }

    /// Get the server's configured address
    pub fn address(&self) -> SocketAddr {
        self.config.address
    }

    /// Tracker fed by this server's connections.
    pub fn tracker(&self) -> Arc<ConnStateTracker> {
        Arc::clone(&self.tracker)
    }

    /// Create the application router with the given state
    pub fn create_router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(handle_health))
            .route("/ready", get(handle_ready))
            .route("/sleep", get(handle_sleep))
            .route("/echo", any(handle_echo))
            .route("/readbody", any(handle_readbody))
            .route("/stats", get(handle_stats))
            .layer(middleware::from_fn_with_state(state.clone(), log_requests))
            .with_state(state)
    }

    /// Accept connections until `shutdown` is cancelled, signalling `ready_tx`
    /// with the bound address once listening. On shutdown, stop accepting and
    /// give open connections `shutdown_timeout` to finish.
    pub async fn run(
        self,
        ready_tx: tokio::sync::oneshot::Sender<SocketAddr>,
        shutdown: CancellationToken,
    ) -> Result<(), LabError> {
        let listener = TcpListener::bind(self.config.address)
            .await
            .map_err(|e| LabError::Bind(format!("{}: {e}", self.config.address)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| LabError::Bind(format!("{}: {e}", self.config.address)))?;
        ready_tx.send(local_addr).ok();

        let app = Self::create_router(AppState::new(self.tracker()));
        let hook: Arc<dyn ConnStateHook> = self.tracker();
        let ids = ConnIdAllocator::new();
        let limits = self.config.limits();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let id = ids.next_id();
                        connections.spawn(serve_connection(
                            stream,
                            remote,
                            id,
                            app.clone(),
                            Arc::clone(&hook),
                            limits.clone(),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(listener);
        info!(
            open_connections = connections.len(),
            shutdown_timeout = ?self.config.shutdown_timeout,
            "shutting down, waiting for in-flight requests"
        );
        let started = Instant::now();
        let report = drain(connections, self.config.shutdown_timeout).await;
        if report.abandoned > 0 {
            warn!(abandoned = report.abandoned, elapsed = ?started.elapsed(), "shutdown timed out");
        } else {
            info!(elapsed = ?started.elapsed(), "shutdown completed gracefully");
        }
        Ok(())
    }
}

/// Assigns each request an ID and logs its method, path, status and latency.
async fn log_requests(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let request_id = state.requests.fetch_add(1, Ordering::Relaxed) + 1;
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!(request_id, %method, %path, "request started");
    let response = next.run(req).await;
    info!(
        request_id,
        %method,
        %path,
        status = response.status().as_u16(),
        latency = ?start.elapsed(),
        "request completed"
    );
    response
}

/// Handler for GET /health: always 200 OK.
pub async fn handle_health() -> &'static str {
    "OK"
}

/// Handler for GET /ready: readiness plus the current connection counts.
pub async fn handle_ready(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ready",
        "connections": state.tracker.snapshot(),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct SleepParams {
    pub ms: Option<String>,
}

/// Parse the `/sleep` `ms` parameter: default on missing or invalid input,
/// capped at [`MAX_SLEEP_MS`].
pub fn sleep_millis(raw: Option<&str>) -> u64 {
    raw.and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_SLEEP_MS)
        .min(MAX_SLEEP_MS)
}

/// Handler for GET /sleep?ms=N: waits N milliseconds, then responds.
/// Dropped with the connection if the client goes away first.
pub async fn handle_sleep(Query(params): Query<SleepParams>) -> String {
    let ms = sleep_millis(params.ms.as_deref());
    tokio::time::sleep(Duration::from_millis(ms)).await;
    format!("slept for {ms}ms\n")
}

fn multi_map<'a>(pairs: impl Iterator<Item = (&'a str, String)>) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (k, v) in pairs {
        map.entry(k.to_string()).or_default().push(v);
    }
    map
}

/// Handler for /echo: reflects the request back as JSON.
pub async fn handle_echo(
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Query(query): Query<Vec<(String, String)>>,
) -> Json<Value> {
    let query = multi_map(query.iter().map(|(k, v)| (k.as_str(), v.clone())));
    let header_map = multi_map(
        headers
            .iter()
            .map(|(k, v)| (k.as_str(), String::from_utf8_lossy(v.as_bytes()).into_owned())),
    );
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": query,
        "headers": header_map,
        "remote_addr": remote.to_string(),
        "host": host,
    }))
}

/// Handler for POST /readbody: reads the whole body and reports its size.
pub async fn handle_readbody(method: Method, body: Bytes) -> Response {
    if method != Method::POST {
        return (StatusCode::METHOD_NOT_ALLOWED, "POST only").into_response();
    }
    Json(json!({
        "bytes_read": body.len(),
        "content": String::from_utf8_lossy(&body),
    }))
    .into_response()
}

/// Handler for GET /stats: connection counts and total requests served.
pub async fn handle_stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "connections": state.tracker.snapshot(),
        "requests": state.requests.load(Ordering::Relaxed),
    }))
}
