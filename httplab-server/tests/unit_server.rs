use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use httplab_common::{ConnId, ConnSnapshot, ConnState, ConnStateTracker};
use httplab_server::config::{DEFAULT_SLEEP_MS, MAX_SLEEP_MS};
use httplab_server::connection::{deadline_for, serve_connection, ConnLimits};
use httplab_server::{
    handle_echo, handle_health, handle_readbody, handle_sleep, handle_stats, sleep_millis, AppState,
    Server, ServerConfig, SleepParams,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

// --- Test helpers ---

fn empty_state() -> AppState {
    AppState::new(Arc::new(ConnStateTracker::new()))
}

/// Consume a response body into bytes.
async fn response_body(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

struct Running {
    addr: SocketAddr,
    tracker: Arc<ConnStateTracker>,
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

async fn start_server(configure: impl FnOnce(&mut ServerConfig)) -> Running {
    let mut config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
    config.shutdown_timeout = Duration::from_secs(2);
    configure(&mut config);

    let server = Server::new(config);
    let tracker = server.tracker();
    let shutdown = CancellationToken::new();
    let (ready_tx, ready_rx) = oneshot::channel();

    let token = shutdown.clone();
    let handle = tokio::spawn(async move {
        server.run(ready_tx, token).await.expect("server failed");
    });
    let addr = ready_rx.await.expect("server ready signal dropped");
    Running { addr, tracker, shutdown, handle }
}

/// Poll the tracker until `pred` holds, failing after a few seconds.
async fn wait_for(
    tracker: &ConnStateTracker,
    pred: impl Fn(&ConnSnapshot) -> bool,
) -> ConnSnapshot {
    for _ in 0..300 {
        let s = tracker.snapshot();
        if pred(&s) {
            return s;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held; last snapshot {:?}", tracker.snapshot());
}

/// Read until the peer closes or resets, failing if it stays open.
async fn expect_closed(stream: &mut TcpStream, within: Duration) {
    let mut buf = [0u8; 1024];
    tokio::time::timeout(within, async {
        while let Ok(n) = stream.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
    })
    .await
    .expect("server never closed the connection");
}

// --- Server struct ---

#[test]
fn test_server_config_defaults() {
    let config = ServerConfig::new("0.0.0.0:9000".parse().unwrap());
    assert_eq!(config.address.to_string(), "0.0.0.0:9000");
    assert_eq!(config.read_header_timeout, Some(Duration::from_secs(5)));
    assert_eq!(config.idle_timeout, Some(Duration::from_secs(60)));
}

#[test]
fn test_server_creation_with_config() {
    let server = Server::new(ServerConfig::new("0.0.0.0:9000".parse().unwrap()));
    assert_eq!(server.address().to_string(), "0.0.0.0:9000");
    assert_eq!(server.tracker().snapshot(), ConnSnapshot::default());
}

#[test]
fn test_router_creation() {
    let router = Server::create_router(empty_state());
    assert!(std::mem::size_of_val(&router) > 0);
}

#[test]
fn test_deadline_per_state() {
    let limits = ConnLimits {
        read_header_timeout: Some(Duration::from_secs(1)),
        request_timeout: Some(Duration::from_secs(2)),
        idle_timeout: Some(Duration::from_secs(3)),
        max_header_bytes: 8192,
    };
    assert_eq!(deadline_for(ConnState::New, &limits), Some(Duration::from_secs(1)));
    assert_eq!(deadline_for(ConnState::Idle, &limits), Some(Duration::from_secs(3)));
    assert_eq!(deadline_for(ConnState::Active, &limits), None);
}

// --- Handlers ---

#[tokio::test]
async fn test_handle_health() {
    assert_eq!(handle_health().await, "OK");
}

#[test]
fn test_sleep_millis_parsing() {
    assert_eq!(sleep_millis(None), DEFAULT_SLEEP_MS);
    assert_eq!(sleep_millis(Some("abc")), DEFAULT_SLEEP_MS);
    assert_eq!(sleep_millis(Some("-5")), DEFAULT_SLEEP_MS);
    assert_eq!(sleep_millis(Some("20")), 20);
    assert_eq!(sleep_millis(Some("0")), 0);
    assert_eq!(sleep_millis(Some("999999")), MAX_SLEEP_MS);
}

#[tokio::test]
async fn test_handle_sleep_waits_requested_time() {
    let started = std::time::Instant::now();
    let body = handle_sleep(Query(SleepParams { ms: Some("20".to_string()) })).await;
    assert_eq!(body, "slept for 20ms\n");
    assert!(started.elapsed() >= Duration::from_millis(20));
}

#[tokio::test]
async fn test_handle_readbody_rejects_get() {
    let response = handle_readbody(Method::GET, Bytes::new()).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_handle_readbody_reports_size() {
    let response = handle_readbody(Method::POST, Bytes::from_static(b"hello")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&response_body(response).await).unwrap();
    assert_eq!(json["bytes_read"], 5);
    assert_eq!(json["content"], "hello");
}

#[tokio::test]
async fn test_handle_echo_reflects_request() {
    let mut headers = HeaderMap::new();
    headers.insert("host", "example.test".parse().unwrap());
    headers.insert("x-trace", "1".parse().unwrap());
    let remote: SocketAddr = "10.0.0.5:4242".parse().unwrap();

    let axum::Json(json) = handle_echo(
        Method::GET,
        Uri::from_static("/echo?a=1&a=2&b=x"),
        headers,
        ConnectInfo(remote),
        Query(vec![
            ("a".to_string(), "1".to_string()),
            ("a".to_string(), "2".to_string()),
            ("b".to_string(), "x".to_string()),
        ]),
    )
    .await;

    assert_eq!(json["method"], "GET");
    assert_eq!(json["path"], "/echo");
    assert_eq!(json["query"]["a"], serde_json::json!(["1", "2"]));
    assert_eq!(json["headers"]["x-trace"], serde_json::json!(["1"]));
    assert_eq!(json["remote_addr"], "10.0.0.5:4242");
    assert_eq!(json["host"], "example.test");
}

#[tokio::test]
async fn test_handle_stats_surfaces_tracker_snapshot() {
    let state = empty_state();
    state.tracker.transition(ConnId(1), ConnState::New);
    state.tracker.transition(ConnId(2), ConnState::New);
    state.tracker.transition(ConnId(2), ConnState::Active);

    let axum::Json(json) = handle_stats(State(state)).await;
    assert_eq!(
        json["connections"],
        serde_json::json!({
            "new": 1, "active": 1, "idle": 0, "hijacked": 0,
            "total_accepted": 2, "total_closed": 0
        })
    );
    assert_eq!(json["requests"], 0);
}

// --- Live connections ---

#[tokio::test]
async fn test_keep_alive_requests_are_tracked() {
    let server = start_server(|_| {}).await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        let body = client
            .get(format!("http://{}/health", server.addr))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "OK");
    }

    let s = wait_for(&server.tracker, |s| s.idle >= 1).await;
    assert_eq!(s.live(), s.total_accepted - s.total_closed);

    let stats: serde_json::Value = client
        .get(format!("http://{}/stats", server.addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(stats["connections"]["total_accepted"].as_u64().unwrap() >= 1);
    assert_eq!(stats["requests"], 4);

    server.shutdown.cancel();
    server.handle.await.unwrap();
}

#[tokio::test]
async fn test_incomplete_header_is_closed_after_read_header_timeout() {
    let server = start_server(|c| c.read_header_timeout = Some(Duration::from_millis(200))).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"GET / HTTP/1.1\r\nHost: test\r\n").await.unwrap();
    wait_for(&server.tracker, |s| s.new == 1).await;

    expect_closed(&mut stream, Duration::from_secs(3)).await;

    let s = wait_for(&server.tracker, |s| s.total_closed == 1).await;
    assert_eq!(s.live(), 0);
    assert_eq!(server.tracker.tracked(), 0);

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_slow_header_on_kept_alive_connection_is_closed() {
    let server = start_server(|c| {
        c.read_header_timeout = Some(Duration::from_millis(200));
        c.idle_timeout = None;
    })
    .await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"GET /health HTTP/1.1\r\nHost: test\r\n\r\n").await.unwrap();
    let mut buf = vec![0u8; 1024];
    let n = stream.read(&mut buf).await.unwrap();
    assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 200"));
    wait_for(&server.tracker, |s| s.idle == 1).await;

    // Second request on the same connection never finishes its header.
    stream.write_all(b"GET / HTTP/1.1\r\nHost: test\r\n").await.unwrap();
    expect_closed(&mut stream, Duration::from_secs(3)).await;

    let s = wait_for(&server.tracker, |s| s.total_closed == 1).await;
    assert_eq!(s.total_accepted, 1);
    assert_eq!(s.live(), 0);

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_connection_stays_active_while_response_body_streams() {
    let (mut body_tx, body_rx) = tokio::io::duplex(64);
    let body_rx = Arc::new(Mutex::new(Some(body_rx)));
    let router = Router::new().route(
        "/stream",
        get(move || {
            let rx = body_rx.lock().unwrap().take().expect("one request only");
            async move { Body::from_stream(ReaderStream::new(rx)) }
        }),
    );

    let tracker = Arc::new(ConnStateTracker::new());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let limits = ConnLimits {
        read_header_timeout: Some(Duration::from_secs(5)),
        request_timeout: None,
        idle_timeout: None,
        max_header_bytes: 8192,
    };
    let hook = Arc::clone(&tracker);
    tokio::spawn(async move {
        let (stream, remote) = listener.accept().await.unwrap();
        let shutdown = CancellationToken::new();
        serve_connection(stream, remote, ConnId(1), router, hook, limits, shutdown).await;
    });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"GET /stream HTTP/1.1\r\nHost: test\r\n\r\n").await.unwrap();
    body_tx.write_all(b"first chunk").await.unwrap();

    let mut buf = vec![0u8; 1024];
    let n = stream.read(&mut buf).await.unwrap();
    assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 200"));

    // The handler has returned but the body is still open.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let s = tracker.snapshot();
    assert_eq!((s.active, s.idle), (1, 0), "{s:?}");

    drop(body_tx);
    wait_for(&tracker, |s| s.idle == 1).await;
    drop(stream);
    wait_for(&tracker, |s| s.total_closed == 1).await;
}

#[tokio::test]
async fn test_incomplete_header_stays_open_without_timeout() {
    let server = start_server(|c| c.read_header_timeout = None).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();

    let mut buf = [0u8; 64];
    let read = tokio::time::timeout(Duration::from_millis(300), stream.read(&mut buf)).await;
    assert!(read.is_err(), "connection should still be open and silent");

    let s = wait_for(&server.tracker, |s| s.new == 1).await;
    assert_eq!(s.total_closed, 0);

    drop(stream);
    wait_for(&server.tracker, |s| s.total_closed == 1).await;
    server.shutdown.cancel();
}

#[tokio::test]
async fn test_idle_connection_is_closed_after_idle_timeout() {
    let server = start_server(|c| c.idle_timeout = Some(Duration::from_millis(200))).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"GET /health HTTP/1.1\r\nHost: test\r\n\r\n").await.unwrap();

    let mut buf = vec![0u8; 1024];
    let n = stream.read(&mut buf).await.unwrap();
    assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 200"));

    let read = tokio::time::timeout(Duration::from_secs(3), stream.read(&mut buf))
        .await
        .expect("idle connection was never closed");
    assert!(matches!(read, Ok(0) | Err(_)));

    let s = wait_for(&server.tracker, |s| s.total_closed == 1).await;
    assert_eq!(s.total_accepted, 1);

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_request_timeout_returns_503() {
    let server = start_server(|c| c.request_timeout = Some(Duration::from_millis(100))).await;

    let response = reqwest::get(format!("http://{}/sleep?ms=2000", server.addr)).await.unwrap();
    assert_eq!(response.status().as_u16(), 503);

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let server = start_server(|_| {}).await;
    server.shutdown.cancel();

    tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(TcpStream::connect(server.addr).await.is_err());
}

#[tokio::test]
async fn test_bind_failure_is_reported() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let server = Server::new(ServerConfig::new(taken.local_addr().unwrap()));
    let (ready_tx, _ready_rx) = oneshot::channel();

    let result = server.run(ready_tx, CancellationToken::new()).await;
    assert!(matches!(result, Err(httplab_common::LabError::Bind(_))));
}
