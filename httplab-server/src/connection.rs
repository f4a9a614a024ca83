//! Per-connection HTTP/1 driver.
//!
//! Each accepted socket is served by its own task. The task reports every
//! lifecycle transition to a [`ConnStateHook`] and enforces the idle and
//! request deadlines itself. The header deadline covers every request on the
//! connection: the task cuts off a connection that never completes its first
//! header, and hyper's header read timer cuts off any later one. Either way
//! the connection is dropped without a response, exactly like a peer hanging
//! up.

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use httplab_common::{ConnId, ConnState, ConnStateHook};
use hyper::body::{Body as HttpBody, Bytes, Frame, Incoming, SizeHint};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::debug;

/// Deadlines applied to every connection.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    pub read_header_timeout: Option<Duration>,
    pub request_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub max_header_bytes: usize,
}

/// Reports transitions to the hook and mirrors them into a watch channel the
/// connection task uses to pick its current deadline.
struct StateReporter {
    id: ConnId,
    hook: Arc<dyn ConnStateHook>,
    state: watch::Sender<ConnState>,
}

impl StateReporter {
    /// Closed is terminal: later transitions are ignored.
    fn enter(&self, state: ConnState) {
        if *self.state.borrow() == ConnState::Closed {
            return;
        }
        self.hook.on_state_change(self.id, state);
        self.state.send_replace(state);
    }
}

/// Response body that moves the connection to `Idle` once hyper is done
/// with it, so a response still being written counts as active.
struct TrackedBody {
    inner: Body,
    reporter: Arc<StateReporter>,
}

impl Drop for TrackedBody {
    fn drop(&mut self) {
        self.reporter.enter(ConnState::Idle);
    }
}

impl HttpBody for TrackedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, axum::Error>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Which deadline applies while the connection sits in `state`.
pub fn deadline_for(state: ConnState, limits: &ConnLimits) -> Option<Duration> {
    match state {
        ConnState::New => limits.read_header_timeout,
        ConnState::Idle => limits.idle_timeout,
        ConnState::Active | ConnState::Hijacked | ConnState::Closed => None,
    }
}

async fn sleep_or_forever(deadline: Option<Duration>) {
    match deadline {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

async fn dispatch(
    router: Router,
    mut req: hyper::Request<Incoming>,
    remote: SocketAddr,
    request_timeout: Option<Duration>,
) -> Response {
    req.extensions_mut().insert(ConnectInfo(remote));
    let call = router.oneshot(req);
    let result = match request_timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(res) => res,
            Err(_) => return (StatusCode::SERVICE_UNAVAILABLE, "request timed out").into_response(),
        },
        None => call.await,
    };
    match result {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

/// Serve one accepted connection to completion.
pub async fn serve_connection(
    stream: TcpStream,
    remote: SocketAddr,
    id: ConnId,
    router: Router,
    hook: Arc<dyn ConnStateHook>,
    limits: ConnLimits,
    shutdown: CancellationToken,
) {
    let (state_tx, mut state_rx) = watch::channel(ConnState::New);
    let reporter = Arc::new(StateReporter { id, hook, state: state_tx });
    reporter.hook.on_state_change(id, ConnState::New);

    let service = {
        let reporter = Arc::clone(&reporter);
        let request_timeout = limits.request_timeout;
        service_fn(move |req: hyper::Request<Incoming>| {
            let reporter = Arc::clone(&reporter);
            let router = router.clone();
            async move {
                reporter.enter(ConnState::Active);
                let response = dispatch(router, req, remote, request_timeout).await;
                Ok::<_, Infallible>(response.map(|inner| TrackedBody { inner, reporter }))
            }
        })
    };

    let mut builder = http1::Builder::new();
    builder.keep_alive(true).max_buf_size(limits.max_header_bytes);
    if let Some(d) = limits.read_header_timeout {
        builder.timer(TokioTimer::new()).header_read_timeout(d);
    }
    let mut conn = Box::pin(builder.serve_connection(TokioIo::new(stream), service));

    let mut draining = false;
    loop {
        let state = *state_rx.borrow_and_update();
        let deadline = deadline_for(state, &limits);

        tokio::select! {
            res = conn.as_mut() => {
                if let Err(e) = res {
                    debug!(conn = %id, error = %e, "connection ended with error");
                }
                break;
            }
            changed = state_rx.changed() => {
                // The sender lives in `reporter`, which outlives this loop.
                if changed.is_err() {
                    break;
                }
            }
            _ = sleep_or_forever(deadline) => {
                debug!(
                    conn = %id, state = %state, deadline = ?deadline,
                    "deadline exceeded, closing"
                );
                break;
            }
            _ = shutdown.cancelled(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }

    // Dropping the connection drops any unsent body, which reports Idle.
    drop(conn);
    reporter.enter(ConnState::Closed);
}
