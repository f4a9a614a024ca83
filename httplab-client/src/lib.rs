use httplab_common::{LabError, Result};
use reqwest::header::{HeaderMap, HeaderValue, CONNECTION};
use std::time::Duration;

/// Idle connections are dropped from the pool after this long.
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// HTTP client configuration for the load generator
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Reuse TCP connections across requests. `false` forces a fresh
    /// handshake for every request.
    pub keep_alive: bool,
    /// Deadline for one request, including draining the body.
    pub timeout: Duration,
    /// Idle connections kept per host when keep-alive is on.
    pub max_idle_per_host: usize,
}

impl ClientConfig {
    /// Pool sized for `concurrency` workers sharing one client.
    pub fn for_concurrency(concurrency: usize, keep_alive: bool, timeout: Duration) -> Self {
        Self { keep_alive, timeout, max_idle_per_host: concurrency.saturating_mul(2) }
    }
}

/// Load generator HTTP client
pub struct Client {
    pub config: ClientConfig,
    http_client: reqwest::Client,
}

impl Client {
    /// Create a new client with the given configuration
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT);

        if config.keep_alive {
            builder = builder.pool_max_idle_per_host(config.max_idle_per_host);
        } else {
            let mut headers = HeaderMap::new();
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
            builder = builder.pool_max_idle_per_host(0).default_headers(headers);
        }

        let http_client = builder
            .build()
            .map_err(|e| LabError::InvalidConfig(format!("cannot build HTTP client: {e}")))?;

        Ok(Self { config, http_client })
    }

    /// Issue one GET and drain the whole response body so the connection can
    /// go back to the pool. Returns the number of body bytes read.
    ///
    /// Transport failures are classified into the shared error taxonomy; a
    /// status of 400 or above is `ApplicationError`.
    pub async fn get(&self, url: &str) -> Result<usize> {
        let response = self.http_client.get(url).send().await.map_err(classify)?;

        let status = response.status();
        let body = response.bytes().await.map_err(classify)?;

        if status.as_u16() >= 400 {
            return Err(LabError::ApplicationError(status.as_u16()));
        }
        Ok(body.len())
    }
}

/// Map a `reqwest` error onto the shared error taxonomy.
pub fn classify(err: reqwest::Error) -> LabError {
    if err.is_timeout() {
        LabError::TransportTimeout(err.to_string())
    } else if err.is_connect() {
        LabError::DialFailure(err.to_string())
    } else if err.is_body() || err.is_decode() {
        LabError::PeerClosedConnection(err.to_string())
    } else {
        LabError::Transport(err.to_string())
    }
}

/// Check that `target` is an absolute `http`/`https` URL with a host.
pub fn validate_target(target: &str) -> Result<()> {
    let url = reqwest::Url::parse(target)
        .map_err(|e| LabError::InvalidConfig(format!("invalid target {target:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(LabError::InvalidConfig(format!(
                "unsupported scheme {other:?} in {target:?}"
            )))
        }
    }
    if url.host_str().is_none() {
        return Err(LabError::InvalidConfig(format!("target {target:?} has no host")));
    }
    Ok(())
}
