// Resilient request layer.
//
// Wraps `reqwest::Client` with backend URL construction, identity and
// bearer headers, retry-with-backoff for transient failures, a single
// refresh-and-replay on 401, a per-backend circuit breaker, and
// per-endpoint metrics. Every backend call in the workspace goes through
// `ApiClient::request`.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::Session;
use crate::circuit::{CircuitBreaker, CircuitConfig};
use crate::error::{Error, ErrorKind};
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::models::{AddressHint, RefreshResponse, decode_body, error_details};
use crate::transport::TransportConfig;

pub const HEADER_DETECTED_IP: &str = "X-Frontend-Detected-IP";
pub const HEADER_DETECTED_MAC: &str = "X-Frontend-Detected-MAC";

// ── Configuration ────────────────────────────────────────────────────

/// Retry policy for transient failures: `base * 2^attempt`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Name of the logical backend (used by the circuit breaker and logs).
    pub backend: String,
    pub retry: RetryPolicy,
    pub circuit: CircuitConfig,
    /// Paths that bypass the circuit breaker and never count against it.
    pub exempt_paths: Vec<String>,
    pub refresh_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend: "portal".into(),
            retry: RetryPolicy::default(),
            circuit: CircuitConfig::default(),
            exempt_paths: vec!["/auth/login".into(), "/auth/refresh-token".into()],
            refresh_path: "/auth/refresh-token".into(),
        }
    }
}

/// Per-request knobs.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    body: Option<serde_json::Value>,
    headers: Vec<(String, String)>,
    retry: bool,
    refresh_on_unauthorized: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            body: None,
            headers: Vec::new(),
            retry: true,
            refresh_on_unauthorized: true,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Opt out of transient-failure retries.
    pub fn no_retry(mut self) -> Self {
        self.retry = false;
        self
    }

    /// Opt out of the 401 refresh-and-replay.
    pub fn no_refresh(mut self) -> Self {
        self.refresh_on_unauthorized = false;
        self
    }
}

/// Result of a fire-and-forget call whose failure is deliberately ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BestEffort {
    Delivered,
    Dropped { kind: ErrorKind, reason: String },
}

impl BestEffort {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

// ── Client ───────────────────────────────────────────────────────────

/// HTTP client for the portal backend.
///
/// Cheap to share behind an `Arc`: all mutable state (session token,
/// circuit breaker, metrics) uses interior mutability.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    config: ClientConfig,
    session: Arc<Session>,
    circuit: CircuitBreaker,
    metrics: MetricsRegistry,
    identity: watch::Receiver<Option<AddressHint>>,
}

impl ApiClient {
    /// Create a client from a `TransportConfig`.
    ///
    /// `identity` is the published address the client reads on every
    /// request; the client never triggers detection itself.
    pub fn new(
        base_url: Url,
        config: ClientConfig,
        transport: &TransportConfig,
        identity: watch::Receiver<Option<AddressHint>>,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url, config, identity))
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        base_url: Url,
        config: ClientConfig,
        identity: watch::Receiver<Option<AddressHint>>,
    ) -> Self {
        let circuit = CircuitBreaker::new(config.backend.clone(), config.circuit.clone());
        Self {
            http,
            base_url,
            config,
            session: Arc::new(Session::new()),
            circuit,
            metrics: MetricsRegistry::new(),
            identity,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The underlying HTTP client.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Copy of every endpoint's counters, for persistence.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Fold counters persisted by a previous process into this one.
    pub fn restore_metrics(&self, snapshot: MetricsSnapshot) {
        self.metrics.restore(snapshot);
    }

    /// A receiver for the published address (for the realtime channel).
    pub fn identity_watch(&self) -> watch::Receiver<Option<AddressHint>> {
        self.identity.clone()
    }

    fn is_exempt(&self, path: &str) -> bool {
        self.config.exempt_paths.iter().any(|p| p == path)
    }

    pub(crate) fn url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    // ── Request entry points ─────────────────────────────────────────

    /// Send a request and decode the (possibly enveloped) JSON response.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        opts: RequestOptions,
    ) -> Result<T, Error> {
        let exempt = self.is_exempt(path);
        // Held until the outcome is recorded; dropped early if the caller
        // abandons this future.
        let _permit = if exempt {
            None
        } else {
            match self.circuit.try_acquire() {
                Ok(permit) => Some(permit),
                Err(e) => {
                    debug!(%path, error = %e, "request refused by circuit breaker");
                    return Err(e);
                }
            }
        };

        self.metrics.record_request(path);
        let mut result = self.send_with_retry(&method, path, &opts).await;

        if matches!(result, Err(Error::Authentication { .. }))
            && opts.refresh_on_unauthorized
            && self.session.is_active()
        {
            result = self.refresh_and_replay(&method, path, &opts).await;
        }

        if !exempt {
            // Any answer other than a transient failure proves the backend alive.
            match result.as_ref().err().map(Error::kind) {
                Some(ErrorKind::Transient) => self.circuit.record_failure(),
                Some(ErrorKind::RateLimit | ErrorKind::CircuitOpen) => {
                    self.circuit.record_neutral();
                }
                _ => self.circuit.record_success(),
            }
        }

        let outcome = result.and_then(|(status, body)| decode_body(status, &body));
        if let Err(ref e) = outcome {
            self.metrics.record_failure(path, &e.to_string());
        }
        outcome
    }

    /// Run a request whose failure is logged and ignored.
    pub async fn best_effort(&self, method: Method, path: &str, opts: RequestOptions) -> BestEffort {
        match self
            .request::<serde_json::Value>(method, path, opts.no_retry())
            .await
        {
            Ok(_) => BestEffort::Delivered,
            Err(e) => {
                debug!(%path, error = %e, "best-effort request dropped");
                BestEffort::Dropped {
                    kind: e.kind(),
                    reason: e.to_string(),
                }
            }
        }
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn send_with_retry(
        &self,
        method: &Method,
        path: &str,
        opts: &RequestOptions,
    ) -> Result<(u16, String), Error> {
        let attempts = if opts.retry {
            self.config.retry.max_attempts.max(1)
        } else {
            1
        };

        let mut attempt = 0;
        loop {
            match self.send_once(method, path, opts).await {
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self.config.retry.delay_for(attempt);
                    self.metrics.record_retry(path);
                    warn!(
                        %path,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn send_once(
        &self,
        method: &Method,
        path: &str,
        opts: &RequestOptions,
    ) -> Result<(u16, String), Error> {
        let url = self.url(path)?;
        debug!("{method} {url}");

        let mut builder = self.http.request(method.clone(), url);
        if let Some(bearer) = self.session.bearer() {
            builder = builder.header(AUTHORIZATION, bearer);
        }
        let hint = self.identity.borrow().clone();
        if let Some(hint) = hint {
            if let Some(ip) = hint.ip {
                builder = builder.header(HEADER_DETECTED_IP, ip);
            }
            if let Some(mac) = hint.mac {
                builder = builder.header(HEADER_DETECTED_MAC, mac);
            }
        }
        for (name, value) in &opts.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref body) = opts.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        self.metrics.record_status(path, status.as_u16());

        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = resp.text().await?;

        classify(status, retry_after, body)
    }

    async fn refresh_and_replay(
        &self,
        method: &Method,
        path: &str,
        opts: &RequestOptions,
    ) -> Result<(u16, String), Error> {
        info!(%path, "401 with active session, refreshing token");

        match self.refresh_token().await {
            Ok(()) => match self.send_with_retry(method, path, opts).await {
                Err(Error::Authentication { .. }) => {
                    warn!(%path, "replay rejected after refresh, forcing logout");
                    self.session.logout();
                    Err(Error::SessionExpired)
                }
                other => other,
            },
            Err(e) if e.is_transient() => {
                warn!(error = %e, "token refresh failed transiently");
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "token refresh rejected, forcing logout");
                self.session.logout();
                Err(Error::SessionExpired)
            }
        }
    }

    async fn refresh_token(&self) -> Result<(), Error> {
        let path = self.config.refresh_path.as_str();
        self.metrics.record_request(path);
        let opts = RequestOptions::new().no_retry().no_refresh();
        let result = self
            .send_once(&Method::POST, path, &opts)
            .await
            .and_then(|(status, body)| decode_body::<RefreshResponse>(status, &body));

        match result {
            Ok(resp) => {
                self.session.refreshed(SecretString::from(resp.token));
                Ok(())
            }
            Err(e) => {
                self.metrics.record_failure(path, &e.to_string());
                Err(e)
            }
        }
    }
}

/// Map an HTTP status (and body) into the error taxonomy.
fn classify(status: StatusCode, retry_after: Option<u64>, body: String) -> Result<(u16, String), Error> {
    if status.is_success() {
        return Ok((status.as_u16(), body));
    }

    let (code, message) = error_details(&body);
    Err(match status {
        StatusCode::UNAUTHORIZED => Error::Authentication { message },
        StatusCode::UNPROCESSABLE_ENTITY => Error::Validation { message, code },
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited {
            retry_after_secs: retry_after,
        },
        s if s.is_server_error() => Error::Server {
            status: s.as_u16(),
            message,
        },
        s => Error::Api {
            status: s.as_u16(),
            code,
            message,
        },
    })
}
