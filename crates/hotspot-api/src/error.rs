use thiserror::Error;

/// Top-level error type for the `hotspot-api` crate.
///
/// Covers every failure mode of the transport layer: authentication,
/// HTTP transport, backend envelopes, rate limiting, the circuit breaker,
/// and the realtime channel. `hotspot-core` maps these into domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The backend rejected the request with HTTP 401.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Token refresh failed or a replayed request was rejected again.
    /// The session token has been cleared.
    #[error("Session expired -- re-authentication required")]
    SessionExpired,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, reset, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Backend responses ───────────────────────────────────────────
    /// HTTP 429 or an explicit throttling answer. Never retried immediately.
    #[error(
        "Rate limited{}",
        .retry_after_secs.map_or_else(String::new, |s| format!(" -- retry after {s}s"))
    )]
    RateLimited { retry_after_secs: Option<u64> },

    /// HTTP 422. Surfaced to the caller untouched.
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        code: Option<String>,
    },

    /// 5xx that outlived the retry budget.
    #[error("Server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// Any other non-success answer, including `{ success: false }` envelopes.
    #[error("API error (HTTP {status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    // ── Circuit breaker ─────────────────────────────────────────────
    /// The backend circuit is open; the request never reached the network.
    #[error("Backend {backend} temporarily disabled -- retry in {retry_in_ms}ms")]
    CircuitOpen { backend: String, retry_in_ms: u64 },

    // ── Realtime channel ────────────────────────────────────────────
    /// WebSocket handshake or session failure.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

/// Coarse classification used by the retry loop, the circuit breaker,
/// and callers deciding what (if anything) to show the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Reset / timeout / refused connection, or a 5xx. Retried with backoff.
    Transient,
    /// 429 or backend throttling. Deferred to a cooldown.
    RateLimit,
    /// 401 or an expired session.
    Authentication,
    /// 422.
    Validation,
    /// The circuit breaker refused the request.
    CircuitOpen,
    /// Everything else: surfaced as-is, never retried.
    Terminal,
}

impl Error {
    /// Classify this error into the transport taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                ErrorKind::Transient
            }
            Self::Timeout { .. } | Self::Server { .. } | Self::WebSocketConnect(_) => {
                ErrorKind::Transient
            }
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::Authentication { .. } | Self::SessionExpired => ErrorKind::Authentication,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            _ => ErrorKind::Terminal,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Returns `true` for 429 / throttling answers.
    pub fn is_rate_limited(&self) -> bool {
        self.kind() == ErrorKind::RateLimit
    }

    /// Returns `true` if this error indicates auth has expired
    /// and re-authentication might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        self.kind() == ErrorKind::Authentication
    }

    /// Whether the failure should reach a user-facing notification.
    ///
    /// Rate limiting and an open circuit are handled by cooldowns and
    /// must never cause a logout or an error toast.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Self::Server { .. } | Self::Validation { .. } | Self::Api { .. }
        )
    }

    /// Returns the `Retry-After` hint carried by a rate-limit error.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Self::RateLimited {
                retry_after_secs: Some(s),
            } => Some(std::time::Duration::from_secs(*s)),
            _ => None,
        }
    }

    /// HTTP status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            Self::Authentication { .. } => Some(401),
            Self::RateLimited { .. } => Some(429),
            Self::Validation { .. } => Some(422),
            Self::Server { status, .. } | Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Extract the backend `errorCode`, if available.
    pub fn api_error_code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } | Self::Validation { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_covers_taxonomy() {
        let server = Error::Server {
            status: 503,
            message: "unavailable".into(),
        };
        assert_eq!(server.kind(), ErrorKind::Transient);
        assert!(server.is_user_visible());

        let limited = Error::RateLimited {
            retry_after_secs: Some(12),
        };
        assert!(limited.is_rate_limited());
        assert!(!limited.is_user_visible());
        assert_eq!(limited.retry_after(), Some(std::time::Duration::from_secs(12)));

        let open = Error::CircuitOpen {
            backend: "api".into(),
            retry_in_ms: 10,
        };
        assert_eq!(open.kind(), ErrorKind::CircuitOpen);
        assert!(!open.is_user_visible());

        let invalid = Error::Validation {
            message: "phone required".into(),
            code: Some("VALIDATION".into()),
        };
        assert_eq!(invalid.kind(), ErrorKind::Validation);
        assert_eq!(invalid.api_error_code(), Some("VALIDATION"));
        assert_eq!(invalid.status(), Some(422));
    }

    #[test]
    fn rate_limit_message_includes_hint() {
        let with = Error::RateLimited {
            retry_after_secs: Some(5),
        };
        let without = Error::RateLimited {
            retry_after_secs: None,
        };
        assert_eq!(with.to_string(), "Rate limited -- retry after 5s");
        assert_eq!(without.to_string(), "Rate limited");
    }
}
