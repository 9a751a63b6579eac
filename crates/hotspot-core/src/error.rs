// ── Core error types ──
//
// Domain errors from hotspot-core. Consumers never see HTTP envelopes or
// reqwest internals; the `From<hotspot_api::Error>` impl translates
// transport failures into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach portal backend at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Session expired -- log in again")]
    SessionExpired,

    #[error("Portal backend timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Flow control ─────────────────────────────────────────────────
    #[error(
        "Rate limited by portal backend{}",
        .retry_after_secs.map_or_else(String::new, |s| format!(" -- retry after {s}s"))
    )]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Portal backend {backend} unavailable (circuit open, retry in {retry_in_ms}ms)")]
    Unavailable { backend: String, retry_in_ms: u64 },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("No client identity could be resolved")]
    NoIdentity,

    #[error("Invalid MAC address: {value}")]
    InvalidMac { value: String },

    #[error("Validation failed: {message}")]
    ValidationFailed {
        message: String,
        code: Option<String>,
    },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        code: Option<String>,
        status: Option<u16>,
    },

    // ── Realtime ─────────────────────────────────────────────────────
    #[error("Realtime channel error: {reason}")]
    Realtime { reason: String },

    // ── Storage & configuration ──────────────────────────────────────
    #[error("Storage error at {path}: {message}")]
    Storage { path: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether this failure should be shown to the user. Rate limiting and
    /// an open circuit are absorbed by cooldowns.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Self::RateLimited { .. } | Self::Unavailable { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<hotspot_api::Error> for CoreError {
    fn from(err: hotspot_api::Error) -> Self {
        use hotspot_api::Error as Api;

        match err {
            Api::Authentication { message } => CoreError::AuthenticationFailed { message },
            Api::SessionExpired => CoreError::SessionExpired,
            Api::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        code: None,
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            Api::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            Api::RateLimited { retry_after_secs } => CoreError::RateLimited { retry_after_secs },
            Api::Validation { message, code } => CoreError::ValidationFailed { message, code },
            Api::Server { status, message } => CoreError::Api {
                message,
                code: None,
                status: Some(status),
            },
            Api::Api {
                status,
                code,
                message,
            } => CoreError::Api {
                message,
                code,
                status: Some(status),
            },
            Api::CircuitOpen {
                backend,
                retry_in_ms,
            } => CoreError::Unavailable {
                backend,
                retry_in_ms,
            },
            Api::WebSocketConnect(reason) => CoreError::Realtime { reason },
            Api::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_circuit_are_silent() {
        let limited = CoreError::from(hotspot_api::Error::RateLimited {
            retry_after_secs: Some(30),
        });
        assert!(matches!(
            limited,
            CoreError::RateLimited {
                retry_after_secs: Some(30)
            }
        ));
        assert!(!limited.is_user_visible());

        let open = CoreError::from(hotspot_api::Error::CircuitOpen {
            backend: "portal".into(),
            retry_in_ms: 100,
        });
        assert!(!open.is_user_visible());
    }

    #[test]
    fn validation_keeps_code() {
        let err = CoreError::from(hotspot_api::Error::Validation {
            message: "bad voucher".into(),
            code: Some("VOUCHER_INVALID".into()),
        });
        assert!(err.is_user_visible());
        assert!(
            matches!(err, CoreError::ValidationFailed { code: Some(ref c), .. } if c == "VOUCHER_INVALID")
        );
    }
}
