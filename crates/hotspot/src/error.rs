//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use hotspot_config::ConfigError;
use hotspot_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const UNAVAILABLE: i32 = 5;
    pub const RATE_LIMITED: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach the portal backend at {url}")]
    #[diagnostic(
        code(hotspot::connection_failed),
        help(
            "Check that the backend is reachable from this network.\n\
             URL: {url}\n\
             Captive networks often block traffic until the portal page is opened."
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(hotspot::timeout),
        help("Increase timeout with --timeout or check backend responsiveness.")
    )]
    Timeout { seconds: u64 },

    #[error("Portal backend {backend} is temporarily unavailable")]
    #[diagnostic(
        code(hotspot::unavailable),
        help("Too many consecutive failures; retry in {retry_in_secs}s.")
    )]
    Unavailable { backend: String, retry_in_secs: u64 },

    #[error("Rate limited by the portal backend")]
    #[diagnostic(code(hotspot::rate_limited), help("{hint}"))]
    RateLimited { hint: String },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(hotspot::auth_failed),
        help("Store a fresh token with: hotspot config set-token <TOKEN>")
    )]
    AuthFailed { message: String },

    #[error("Session expired")]
    #[diagnostic(
        code(hotspot::session_expired),
        help("The token could not be refreshed. Log in again and store the new token.")
    )]
    SessionExpired,

    // ── Identity ─────────────────────────────────────────────────────

    #[error("Could not determine this device's identity")]
    #[diagnostic(
        code(hotspot::no_identity),
        help(
            "No detection source produced a usable address.\n\
             Pass the landing URL with --portal-url, or retry with -v for details."
        )
    )]
    NoIdentity,

    // ── API ──────────────────────────────────────────────────────────

    #[error("API error ({code}): {message}")]
    #[diagnostic(code(hotspot::api_error))]
    ApiError { code: String, message: String },

    #[error("Realtime channel failed: {reason}")]
    #[diagnostic(code(hotspot::realtime))]
    Realtime { reason: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(hotspot::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(hotspot::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: hotspot config add <NAME> --backend <URL>"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No portal backend configured")]
    #[diagnostic(
        code(hotspot::no_config),
        help(
            "Create a profile with: hotspot config add <NAME> --backend <URL>\n\
             or pass --backend. Config file: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(hotspot::config))]
    Config { message: String },

    #[error("Keyring error: {message}")]
    #[diagnostic(
        code(hotspot::keyring),
        help("No usable system keyring; set HOTSPOT_TOKEN or token_env in the profile instead.")
    )]
    Keyring { message: String },

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Unavailable { .. } => exit_code::UNAVAILABLE,
            Self::RateLimited { .. } => exit_code::RATE_LIMITED,
            Self::AuthFailed { .. } | Self::SessionExpired => exit_code::AUTH,
            Self::NoIdentity | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::NoConfig { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => Self::ConnectionFailed { url, reason },
            CoreError::AuthenticationFailed { message } => Self::AuthFailed { message },
            CoreError::SessionExpired => Self::SessionExpired,
            CoreError::Timeout { timeout_secs } => Self::Timeout {
                seconds: timeout_secs,
            },
            CoreError::RateLimited { retry_after_secs } => Self::RateLimited {
                hint: retry_after_secs.map_or_else(
                    || "Wait a moment before retrying.".into(),
                    |s| format!("Retry after {s}s."),
                ),
            },
            CoreError::Unavailable {
                backend,
                retry_in_ms,
            } => Self::Unavailable {
                backend,
                retry_in_secs: retry_in_ms.div_ceil(1000),
            },
            CoreError::NoIdentity => Self::NoIdentity,
            CoreError::InvalidMac { value } => Self::Validation {
                field: "mac".into(),
                reason: format!("not a MAC address: {value}"),
            },
            CoreError::ValidationFailed { message, code } => Self::ApiError {
                code: code.unwrap_or_else(|| "validation".into()),
                message,
            },
            CoreError::Api {
                message,
                code,
                status,
            } => Self::ApiError {
                code: code
                    .or_else(|| status.map(|s| s.to_string()))
                    .unwrap_or_default(),
                message,
            },
            CoreError::Realtime { reason } => Self::Realtime { reason },
            CoreError::Storage { path, message } => Self::Config {
                message: format!("{path}: {message}"),
            },
            CoreError::Config { message } => Self::Config { message },
            CoreError::Internal(message) => Self::Internal(message),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::UnknownProfile { name } => Self::ProfileNotFound {
                name,
                available: String::new(),
            },
            ConfigError::Keyring(message) => Self::Keyring { message },
            ConfigError::Io(e) => Self::Io(e),
            other => Self::Config {
                message: other.to_string(),
            },
        }
    }
}
