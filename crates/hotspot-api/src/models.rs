// Wire shapes for the handful of backend responses the transport layer
// needs to understand. Each is decoded once at the boundary into a
// tagged type so callers never re-check optional fields.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The `{ success, errorCode?, message?, data? }` envelope.
///
/// Only consulted when the body actually carries a boolean `success`
/// key; bare payloads are decoded directly.
#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default, rename = "errorCode")]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Decode a 2xx body, unwrapping the envelope when present.
pub(crate) fn decode_body<T: DeserializeOwned>(status: u16, body: &str) -> Result<T, Error> {
    let value: serde_json::Value = if body.trim().is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(body).map_err(|e| deserialization(&e, body))?
    };

    let has_envelope = value
        .get("success")
        .is_some_and(serde_json::Value::is_boolean);

    let payload = if has_envelope {
        let envelope: Envelope =
            serde_json::from_value(value.clone()).map_err(|e| deserialization(&e, body))?;
        if !envelope.success {
            return Err(Error::Api {
                status,
                code: envelope.error_code,
                message: envelope
                    .message
                    .unwrap_or_else(|| "request was not successful".into()),
            });
        }
        envelope.data.unwrap_or(value)
    } else {
        value
    };

    serde_json::from_value(payload).map_err(|e| deserialization(&e, body))
}

/// Pull `(errorCode, message)` out of an error body, falling back to a
/// truncated preview of the raw text.
pub(crate) fn error_details(body: &str) -> (Option<String>, String) {
    if let Ok(envelope) = serde_json::from_str::<Envelope>(body) {
        if let Some(message) = envelope.message {
            return (envelope.error_code, message);
        }
        return (envelope.error_code, preview(body));
    }
    (None, preview(body))
}

fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}

fn deserialization(err: &serde_json::Error, body: &str) -> Error {
    Error::Deserialization {
        message: format!("{err} (body preview: {:?})", preview(body)),
        body: body.to_owned(),
    }
}

// ── Detection endpoint ──────────────────────────────────────────────

/// Response of `GET /auth/detect-client-info`.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectResponse {
    pub summary: DetectSummary,
}

/// What the backend observed about the calling client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectSummary {
    #[serde(default)]
    pub detected_ip: Option<String>,
    #[serde(default)]
    pub detected_mac: Option<String>,
    #[serde(default)]
    pub access_mode: Option<String>,
}

// ── Device sync endpoint ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum SyncStatus {
    DeviceValid,
    DeviceUnregistered,
    Throttled,
    RateLimited,
    Error,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SyncDeviceResponse {
    status: SyncStatus,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Decoded answer of `POST /auth/sync-device`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Valid,
    Unregistered,
    Throttled { retry_after_secs: Option<u64> },
    RateLimited { retry_after_secs: Option<u64> },
    Error(String),
}

impl From<SyncDeviceResponse> for SyncOutcome {
    fn from(resp: SyncDeviceResponse) -> Self {
        match resp.status {
            SyncStatus::DeviceValid => Self::Valid,
            SyncStatus::DeviceUnregistered => Self::Unregistered,
            SyncStatus::Throttled => Self::Throttled {
                retry_after_secs: resp.retry_after,
            },
            SyncStatus::RateLimited => Self::RateLimited {
                retry_after_secs: resp.retry_after,
            },
            SyncStatus::Error => {
                Self::Error(resp.message.unwrap_or_else(|| "backend reported ERROR".into()))
            }
        }
    }
}

// ── Token refresh endpoint ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct RefreshResponse {
    #[serde(alias = "access_token")]
    pub token: String,
}

// ── Identity hint ───────────────────────────────────────────────────

/// The currently resolved client address, as attached to outgoing
/// requests and registered on the realtime channel.
///
/// Published by the detection service; the transport layer only reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressHint {
    pub ip: Option<String>,
    pub mac: Option<String>,
}
