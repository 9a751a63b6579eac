use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A server-pushed message on the realtime channel or its HTTP fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// The backend resolved this client's address asynchronously.
    MacDetected {
        #[serde(default)]
        ip: Option<String>,
        #[serde(default)]
        mac: Option<String>,
    },
    /// The backend dropped its cached view of an address.
    CacheCleared {
        #[serde(default)]
        ip: Option<String>,
    },
    Ping {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    Welcome {
        #[serde(default)]
        message: Option<String>,
    },
}

/// Outbound frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ClientFrame<'a> {
    Register {
        ip: Option<&'a str>,
        mac: Option<&'a str>,
    },
    Ping,
}

/// Parse a text frame and broadcast it. Unknown types and malformed
/// frames are dropped.
pub(crate) fn parse_and_broadcast(text: &str, tx: &broadcast::Sender<Arc<PushMessage>>) {
    match serde_json::from_str::<PushMessage>(text) {
        Ok(msg) => {
            tracing::trace!(?msg, "realtime message");
            // No subscribers is fine.
            let _ = tx.send(Arc::new(msg));
        }
        Err(e) => tracing::debug!(error = %e, "ignoring realtime frame"),
    }
}
