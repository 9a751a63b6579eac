// HTTP push fallback: a long-lived `text/event-stream` response whose
// `data:` payloads carry the same messages as the primary channel.

use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use bytes::{Buf, BytesMut};
use futures_util::{Stream, StreamExt, pin_mut};
use reqwest::header::ACCEPT;
use tokio::sync::{Notify, broadcast};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::message::{PushMessage, parse_and_broadcast};
use crate::error::Error;

/// Backoff for reconnecting the push stream: `base * 2^attempt`, capped.
#[derive(Debug, Clone)]
pub struct PushBackoff {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for PushBackoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl PushBackoff {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Why the fallback loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FallbackEnd {
    Cancelled,
    ManualReconnect,
}

/// Keep a push stream open until cancelled or a manual reconnect asks
/// for the primary channel again.
pub(crate) async fn run_fallback(
    http: &reqwest::Client,
    url: &Url,
    backoff: &PushBackoff,
    messages: &broadcast::Sender<Arc<PushMessage>>,
    cancel: &CancellationToken,
    reconnect: &Notify,
) -> FallbackEnd {
    let mut attempt: u32 = 0;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return FallbackEnd::Cancelled,
            () = reconnect.notified() => return FallbackEnd::ManualReconnect,
            result = stream_once(http, url, messages) => {
                match result {
                    Ok(delivered) => {
                        tracing::info!(delivered, "push stream ended");
                        if delivered > 0 {
                            attempt = 0;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, attempt, "push stream failed"),
                }
            }
        }

        let delay = backoff.delay_for(attempt);
        tracing::debug!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "waiting before reopening push stream"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => return FallbackEnd::Cancelled,
            () = reconnect.notified() => return FallbackEnd::ManualReconnect,
            () = tokio::time::sleep(delay) => {}
        }
        attempt = attempt.saturating_add(1);
    }
}

/// Open the stream once and broadcast every message until it ends.
/// Returns the number of frames handed to the broadcaster.
async fn stream_once(
    http: &reqwest::Client,
    url: &Url,
    messages: &broadcast::Sender<Arc<PushMessage>>,
) -> Result<usize, Error> {
    tracing::info!(url = %url, "opening push stream");
    let resp = http
        .get(url.clone())
        .header(ACCEPT, "text/event-stream")
        .send()
        .await?
        .error_for_status()?;

    let events = event_payloads(resp);
    pin_mut!(events);

    let mut delivered = 0;
    while let Some(payload) = events.next().await {
        parse_and_broadcast(&payload?, messages);
        delivered += 1;
    }
    Ok(delivered)
}

fn event_payloads(mut resp: reqwest::Response) -> impl Stream<Item = Result<String, Error>> {
    try_stream! {
        let mut parser = EventParser::default();
        while let Some(chunk) = resp.chunk().await? {
            for payload in parser.push(&chunk) {
                yield payload;
            }
        }
        if let Some(payload) = parser.finish() {
            yield payload;
        }
    }
}

// ── Event-stream parsing ─────────────────────────────────────────────

/// Incremental `text/event-stream` parser that yields `data` payloads.
///
/// Multi-line `data:` fields are joined with `\n`; comments and other
/// fields are skipped. Bytes are buffered until a full line arrives so
/// UTF-8 sequences split across chunks survive.
#[derive(Debug, Default)]
pub(crate) struct EventParser {
    buf: BytesMut,
    data: Vec<String>,
}

impl EventParser {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line = self.buf.split_to(pos);
            self.buf.advance(1);
            let line = String::from_utf8_lossy(&line);
            let line = line.strip_suffix('\r').unwrap_or(&*line);

            if line.is_empty() {
                if let Some(payload) = self.dispatch() {
                    out.push(payload);
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data
                    .push(value.strip_prefix(' ').unwrap_or(value).to_owned());
            }
        }
        out
    }

    /// Flush an event left without a terminating blank line.
    pub(crate) fn finish(&mut self) -> Option<String> {
        self.dispatch()
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        Some(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_events_across_chunks() {
        let mut p = EventParser::default();
        assert!(p.push(b": keep-alive\n\ndata: {\"type\":\"pi").is_empty());
        let events = p.push(b"ng\"}\r\n\r\ndata: a\ndata: b\n\n");
        assert_eq!(events, vec![r#"{"type":"ping"}"#.to_string(), "a\nb".to_string()]);
    }

    #[test]
    fn finish_flushes_trailing_event() {
        let mut p = EventParser::default();
        assert!(p.push(b"event: update\ndata: tail\n").is_empty());
        assert_eq!(p.finish().as_deref(), Some("tail"));
        assert_eq!(p.finish(), None);
    }

    #[test]
    fn push_backoff_doubles_to_cap() {
        let b = PushBackoff::default();
        assert_eq!(b.delay_for(0), Duration::from_secs(5));
        assert_eq!(b.delay_for(2), Duration::from_secs(20));
        assert_eq!(b.delay_for(4), Duration::from_secs(60));
        assert_eq!(b.delay_for(30), Duration::from_secs(60));
    }
}
