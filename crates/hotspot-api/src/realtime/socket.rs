// A single primary-channel session: handshake (canonical path, then the
// legacy path), registration, keep-alive, and the read loop.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Notify, broadcast, watch};
use tokio::time::{Instant, interval_at};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::message::{ClientFrame, PushMessage, parse_and_broadcast};
use crate::error::Error;
use crate::models::AddressHint;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    Closed { code: Option<u16> },
    Cancelled,
    ManualReconnect,
}

/// Build a channel URL under `base`, switching to the given scheme
/// family and carrying the address as `?ip=`.
pub(crate) fn channel_url(base: &Url, path: &str, ip: Option<&str>, websocket: bool) -> Result<Url, Error> {
    let secure = matches!(base.scheme(), "https" | "wss");
    let scheme = match (websocket, secure) {
        (true, true) => "wss",
        (true, false) => "ws",
        (false, true) => "https",
        (false, false) => "http",
    };

    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|()| Error::WebSocketConnect(format!("unusable realtime base URL: {base}")))?;
    let prefix = base.path().trim_end_matches('/');
    url.set_path(&format!("{prefix}{path}"));
    url.set_query(None);
    if let Some(ip) = ip {
        url.query_pairs_mut().append_pair("ip", ip);
    }
    Ok(url)
}

/// Handshake on the canonical path; fall back to the legacy path when
/// the server rejects the upgrade with an HTTP error.
pub(crate) async fn connect(
    base: &Url,
    canonical_path: &str,
    legacy_path: &str,
    ip: Option<&str>,
) -> Result<WsStream, Error> {
    let canonical = channel_url(base, canonical_path, ip, true)?;
    tracing::info!(url = %canonical, "connecting realtime channel");

    match tokio_tungstenite::connect_async(canonical.as_str()).await {
        Ok((ws, _)) => Ok(ws),
        Err(tungstenite::Error::Http(resp)) => {
            let legacy = channel_url(base, legacy_path, ip, true)?;
            tracing::warn!(
                status = %resp.status(),
                url = %legacy,
                "canonical realtime path rejected, trying legacy path"
            );
            let (ws, _) = tokio_tungstenite::connect_async(legacy.as_str())
                .await
                .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
            Ok(ws)
        }
        Err(e) => Err(Error::WebSocketConnect(e.to_string())),
    }
}

pub(crate) struct SessionContext<'a> {
    pub identity: &'a mut watch::Receiver<Option<AddressHint>>,
    pub messages: &'a broadcast::Sender<Arc<PushMessage>>,
    pub keepalive: Duration,
    pub cancel: &'a CancellationToken,
    pub reconnect: &'a Notify,
}

/// Drive an open socket until it closes, is cancelled, or a manual
/// reconnect is requested.
pub(crate) async fn run_session(ws: WsStream, mut ctx: SessionContext<'_>) -> Result<SessionEnd, Error> {
    let (mut write, mut read) = ws.split();

    let hint = ctx.identity.borrow_and_update().clone().unwrap_or_default();
    let mut registered_ip = hint.ip.clone();
    write.send(register_frame(&hint)?).await.map_err(ws_err)?;
    tracing::debug!(ip = ?hint.ip, mac = ?hint.mac, "registered on realtime channel");

    let mut keepalive = interval_at(Instant::now() + ctx.keepalive, ctx.keepalive);
    let mut identity_open = true;

    loop {
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(SessionEnd::Cancelled);
            }
            () = ctx.reconnect.notified() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(SessionEnd::ManualReconnect);
            }
            changed = ctx.identity.changed(), if identity_open => {
                if changed.is_err() {
                    identity_open = false;
                    continue;
                }
                let hint = ctx.identity.borrow_and_update().clone().unwrap_or_default();
                if hint.ip != registered_ip {
                    tracing::info!(ip = ?hint.ip, "address changed, re-registering");
                    write.send(register_frame(&hint)?).await.map_err(ws_err)?;
                    registered_ip = hint.ip;
                }
            }
            _ = keepalive.tick() => {
                let ping = serde_json::to_string(&ClientFrame::Ping)
                    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
                write.send(Message::text(ping)).await.map_err(ws_err)?;
                tracing::trace!("realtime keep-alive sent");
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => parse_and_broadcast(&text, ctx.messages),
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.as_ref().map(|cf| u16::from(cf.code));
                        if let Some(ref cf) = frame {
                            tracing::info!(code = %cf.code, reason = %cf.reason, "realtime close frame received");
                        } else {
                            tracing::info!("realtime close frame received (no payload)");
                        }
                        return Ok(SessionEnd::Closed { code });
                    }
                    Some(Err(e)) => return Err(ws_err(e)),
                    None => {
                        tracing::info!("realtime stream ended");
                        return Ok(SessionEnd::Closed { code: None });
                    }
                    // Ping/Pong are answered by tungstenite; binary frames are unused.
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

fn register_frame(hint: &AddressHint) -> Result<Message, Error> {
    let frame = ClientFrame::Register {
        ip: hint.ip.as_deref(),
        mac: hint.mac.as_deref(),
    };
    serde_json::to_string(&frame)
        .map(Message::text)
        .map_err(|e| Error::WebSocketConnect(e.to_string()))
}

#[allow(clippy::needless_pass_by_value)]
fn ws_err(e: tungstenite::Error) -> Error {
    Error::WebSocketConnect(e.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn channel_url_switches_scheme_and_adds_ip() {
        let base = Url::parse("https://portal.example.net/api").unwrap();
        let url = channel_url(&base, "/ws/client-info", Some("10.5.50.23"), true).unwrap();
        assert_eq!(url.as_str(), "wss://portal.example.net/api/ws/client-info?ip=10.5.50.23");

        let push = channel_url(&base, "/sse/client-info", None, false).unwrap();
        assert_eq!(push.as_str(), "https://portal.example.net/api/sse/client-info");
    }

    #[test]
    fn plain_http_base_maps_to_ws() {
        let base = Url::parse("http://10.0.0.2:8080/").unwrap();
        let url = channel_url(&base, "/ws", None, true).unwrap();
        assert_eq!(url.as_str(), "ws://10.0.0.2:8080/ws");
    }
}
