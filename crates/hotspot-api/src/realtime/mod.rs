//! Realtime update channel with auto-reconnect and an HTTP push fallback.
//!
//! A background scheduler drives a pure [`ChannelMachine`]: it opens the
//! websocket, registers the published client address, keeps the link
//! alive, and reconnects with exponential backoff. After a policy close
//! (1008) or too many attempts the channel degrades to a
//! `text/event-stream` fallback until [`RealtimeHandle::reconnect`] is
//! called. Parsed messages fan out through a [`broadcast`] channel.
//!
//! # Example
//!
//! ```rust,ignore
//! use hotspot_api::realtime::{RealtimeConfig, RealtimeHandle};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = RealtimeConfig::new(Url::parse("https://portal.example.net")?);
//! let handle = RealtimeHandle::spawn(config, identity_rx, http, CancellationToken::new());
//! let mut rx = handle.subscribe();
//! while let Ok(msg) = rx.recv().await {
//!     println!("{msg:?}");
//! }
//! ```

mod machine;
mod message;
mod push;
mod socket;

use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, broadcast, watch};
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

pub use machine::{
    CLOSE_POLICY_VIOLATION, ChannelAction, ChannelEvent, ChannelMachine, ChannelState,
    ReconnectConfig,
};
pub use message::PushMessage;
pub use push::PushBackoff;

use crate::models::AddressHint;
use push::FallbackEnd;
use socket::{SessionContext, SessionEnd};

const MESSAGE_CHANNEL_CAPACITY: usize = 256;

// ── RealtimeConfig ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Base URL of the realtime server (`http(s)` or `ws(s)`).
    pub base_url: Url,
    /// Base URL for the push fallback; defaults to `base_url`.
    pub push_base_url: Option<Url>,
    pub canonical_path: String,
    pub legacy_path: String,
    pub push_path: String,
    pub reconnect: ReconnectConfig,
    pub keepalive: Duration,
    pub push_backoff: PushBackoff,
}

impl RealtimeConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            push_base_url: None,
            canonical_path: "/ws/client-info".into(),
            legacy_path: "/ws".into(),
            push_path: "/sse/client-info".into(),
            reconnect: ReconnectConfig::default(),
            keepalive: Duration::from_secs(25),
            push_backoff: PushBackoff::default(),
        }
    }
}

// ── RealtimeHandle ───────────────────────────────────────────────────

/// Handle to a running realtime channel.
///
/// Call [`shutdown`](Self::shutdown) (or cancel the token passed to
/// [`spawn`](Self::spawn)) to tear down the background task.
pub struct RealtimeHandle {
    messages: broadcast::Sender<Arc<PushMessage>>,
    state: Arc<watch::Sender<ChannelState>>,
    reconnect: Arc<Notify>,
    cancel: CancellationToken,
}

impl RealtimeHandle {
    /// Spawn the scheduler. Must be called inside a Tokio runtime.
    ///
    /// `identity` is the published client address; it is registered on
    /// every open and re-registered when the IP changes. `http` serves the
    /// push fallback and should not carry a total request timeout.
    pub fn spawn(
        config: RealtimeConfig,
        identity: watch::Receiver<Option<AddressHint>>,
        http: reqwest::Client,
        cancel: CancellationToken,
    ) -> Self {
        let (messages, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        let (state, _) = watch::channel(ChannelState::Connecting);
        let state = Arc::new(state);
        let reconnect = Arc::new(Notify::new());

        let scheduler = Scheduler {
            machine: ChannelMachine::new(config.reconnect.clone(), jitter_phase()),
            config,
            identity,
            http,
            messages: messages.clone(),
            state: Arc::clone(&state),
            reconnect: Arc::clone(&reconnect),
            cancel: cancel.clone(),
        };
        tokio::spawn(scheduler.run());

        Self {
            messages,
            state,
            reconnect,
            cancel,
        }
    }

    /// A new receiver for pushed messages.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<PushMessage>> {
        self.messages.subscribe()
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Watch channel-state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Manually reconnect the primary channel. This is the only way out
    /// of `Degraded`.
    pub fn reconnect(&self) {
        self.reconnect.notify_one();
    }

    /// Stop the channel; the state becomes `Closed`.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.state.send_replace(ChannelState::Closed);
    }
}

// ── Scheduler ────────────────────────────────────────────────────────

struct Scheduler {
    machine: ChannelMachine,
    config: RealtimeConfig,
    identity: watch::Receiver<Option<AddressHint>>,
    http: reqwest::Client,
    messages: broadcast::Sender<Arc<PushMessage>>,
    state: Arc<watch::Sender<ChannelState>>,
    reconnect: Arc<Notify>,
    cancel: CancellationToken,
}

impl Scheduler {
    async fn run(mut self) {
        let mut action = ChannelAction::Connect;

        loop {
            self.publish();
            let event = match action {
                ChannelAction::Stop => break,
                ChannelAction::Connect => self.run_primary().await,
                ChannelAction::Wait(delay) => {
                    tracing::info!(
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        attempt = self.machine.attempt(),
                        "waiting before realtime reconnect"
                    );
                    let interrupted = tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => Some(ChannelEvent::Shutdown),
                        () = self.reconnect.notified() => Some(ChannelEvent::ManualReconnect),
                        () = tokio::time::sleep(delay) => None,
                    };
                    match interrupted {
                        Some(event) => event,
                        None => {
                            action = ChannelAction::Connect;
                            continue;
                        }
                    }
                }
                ChannelAction::StartFallback => self.run_fallback().await,
                ChannelAction::Idle => {
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => ChannelEvent::Shutdown,
                        () = self.reconnect.notified() => ChannelEvent::ManualReconnect,
                    }
                }
            };
            action = self.machine.handle(event);
        }

        self.state.send_replace(ChannelState::Closed);
        tracing::debug!("realtime scheduler exiting");
    }

    fn publish(&self) {
        let state = if self.cancel.is_cancelled() {
            ChannelState::Closed
        } else {
            self.machine.state()
        };
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    async fn run_primary(&mut self) -> ChannelEvent {
        let ip = self.identity.borrow().as_ref().and_then(|h| h.ip.clone());

        let connected = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return ChannelEvent::Shutdown,
            () = self.reconnect.notified() => return ChannelEvent::ManualReconnect,
            result = socket::connect(
                &self.config.base_url,
                &self.config.canonical_path,
                &self.config.legacy_path,
                ip.as_deref(),
            ) => result,
        };

        let ws = match connected {
            Ok(ws) => ws,
            Err(e) => {
                tracing::warn!(error = %e, attempt = self.machine.attempt(), "realtime connect failed");
                return ChannelEvent::ConnectFailed;
            }
        };

        self.machine.handle(ChannelEvent::HandshakeSucceeded);
        self.publish();
        tracing::info!("realtime channel open");

        let ctx = SessionContext {
            identity: &mut self.identity,
            messages: &self.messages,
            keepalive: self.config.keepalive,
            cancel: &self.cancel,
            reconnect: &self.reconnect,
        };
        match socket::run_session(ws, ctx).await {
            Ok(SessionEnd::Closed { code }) => ChannelEvent::Closed { code },
            Ok(SessionEnd::Cancelled) => ChannelEvent::Shutdown,
            Ok(SessionEnd::ManualReconnect) => ChannelEvent::ManualReconnect,
            Err(e) => {
                tracing::warn!(error = %e, "realtime session error");
                ChannelEvent::Closed { code: None }
            }
        }
    }

    async fn run_fallback(&self) -> ChannelEvent {
        let base = self
            .config
            .push_base_url
            .as_ref()
            .unwrap_or(&self.config.base_url);
        let ip = self.identity.borrow().as_ref().and_then(|h| h.ip.clone());
        let url = match socket::channel_url(base, &self.config.push_path, ip.as_deref(), false) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, "push fallback unavailable");
                return ChannelEvent::Closed { code: None };
            }
        };

        tracing::warn!(url = %url, "realtime channel degraded, switching to push fallback");
        match push::run_fallback(
            &self.http,
            &url,
            &self.config.push_backoff,
            &self.messages,
            &self.cancel,
            &self.reconnect,
        )
        .await
        {
            FallbackEnd::Cancelled => ChannelEvent::Shutdown,
            FallbackEnd::ManualReconnect => ChannelEvent::ManualReconnect,
        }
    }
}

/// Per-channel jitter phase in `[0, 2π)`.
fn jitter_phase() -> f64 {
    let bytes = Uuid::new_v4().into_bytes();
    let seed = u16::from_le_bytes([bytes[0], bytes[1]]);
    f64::from(seed) / f64::from(u16::MAX) * TAU
}
