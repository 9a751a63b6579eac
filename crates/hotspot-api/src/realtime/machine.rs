// Pure reconnect state machine for the realtime channel.
//
// The machine owns no I/O: the scheduler feeds it events and performs
// the returned action. Keeping it pure lets the backoff schedule and
// the degrade rules be tested without sockets or timers.

use std::time::Duration;

use serde::Serialize;

/// Close code sent by the server on a policy violation.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for the primary channel.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay unit for the first reconnection attempt. Default: 1s.
    pub base_delay: Duration,
    /// Upper bound on any single delay. Default: 60s.
    pub max_delay: Duration,
    /// Growth factor per attempt. Default: 1.8.
    pub factor: f64,
    /// Reconnect attempts allowed before degrading. Default: 25.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            factor: 1.8,
            max_attempts: 25,
        }
    }
}

// ── States, events, actions ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Connecting,
    Open,
    /// Primary channel abandoned; push fallback is running. Sticky until
    /// a manual reconnect.
    Degraded,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    HandshakeSucceeded,
    /// The socket closed; `code` is the close frame code, if any.
    Closed { code: Option<u16> },
    ConnectFailed,
    ManualReconnect,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelAction {
    /// Open the primary channel now.
    Connect,
    /// Sleep, then open the primary channel.
    Wait(Duration),
    /// Stop retrying the primary channel and start the push fallback.
    StartFallback,
    /// Terminate the scheduler.
    Stop,
    /// Nothing to do.
    Idle,
}

// ── ChannelMachine ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ChannelMachine {
    state: ChannelState,
    attempt: u32,
    config: ReconnectConfig,
    /// Per-channel jitter phase so separate clients spread out.
    phase: f64,
}

impl ChannelMachine {
    pub fn new(config: ReconnectConfig, phase: f64) -> Self {
        Self {
            state: ChannelState::Connecting,
            attempt: 0,
            config,
            phase,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Reconnect attempts since the last successful handshake.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn handle(&mut self, event: ChannelEvent) -> ChannelAction {
        match (self.state, event) {
            (ChannelState::Closed, _) => ChannelAction::Stop,
            (_, ChannelEvent::Shutdown) => {
                self.state = ChannelState::Closed;
                ChannelAction::Stop
            }
            (_, ChannelEvent::ManualReconnect) => {
                self.state = ChannelState::Connecting;
                self.attempt = 0;
                ChannelAction::Connect
            }
            (ChannelState::Degraded, _) => ChannelAction::Idle,
            (_, ChannelEvent::HandshakeSucceeded) => {
                self.state = ChannelState::Open;
                self.attempt = 0;
                ChannelAction::Idle
            }
            (_, ChannelEvent::Closed { code }) if code == Some(CLOSE_POLICY_VIOLATION) => {
                self.degrade()
            }
            (_, ChannelEvent::Closed { .. } | ChannelEvent::ConnectFailed) => {
                if self.attempt >= self.config.max_attempts {
                    return self.degrade();
                }
                let delay = self.backoff(self.attempt);
                self.attempt += 1;
                self.state = ChannelState::Connecting;
                ChannelAction::Wait(delay)
            }
        }
    }

    fn degrade(&mut self) -> ChannelAction {
        self.state = ChannelState::Degraded;
        ChannelAction::StartFallback
    }

    /// `min(base * factor^attempt + jitter, max)` with jitter in `[0, base/2]`.
    ///
    /// Each growth step exceeds the jitter span, so the sequence never
    /// decreases.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_secs_f64();
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = base * self.config.factor.powi(exp);

        // Deterministic jitter in [0, base/2], seeded by attempt and phase.
        let wave = (f64::from(attempt) * 7.3 + self.phase).sin();
        let jitter = base * 0.25 * (1.0 + wave);

        let secs = (raw + jitter).min(self.config.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }
}
