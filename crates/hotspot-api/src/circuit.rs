// ── Circuit breaker ──
//
// One breaker per logical backend. Consecutive request failures open
// the circuit; while open every request fails fast. After the cool-down
// a single trial request is let through (half-open) and its outcome
// decides whether the circuit closes or re-opens.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Error;

/// Default number of consecutive failures that opens the circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
/// Default fail-fast window before a half-open trial.
pub const DEFAULT_COOL_DOWN: Duration = Duration::from_secs(30);

/// Externally observable phase of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

/// Raw breaker state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircuitState {
    pub open: bool,
    pub opened_at: Option<Instant>,
    pub consecutive_failures: u32,
    /// Id of the outstanding half-open trial, if any.
    trial: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub cool_down: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cool_down: DEFAULT_COOL_DOWN,
        }
    }
}

/// Circuit breaker guarding a single backend.
///
/// All mutations happen under a short synchronous lock that is never
/// held across an await point.
#[derive(Debug)]
pub struct CircuitBreaker {
    backend: String,
    config: CircuitConfig,
    state: Mutex<CircuitState>,
    trial_seq: AtomicU64,
}

/// Permission to send one request, returned by
/// [`CircuitBreaker::try_acquire`].
///
/// Hold it until the outcome has been recorded. Dropping a half-open
/// trial permit without recording an outcome (a caller timed out and
/// abandoned the request) frees the trial slot for the next caller.
#[derive(Debug)]
#[must_use = "dropping the permit immediately abandons a half-open trial"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: Option<u64>,
}

impl CircuitPermit<'_> {
    /// Whether this permit is the half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        let Some(id) = self.trial else { return };
        let mut state = self.breaker.lock();
        if state.trial == Some(id) {
            state.trial = None;
            debug!(backend = %self.breaker.backend, "half-open trial abandoned");
        }
    }
}

impl CircuitBreaker {
    pub fn new(backend: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            backend: backend.into(),
            config,
            state: Mutex::new(CircuitState::default()),
            trial_seq: AtomicU64::new(0),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Snapshot of the raw state.
    pub fn state(&self) -> CircuitState {
        self.lock().clone()
    }

    /// Current phase, evaluated against the clock.
    pub fn phase(&self) -> CircuitPhase {
        let state = self.lock();
        self.phase_of(&state, Instant::now())
    }

    fn phase_of(&self, state: &CircuitState, now: Instant) -> CircuitPhase {
        if !state.open {
            return CircuitPhase::Closed;
        }
        match state.opened_at {
            Some(at) if now.duration_since(at) < self.config.cool_down => CircuitPhase::Open,
            _ => CircuitPhase::HalfOpen,
        }
    }

    /// Ask permission to send a request.
    ///
    /// Returns [`Error::CircuitOpen`] while the cool-down is running, or
    /// while another half-open trial is outstanding.
    pub fn try_acquire(&self) -> Result<CircuitPermit<'_>, Error> {
        let now = Instant::now();
        let mut state = self.lock();
        match self.phase_of(&state, now) {
            CircuitPhase::Closed => Ok(CircuitPermit {
                breaker: self,
                trial: None,
            }),
            CircuitPhase::Open => Err(self.open_error(&state, now)),
            CircuitPhase::HalfOpen if state.trial.is_some() => Err(self.open_error(&state, now)),
            CircuitPhase::HalfOpen => {
                info!(backend = %self.backend, "circuit half-open, allowing trial request");
                let id = self.trial_seq.fetch_add(1, Ordering::Relaxed);
                state.trial = Some(id);
                Ok(CircuitPermit {
                    breaker: self,
                    trial: Some(id),
                })
            }
        }
    }

    /// A request reached the backend and got a usable answer.
    pub fn record_success(&self) {
        let mut state = self.lock();
        if state.open {
            info!(backend = %self.backend, "circuit closed after successful trial");
        }
        *state = CircuitState::default();
    }

    /// A request failed after exhausting its retry budget.
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut state = self.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.trial = None;

        if state.open {
            // Failed trial: restart the cool-down.
            state.opened_at = Some(now);
            warn!(backend = %self.backend, "half-open trial failed, circuit re-opened");
        } else if state.consecutive_failures >= self.config.failure_threshold {
            state.open = true;
            state.opened_at = Some(now);
            warn!(
                backend = %self.backend,
                failures = state.consecutive_failures,
                cool_down_secs = self.config.cool_down.as_secs(),
                "circuit opened"
            );
        }
    }

    /// A request ended without telling us anything about backend health
    /// (e.g. 429). Releases a pending trial without changing counters.
    pub fn record_neutral(&self) {
        self.lock().trial = None;
    }

    fn open_error(&self, state: &CircuitState, now: Instant) -> Error {
        let elapsed = state
            .opened_at
            .map_or(Duration::ZERO, |at| now.duration_since(at));
        let remaining = self.config.cool_down.saturating_sub(elapsed);
        Error::CircuitOpen {
            backend: self.backend.clone(),
            retry_in_ms: u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("portal", CircuitConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_fails_fast() {
        let cb = breaker();
        for _ in 0..4 {
            let _permit = cb.try_acquire().unwrap();
            cb.record_failure();
        }
        assert_eq!(cb.phase(), CircuitPhase::Closed);

        let _permit = cb.try_acquire().unwrap();
        cb.record_failure();
        assert_eq!(cb.phase(), CircuitPhase::Open);

        tokio::time::advance(Duration::from_millis(1)).await;
        let err = cb.try_acquire().unwrap_err();
        assert!(matches!(err, Error::CircuitOpen { retry_in_ms, .. } if retry_in_ms <= 30_000));
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_allows_single_trial() {
        let cb = breaker();
        for _ in 0..5 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cb.phase(), CircuitPhase::HalfOpen);

        let trial = cb.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert!(cb.try_acquire().is_err(), "second concurrent trial must be refused");

        cb.record_success();
        drop(trial);
        assert_eq!(cb.phase(), CircuitPhase::Closed);
        assert_eq!(cb.state().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_restarts_cool_down() {
        let cb = breaker();
        for _ in 0..5 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        let trial = cb.try_acquire().unwrap();
        cb.record_failure();
        drop(trial);

        assert_eq!(cb.phase(), CircuitPhase::Open);
        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cb.try_acquire().is_err());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_trial_frees_the_slot() {
        let cb = breaker();
        for _ in 0..5 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(30)).await;

        let trial = cb.try_acquire().unwrap();
        assert!(cb.try_acquire().is_err());
        drop(trial);

        assert_eq!(cb.phase(), CircuitPhase::HalfOpen);
        let next = cb.try_acquire().unwrap();
        assert!(next.is_trial());
        cb.record_success();
        drop(next);
        assert_eq!(cb.phase(), CircuitPhase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_permit_does_not_release_a_newer_trial() {
        let cb = breaker();
        for _ in 0..5 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(30)).await;

        let first = cb.try_acquire().unwrap();
        cb.record_neutral();
        let second = cb.try_acquire().unwrap();
        drop(first);

        assert!(cb.try_acquire().is_err(), "the second trial is still outstanding");
        drop(second);
    }

    #[test]
    fn neutral_outcome_keeps_counters() {
        let cb = breaker();
        cb.record_failure();
        cb.record_failure();
        cb.record_neutral();
        assert_eq!(cb.state().consecutive_failures, 2);
    }

    #[test]
    fn success_resets_failures() {
        let cb = breaker();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::default());
    }
}
