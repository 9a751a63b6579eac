//! Detection cache and throttle.
//!
//! [`DetectionService`] owns the only path that runs a collection cycle.
//! Concurrent callers share one in-flight future; a rolling request
//! window, a success cooldown and an adaptive rate-limit cooldown keep the
//! backend from being hammered while the cached identity keeps serving.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use hotspot_api::AddressHint;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::collector::{BACKEND_CONFIDENCE, IdentityCollector};
use crate::model::{Candidate, CandidateSet, DetectionMethod, ResolvedIdentity};
use crate::resolver::Resolver;
use crate::storage::{IDENTITY_KEY, PersistedIdentity, Storage};

/// Tuning knobs for the detection cache.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// How long a resolved identity is served without re-detecting.
    pub ttl: Duration,
    /// Length of the rolling request window.
    pub window: Duration,
    /// Requests allowed per window before a MAC is known.
    pub ceiling_without_mac: usize,
    /// Requests allowed per window once a MAC is known.
    pub ceiling_with_mac: usize,
    pub cooldown_with_mac: Duration,
    pub cooldown_without_mac: Duration,
    /// First rate-limit cooldown when the backend gave no `Retry-After`.
    pub rate_limit_base: Duration,
    pub rate_limit_cap: Duration,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            window: Duration::from_secs(60),
            ceiling_without_mac: 12,
            ceiling_with_mac: 6,
            cooldown_with_mac: Duration::from_secs(30),
            cooldown_without_mac: Duration::from_secs(15),
            rate_limit_base: Duration::from_secs(30),
            rate_limit_cap: Duration::from_secs(300),
        }
    }
}

type SharedDetection = Shared<BoxFuture<'static, Option<ResolvedIdentity>>>;

#[derive(Debug, Clone)]
struct Cached {
    identity: ResolvedIdentity,
    cached_at: Instant,
}

#[derive(Default)]
struct State {
    cached: Option<Cached>,
    in_flight: Option<SharedDetection>,
    window: VecDeque<Instant>,
    cooldown_until: Option<Instant>,
    rate_limited_until: Option<Instant>,
    strikes: u32,
    cycles: u64,
}

impl State {
    fn cached_identity(&self) -> Option<ResolvedIdentity> {
        self.cached.as_ref().map(|c| c.identity.clone())
    }
}

enum Plan {
    Serve(Option<ResolvedIdentity>),
    Join(SharedDetection),
    Start,
}

struct Inner {
    config: DetectionConfig,
    collector: Arc<dyn IdentityCollector>,
    resolver: Resolver,
    storage: Option<Arc<dyn Storage>>,
    state: Mutex<State>,
    identity_tx: watch::Sender<Option<ResolvedIdentity>>,
    hint_tx: watch::Sender<Option<AddressHint>>,
}

/// Shared detection service. Cloning shares the same cache.
#[derive(Clone)]
pub struct DetectionService {
    inner: Arc<Inner>,
}

impl DetectionService {
    /// `hint_tx` feeds the request layer and the realtime channel with the
    /// identity headers; it is written on every change.
    pub fn new(
        config: DetectionConfig,
        collector: Arc<dyn IdentityCollector>,
        resolver: Resolver,
        storage: Option<Arc<dyn Storage>>,
        hint_tx: watch::Sender<Option<AddressHint>>,
    ) -> Self {
        let (identity_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                config,
                collector,
                resolver,
                storage,
                state: Mutex::new(State::default()),
                identity_tx,
                hint_tx,
            }),
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.inner.config
    }

    pub fn resolver(&self) -> &Resolver {
        &self.inner.resolver
    }

    /// Watch the resolved identity.
    pub fn subscribe(&self) -> watch::Receiver<Option<ResolvedIdentity>> {
        self.inner.identity_tx.subscribe()
    }

    /// The cached identity, fresh or not.
    pub fn cached(&self) -> Option<ResolvedIdentity> {
        self.inner.lock().cached_identity()
    }

    /// Number of completed collection cycles.
    pub fn cycles(&self) -> u64 {
        self.inner.lock().cycles
    }

    /// Remaining rate-limit cooldown, if one is active.
    pub fn rate_limited_for(&self) -> Option<Duration> {
        let until = self.inner.lock().rate_limited_until?;
        let now = Instant::now();
        (until > now).then(|| until - now)
    }

    /// Return the cached identity or run (or join) a detection cycle.
    pub async fn get_or_detect(&self, force_refresh: bool) -> Option<ResolvedIdentity> {
        let detection = {
            let mut state = self.inner.lock();
            match self.inner.plan(&mut state, Instant::now(), force_refresh) {
                Plan::Serve(identity) => return identity,
                Plan::Join(detection) => detection,
                Plan::Start => {
                    let inner = Arc::clone(&self.inner);
                    let detection = async move { inner.run_cycle(force_refresh).await }
                        .boxed()
                        .shared();
                    state.in_flight = Some(detection.clone());
                    detection
                }
            }
        };
        detection.await
    }

    /// Arm the rate-limit cooldown. Without `retry_after` the delay doubles
    /// per consecutive strike.
    pub fn note_rate_limited(&self, retry_after: Option<Duration>) {
        let mut state = self.inner.lock();
        self.inner.arm_rate_limit(&mut state, retry_after);
    }

    /// Fold a pushed observation into the cache. The pushed values go
    /// through the same validation as collected ones.
    pub fn accept_push(&self, ip: Option<&str>, mac: Option<&str>) -> Option<ResolvedIdentity> {
        let mut pushed = Candidate::new(DetectionMethod::BackendApi, BACKEND_CONFIDENCE);
        pushed.ip = ip.map(str::to_owned);
        pushed.mac = mac.map(str::to_owned);

        let mut state = self.inner.lock();
        let mut set = CandidateSet::default();
        if let Some(ref cached) = state.cached {
            set.push(cached.identity.to_candidate());
        }
        set.push(pushed);

        let Some(identity) = self.inner.resolver.resolve(&set) else {
            tracing::debug!(?ip, ?mac, "ignoring unusable pushed identity");
            return None;
        };
        if state.cached_identity().as_ref() == Some(&identity) {
            return Some(identity);
        }

        tracing::info!(source = %identity.source, "identity updated from push");
        state.cached = Some(Cached {
            identity: identity.clone(),
            cached_at: Instant::now(),
        });
        drop(state);
        self.inner.publish(Some(&identity));
        self.inner.persist(&identity);
        Some(identity)
    }

    /// Drop the cached identity from memory and storage.
    pub fn clear(&self, reason: &str) {
        {
            let mut state = self.inner.lock();
            state.cached = None;
            state.cooldown_until = None;
        }
        tracing::info!(reason, "detection cache cleared");
        self.inner.publish(None);
        if let Some(ref storage) = self.inner.storage {
            if let Err(e) = storage.remove(IDENTITY_KEY) {
                tracing::warn!(error = %e, "failed to remove stored identity");
            }
        }
    }

    /// Load the persisted identity. Expired entries are ignored.
    pub fn restore(&self) -> Option<ResolvedIdentity> {
        let storage = self.inner.storage.as_ref()?;
        let doc = match storage.get::<PersistedIdentity>(IDENTITY_KEY) {
            Ok(doc) => doc?,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load stored identity");
                return None;
            }
        };

        let saved_at = doc.cached_at()?;
        let age = (Utc::now() - saved_at).to_std().unwrap_or_default();
        if age >= self.inner.config.ttl {
            tracing::debug!(age_secs = age.as_secs(), "stored identity expired");
            return None;
        }
        let cached_at = Instant::now().checked_sub(age)?;
        let identity = doc.into_identity()?;

        tracing::debug!(age_secs = age.as_secs(), "restored identity from storage");
        self.inner.lock().cached = Some(Cached {
            identity: identity.clone(),
            cached_at,
        });
        self.inner.publish(Some(&identity));
        Some(identity)
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn plan(&self, state: &mut State, now: Instant, force_refresh: bool) -> Plan {
        // An identity without an address (a pushed MAC alone) never counts
        // as fresh: nothing can sync on it.
        let fresh = state.cached.as_ref().is_some_and(|c| {
            c.identity.has_ip() && now.duration_since(c.cached_at) < self.config.ttl
        });
        if fresh && !force_refresh {
            return Plan::Serve(state.cached_identity());
        }

        if let Some(ref detection) = state.in_flight {
            return Plan::Join(detection.clone());
        }

        if state.rate_limited_until.is_some_and(|until| now < until) {
            tracing::debug!(force_refresh, "detection suppressed by rate-limit cooldown");
            return Plan::Serve(state.cached_identity());
        }

        if !force_refresh && state.cooldown_until.is_some_and(|until| now < until) {
            tracing::trace!("detection deferred by success cooldown");
            return Plan::Serve(state.cached_identity());
        }

        while state
            .window
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.config.window)
        {
            state.window.pop_front();
        }
        state.window.push_back(now);

        let has_mac = state.cached.as_ref().is_some_and(|c| c.identity.has_mac());
        let ceiling = if has_mac {
            self.config.ceiling_with_mac
        } else {
            self.config.ceiling_without_mac
        };
        if !force_refresh && state.window.len() > ceiling {
            tracing::debug!(
                requests = state.window.len(),
                ceiling,
                "detection ceiling reached, serving cached identity"
            );
            return Plan::Serve(state.cached_identity());
        }

        Plan::Start
    }

    async fn run_cycle(&self, force_refresh: bool) -> Option<ResolvedIdentity> {
        tracing::debug!(force_refresh, "starting detection cycle");
        let mut set = self.collector.collect(force_refresh).await;

        let mut state = self.lock();
        // Keep a pushed MAC that is still waiting for its address.
        if let Some(pending) = state.cached.as_ref().filter(|c| !c.identity.has_ip()) {
            set.push(pending.identity.to_candidate());
        }
        let resolved = self.resolver.resolve(&set);
        state.in_flight = None;
        state.cycles += 1;

        if let Some(hint) = set.rate_limit {
            self.arm_rate_limit(&mut state, hint.retry_after);
        }

        let Some(identity) = resolved else {
            tracing::warn!("no usable identity candidate");
            return state.cached_identity();
        };

        let now = Instant::now();
        let cooldown = if identity.has_mac() {
            self.config.cooldown_with_mac
        } else {
            self.config.cooldown_without_mac
        };
        state.cooldown_until = Some(now + cooldown);
        if set.rate_limit.is_none() {
            state.strikes = 0;
        }
        state.cached = Some(Cached {
            identity: identity.clone(),
            cached_at: now,
        });
        drop(state);

        tracing::info!(
            ip = ?identity.ip,
            mac = ?identity.mac.map(|m| m.to_string()),
            method = %identity.method,
            confidence = identity.confidence,
            "identity resolved"
        );
        self.publish(Some(&identity));
        self.persist(&identity);
        Some(identity)
    }

    fn arm_rate_limit(&self, state: &mut State, retry_after: Option<Duration>) {
        state.strikes = state.strikes.saturating_add(1);
        let delay = retry_after
            .unwrap_or_else(|| {
                let exp = state.strikes.saturating_sub(1).min(16);
                self.config.rate_limit_base.saturating_mul(1 << exp)
            })
            .min(self.config.rate_limit_cap);

        let until = Instant::now() + delay;
        if state.rate_limited_until.is_none_or(|current| current < until) {
            state.rate_limited_until = Some(until);
        }
        tracing::info!(
            delay_secs = delay.as_secs(),
            strikes = state.strikes,
            "detection rate limited"
        );
    }

    fn publish(&self, identity: Option<&ResolvedIdentity>) {
        let hint = identity.map(ResolvedIdentity::to_hint);
        self.identity_tx.send_replace(identity.cloned());
        self.hint_tx.send_if_modified(|current| {
            if *current == hint {
                false
            } else {
                current.clone_from(&hint);
                true
            }
        });
    }

    fn persist(&self, identity: &ResolvedIdentity) {
        let Some(ref storage) = self.storage else {
            return;
        };
        let doc = PersistedIdentity::new(identity, Utc::now());
        if let Err(e) = storage.put(IDENTITY_KEY, &doc) {
            tracing::warn!(error = %e, "failed to persist identity");
        }
    }
}
