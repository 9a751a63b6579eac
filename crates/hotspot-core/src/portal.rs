// ── Portal facade ──
//
// Wires the request layer, collector, detection cache, device sync and
// realtime channel together. Every service is constructed once here and
// shared behind `Arc`; consumers (the CLI) only talk to `Portal`.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hotspot_api::{
    ApiClient, BestEffort, ChannelState, ClientConfig, PublicIpLookup, PushMessage,
    RealtimeConfig, RealtimeHandle, SessionEvent,
};
use secrecy::SecretString;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collector::{Collector, IdentityCollector, LocalProbe, UdpRouteProbe};
use crate::config::PortalConfig;
use crate::detection::DetectionService;
use crate::error::CoreError;
use crate::model::{ResolvedIdentity, SyncReport, SyncState};
use crate::resolver::Resolver;
use crate::storage::{FileStorage, METRICS_KEY, Storage};
use crate::sync::DeviceSync;

/// Entry point for consumers. Cheaply cloneable.
#[derive(Clone)]
pub struct Portal {
    inner: Arc<PortalInner>,
}

struct PortalInner {
    config: PortalConfig,
    api: Arc<ApiClient>,
    detection: DetectionService,
    sync: Arc<DeviceSync>,
    storage: Option<Arc<dyn Storage>>,
    cancel: CancellationToken,
    realtime: Mutex<Option<RealtimeHandle>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    network: Arc<NetworkWatch>,
}

/// Remembers the last resolved IP. A different one means the device moved
/// networks: the sync state resets and the backend's cached view of the
/// old address is cleared (best effort).
struct NetworkWatch {
    last_ip: Mutex<Option<Ipv4Addr>>,
    api: Arc<ApiClient>,
    sync: Arc<DeviceSync>,
}

impl NetworkWatch {
    async fn observe(&self, ip: Option<Ipv4Addr>) {
        let Some(new) = ip else { return };
        let previous = lock(&self.last_ip).replace(new);
        let Some(old) = previous.filter(|old| *old != new) else {
            return;
        };

        tracing::info!(%old, %new, "network change detected");
        self.sync.reset();
        match self.api.clear_cache(Some(&old.to_string()), true).await {
            BestEffort::Delivered => tracing::debug!(%old, "backend forgot the previous address"),
            BestEffort::Dropped { kind, reason } => {
                tracing::info!(%old, ?kind, %reason, "clearing the previous address was not delivered");
            }
        }
    }
}

impl Portal {
    /// Build every service from `config`, restoring the persisted identity
    /// and metrics. Must be called inside a Tokio runtime.
    pub fn new(config: PortalConfig) -> Result<Self, CoreError> {
        let storage = config
            .data_dir
            .clone()
            .map(|dir| Arc::new(FileStorage::new(dir)) as Arc<dyn Storage>);
        Self::build(config, None, storage)
    }

    /// Like [`new`](Self::new) with a caller-supplied collector and storage.
    pub fn with_collector(
        config: PortalConfig,
        collector: Arc<dyn IdentityCollector>,
        storage: Option<Arc<dyn Storage>>,
    ) -> Result<Self, CoreError> {
        Self::build(config, Some(collector), storage)
    }

    fn build(
        config: PortalConfig,
        collector: Option<Arc<dyn IdentityCollector>>,
        storage: Option<Arc<dyn Storage>>,
    ) -> Result<Self, CoreError> {
        let transport = config.transport();
        let (hint_tx, hint_rx) = watch::channel(None);

        let client_config = ClientConfig {
            retry: config.retry.clone(),
            circuit: config.circuit.clone(),
            ..ClientConfig::default()
        };
        let api = Arc::new(ApiClient::new(
            config.backend_url.clone(),
            client_config,
            &transport,
            hint_rx,
        )?);
        if let Some(ref token) = config.token {
            api.session().set_token(token.clone());
        }

        let collector = match collector {
            Some(c) => c,
            None => {
                let probe = config
                    .local_discovery
                    .then(|| Arc::new(UdpRouteProbe::default()) as Arc<dyn LocalProbe>);
                let lookup = match config.ip_providers {
                    Some(ref providers) if providers.is_empty() => None,
                    Some(ref providers) => {
                        Some(PublicIpLookup::new(api.http().clone(), providers.clone()))
                    }
                    None => Some(PublicIpLookup::with_defaults(api.http().clone())),
                };
                Arc::new(Collector::new(
                    config.collector.clone(),
                    Arc::clone(&api),
                    probe,
                    lookup,
                )) as Arc<dyn IdentityCollector>
            }
        };

        let detection = DetectionService::new(
            config.detection.clone(),
            collector,
            Resolver::new(config.denylist.iter().copied()),
            storage.clone(),
            hint_tx,
        );
        let sync = Arc::new(DeviceSync::new(Arc::clone(&api), detection.clone()));

        let restored_ip = detection.restore().and_then(|id| id.ip);
        if let Some(ref storage) = storage {
            match storage.get(METRICS_KEY) {
                Ok(Some(snapshot)) => api.restore_metrics(snapshot),
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "failed to load endpoint metrics"),
            }
        }

        Ok(Self {
            inner: Arc::new(PortalInner {
                config,
                api: Arc::clone(&api),
                detection,
                sync: Arc::clone(&sync),
                storage,
                cancel: CancellationToken::new(),
                realtime: Mutex::new(None),
                task_handles: Mutex::new(Vec::new()),
                network: Arc::new(NetworkWatch {
                    last_ip: Mutex::new(restored_ip),
                    api: Arc::clone(&api),
                    sync: Arc::clone(&sync),
                }),
            }),
        })
    }

    pub fn config(&self) -> &PortalConfig {
        &self.inner.config
    }

    pub fn api(&self) -> &Arc<ApiClient> {
        &self.inner.api
    }

    pub fn detection(&self) -> &DetectionService {
        &self.inner.detection
    }

    // ── Identity ─────────────────────────────────────────────────────

    /// Resolve this client's identity, from cache when possible.
    ///
    /// A resolved IP that differs from the previous one is handled as a
    /// network change.
    pub async fn identify(&self, force_refresh: bool) -> Result<ResolvedIdentity, CoreError> {
        let identity = self
            .inner
            .detection
            .get_or_detect(force_refresh)
            .await
            .ok_or(CoreError::NoIdentity)?;

        self.inner.network.observe(identity.ip).await;
        Ok(identity)
    }

    /// The cached identity without triggering detection.
    pub fn identity(&self) -> Option<ResolvedIdentity> {
        self.inner.detection.cached()
    }

    pub fn watch_identity(&self) -> watch::Receiver<Option<ResolvedIdentity>> {
        self.inner.detection.subscribe()
    }

    // ── Device sync ──────────────────────────────────────────────────

    pub async fn sync(&self, allow_authorization_flow: bool) -> Result<SyncReport, CoreError> {
        let identity = self.identify(false).await?;
        Ok(self.inner.sync.sync(&identity, allow_authorization_flow).await)
    }

    pub fn confirm_authorization(&self) {
        self.inner.sync.confirm_authorization();
    }

    pub fn sync_state(&self) -> SyncState {
        self.inner.sync.state()
    }

    pub fn watch_sync_state(&self) -> watch::Receiver<SyncState> {
        self.inner.sync.watch_state()
    }

    /// Clear the backend's cached view of the current address, then drop
    /// local state.
    pub async fn clear_cache(&self, force_refresh: bool) -> BestEffort {
        let ip = self
            .inner
            .detection
            .cached()
            .and_then(|id| id.ip)
            .map(|ip| ip.to_string());
        self.inner.sync.clear_cache(ip.as_deref(), force_refresh).await
    }

    // ── Session ──────────────────────────────────────────────────────

    pub fn set_token(&self, token: SecretString) {
        self.inner.api.session().set_token(token);
    }

    pub fn logout(&self) {
        self.inner.api.session().logout();
    }

    pub fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.api.session().subscribe()
    }

    // ── Realtime ─────────────────────────────────────────────────────

    /// Start the realtime channel and fold its messages into the
    /// detection cache. Calling it again is a no-op.
    pub fn start_realtime(&self) -> Result<watch::Receiver<ChannelState>, CoreError> {
        let mut slot = lock(&self.inner.realtime);
        if let Some(ref handle) = *slot {
            return Ok(handle.watch_state());
        }

        let base = self
            .inner
            .config
            .realtime_url
            .clone()
            .unwrap_or_else(|| self.inner.config.backend_url.clone());
        let mut config = RealtimeConfig::new(base);
        config.push_base_url.clone_from(&self.inner.config.push_url);

        let http = self.inner.config.transport().build_streaming_client()?;
        let handle = RealtimeHandle::spawn(
            config,
            self.inner.api.identity_watch(),
            http,
            self.inner.cancel.child_token(),
        );

        let forwarder = tokio::spawn(forward_messages(
            handle.subscribe(),
            self.inner.detection.clone(),
            Arc::clone(&self.inner.sync),
            Arc::clone(&self.inner.network),
            self.inner.cancel.clone(),
        ));
        lock(&self.inner.task_handles).push(forwarder);

        let state = handle.watch_state();
        *slot = Some(handle);
        tracing::debug!("realtime channel started");
        Ok(state)
    }

    /// Current realtime channel state; `None` when it was never started.
    pub fn realtime_state(&self) -> Option<ChannelState> {
        lock(&self.inner.realtime).as_ref().map(RealtimeHandle::state)
    }

    /// Reconnect the primary realtime channel (leaves `Degraded`).
    pub fn reconnect_realtime(&self) {
        if let Some(ref handle) = *lock(&self.inner.realtime) {
            handle.reconnect();
        }
    }

    pub fn realtime_messages(&self) -> Option<broadcast::Receiver<Arc<PushMessage>>> {
        lock(&self.inner.realtime).as_ref().map(RealtimeHandle::subscribe)
    }

    // ── Metrics ──────────────────────────────────────────────────────

    /// Write the endpoint metrics snapshot to storage.
    pub fn persist_metrics(&self) -> Result<(), CoreError> {
        let Some(ref storage) = self.inner.storage else {
            return Ok(());
        };
        storage.put(METRICS_KEY, &self.inner.api.metrics_snapshot())
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Stop background tasks and persist metrics.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        if let Some(handle) = lock(&self.inner.realtime).take() {
            handle.shutdown();
        }

        let handles: Vec<_> = lock(&self.inner.task_handles).drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        if let Err(e) = self.persist_metrics() {
            tracing::warn!(error = %e, "failed to persist endpoint metrics");
        }
        tracing::debug!("portal shut down");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn forward_messages(
    mut rx: broadcast::Receiver<Arc<PushMessage>>,
    detection: DetectionService,
    sync: Arc<DeviceSync>,
    network: Arc<NetworkWatch>,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            msg = rx.recv() => msg,
        };

        match msg {
            Ok(msg) => match msg.as_ref() {
                PushMessage::MacDetected { ip, mac } => {
                    if let Some(identity) = detection.accept_push(ip.as_deref(), mac.as_deref()) {
                        network.observe(identity.ip).await;
                    }
                }
                PushMessage::CacheCleared { ip } => {
                    let current = detection.cached().and_then(|id| id.ip);
                    let ours = match (ip.as_deref(), current) {
                        (None, _) => true,
                        (Some(pushed), Some(current)) => pushed == current.to_string(),
                        (Some(_), None) => false,
                    };
                    if ours {
                        sync.reset();
                        detection.clear("backend cleared its cache");
                    }
                }
                PushMessage::Ping { .. } | PushMessage::Welcome { .. } => {}
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "realtime forwarder lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn portal(server: &MockServer) -> Portal {
        let mut config = PortalConfig::new(Url::parse(&server.uri()).unwrap());
        config.local_discovery = false;
        config.ip_providers = Some(Vec::new());
        Portal::new(config).unwrap()
    }

    #[tokio::test]
    async fn pushed_address_change_is_a_network_change() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/detect-client-info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": { "summary": { "detected_ip": "10.5.50.23" } }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/sync-device"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "DEVICE_VALID" })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/clear-cache"))
            .and(body_json(json!({ "ip": "10.5.50.23", "force_refresh": true })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .expect(1)
            .mount(&server)
            .await;

        let portal = portal(&server);
        assert_eq!(portal.sync(true).await.unwrap().state, SyncState::Valid);

        let (tx, rx) = broadcast::channel(8);
        let mut sync_rx = portal.watch_sync_state();
        let forwarder = tokio::spawn(forward_messages(
            rx,
            portal.inner.detection.clone(),
            Arc::clone(&portal.inner.sync),
            Arc::clone(&portal.inner.network),
            portal.inner.cancel.clone(),
        ));

        tx.send(Arc::new(PushMessage::MacDetected {
            ip: Some("10.9.0.7".into()),
            mac: None,
        }))
        .unwrap();
        sync_rx.changed().await.unwrap();

        assert_eq!(*sync_rx.borrow(), SyncState::Unknown);
        assert_eq!(portal.identity().and_then(|id| id.ip), Some(Ipv4Addr::new(10, 9, 0, 7)));

        // Closing the channel ends the forwarder after the clear went out.
        drop(tx);
        forwarder.await.unwrap();
    }

    #[tokio::test]
    async fn same_address_is_not_a_network_change() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/clear-cache"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let portal = portal(&server);
        let ip = Some(Ipv4Addr::new(10, 5, 50, 23));
        portal.inner.network.observe(ip).await;
        portal.inner.network.observe(ip).await;
        portal.inner.network.observe(None).await;
        assert_eq!(*lock(&portal.inner.network.last_ip), ip);
    }
}
