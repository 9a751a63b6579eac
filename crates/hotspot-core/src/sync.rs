// ── Device synchronization ──
//
// Asks the backend whether the resolved device is authorized and keeps the
// per-session `SyncState`. Throttling answers arm the detection cooldown
// instead of counting as failures.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hotspot_api::{ApiClient, BestEffort, Error as ApiError, SyncOutcome};
use tokio::sync::watch;

use crate::detection::DetectionService;
use crate::model::{ResolvedIdentity, SyncReport, SyncState, sync};

#[derive(Debug, Default)]
struct Progress {
    state: SyncState,
    authorization_confirmed: bool,
}

pub struct DeviceSync {
    api: Arc<ApiClient>,
    detection: DetectionService,
    progress: Mutex<Progress>,
    state_tx: watch::Sender<SyncState>,
}

impl DeviceSync {
    pub fn new(api: Arc<ApiClient>, detection: DetectionService) -> Self {
        let (state_tx, _) = watch::channel(SyncState::Unknown);
        Self {
            api,
            detection,
            progress: Mutex::new(Progress::default()),
            state_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SyncState {
        self.lock().state
    }

    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.state_tx.subscribe()
    }

    /// Record that the user finished the authorization flow. The next
    /// successful sync may then leave `Unregistered`.
    pub fn confirm_authorization(&self) {
        self.lock().authorization_confirmed = true;
        tracing::info!("authorization confirmed");
    }

    /// Back to `Unknown`, forgetting any confirmation.
    pub fn reset(&self) {
        {
            let mut progress = self.lock();
            *progress = Progress::default();
        }
        self.state_tx.send_replace(SyncState::Unknown);
    }

    pub async fn sync(
        &self,
        identity: &ResolvedIdentity,
        allow_authorization_flow: bool,
    ) -> SyncReport {
        let Some(ip) = identity.ip else {
            tracing::warn!("cannot sync a device without an IP address");
            return self.report_unchanged();
        };
        let mac = identity.mac.map(|m| m.to_string());

        let outcome = match self.api.sync_device(&ip.to_string(), mac.as_deref()).await {
            Ok(outcome) => outcome,
            Err(ApiError::RateLimited { retry_after_secs }) => {
                SyncOutcome::RateLimited { retry_after_secs }
            }
            Err(e) => {
                // No answer from the backend says nothing about the device.
                tracing::warn!(error = %e, %ip, "device sync failed");
                return self.report_unchanged();
            }
        };

        match outcome {
            SyncOutcome::Throttled { retry_after_secs }
            | SyncOutcome::RateLimited { retry_after_secs } => {
                self.detection
                    .note_rate_limited(retry_after_secs.map(Duration::from_secs));
            }
            SyncOutcome::Error(ref message) => {
                tracing::warn!(%message, "backend reported a sync error");
            }
            SyncOutcome::Valid | SyncOutcome::Unregistered => {}
        }

        let report = {
            let mut progress = self.lock();
            let report = sync::transition(
                progress.state,
                &outcome,
                allow_authorization_flow,
                progress.authorization_confirmed,
            );
            if report.state == SyncState::Valid {
                progress.authorization_confirmed = false;
            }
            if report.state != progress.state {
                tracing::info!(from = %progress.state, to = %report.state, "sync state changed");
            }
            progress.state = report.state;
            report
        };
        self.state_tx.send_if_modified(|current| {
            let changed = *current != report.state;
            *current = report.state;
            changed
        });
        report
    }

    /// Best-effort backend cache clear. The sync state and the detection
    /// cache reset whatever the backend answers.
    pub async fn clear_cache(&self, ip: Option<&str>, force_refresh: bool) -> BestEffort {
        let result = self.api.clear_cache(ip, force_refresh).await;
        self.reset();
        self.detection.clear("cache clear requested");
        result
    }

    fn report_unchanged(&self) -> SyncReport {
        let state = self.state();
        SyncReport {
            state,
            authorization_required: state == SyncState::Unregistered,
        }
    }
}
