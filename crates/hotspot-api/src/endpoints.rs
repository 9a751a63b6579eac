// Typed wrappers for the portal backend endpoints used by the client.

use reqwest::Method;
use serde_json::json;
use tracing::debug;

use crate::client::{ApiClient, BestEffort, RequestOptions};
use crate::error::Error;
use crate::models::{DetectResponse, DetectSummary, SyncDeviceResponse, SyncOutcome};

pub const DETECT_PATH: &str = "/auth/detect-client-info";
pub const SYNC_DEVICE_PATH: &str = "/auth/sync-device";
pub const CLEAR_CACHE_PATH: &str = "/auth/clear-cache";

impl ApiClient {
    /// `GET /auth/detect-client-info`: what the backend saw of this client.
    pub async fn detect_client_info(&self, force_refresh: bool) -> Result<DetectSummary, Error> {
        let mut opts = RequestOptions::new();
        if force_refresh {
            opts = opts.header("force-refresh", "true");
        }
        let resp: DetectResponse = self.request(Method::GET, DETECT_PATH, opts).await?;
        debug!(
            ip = ?resp.summary.detected_ip,
            mac = ?resp.summary.detected_mac,
            "backend detection answered"
        );
        Ok(resp.summary)
    }

    /// `POST /auth/sync-device`: ask the backend whether this device is
    /// already authorized.
    pub async fn sync_device(&self, ip: &str, mac: Option<&str>) -> Result<SyncOutcome, Error> {
        let body = json!({ "ip": ip, "mac": mac });
        let resp: SyncDeviceResponse = self
            .request(Method::POST, SYNC_DEVICE_PATH, RequestOptions::new().json(body))
            .await?;
        Ok(resp.into())
    }

    /// `POST /auth/clear-cache`: drop the backend's cached view of an
    /// address. Failures are ignored.
    pub async fn clear_cache(&self, ip: Option<&str>, force_refresh: bool) -> BestEffort {
        let body = json!({ "ip": ip, "force_refresh": force_refresh });
        self.best_effort(Method::POST, CLEAR_CACHE_PATH, RequestOptions::new().json(body))
            .await
    }
}
