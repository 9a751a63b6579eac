// ── Per-endpoint request metrics ──
//
// Append-only counters keyed by endpoint path. They are only reset by a
// process restart; `snapshot()` / `restore()` let the owner persist them
// across restarts.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Counters for a single endpoint path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointMetrics {
    pub request_count: u64,
    pub failure_count: u64,
    pub retry_count: u64,
    pub last_status: Option<u16>,
    pub last_error: Option<String>,
}

/// Serializable view of every endpoint's counters, ordered by path.
pub type MetricsSnapshot = BTreeMap<String, EndpointMetrics>;

/// Lock-free registry shared by every request.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    endpoints: DashMap<String, EndpointMetrics>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_request(&self, path: &str) {
        self.with(path, |m| m.request_count += 1);
    }

    pub(crate) fn record_retry(&self, path: &str) {
        self.with(path, |m| m.retry_count += 1);
    }

    pub(crate) fn record_status(&self, path: &str, status: u16) {
        self.with(path, |m| m.last_status = Some(status));
    }

    pub(crate) fn record_failure(&self, path: &str, error: &str) {
        self.with(path, |m| {
            m.failure_count += 1;
            m.last_error = Some(error.to_owned());
        });
    }

    /// Counters for one endpoint.
    pub fn get(&self, path: &str) -> Option<EndpointMetrics> {
        self.endpoints.get(path).map(|m| m.value().clone())
    }

    /// Copy of every endpoint's counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.endpoints
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Fold a persisted snapshot into the live counters.
    ///
    /// Counts are added rather than replaced so requests issued before the
    /// restore are not lost; `last_*` fields keep the live value if any.
    pub fn restore(&self, snapshot: MetricsSnapshot) {
        for (path, saved) in snapshot {
            self.with(&path, |m| {
                m.request_count += saved.request_count;
                m.failure_count += saved.failure_count;
                m.retry_count += saved.retry_count;
                if m.last_status.is_none() {
                    m.last_status = saved.last_status;
                }
                if m.last_error.is_none() {
                    m.last_error = saved.last_error;
                }
            });
        }
    }

    fn with(&self, path: &str, f: impl FnOnce(&mut EndpointMetrics)) {
        let mut entry = self.endpoints.entry(path.to_owned()).or_default();
        f(entry.value_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn counters_accumulate_per_path() {
        let reg = MetricsRegistry::new();
        reg.record_request("/auth/sync-device");
        reg.record_retry("/auth/sync-device");
        reg.record_status("/auth/sync-device", 503);
        reg.record_failure("/auth/sync-device", "Server error (HTTP 503)");
        reg.record_request("/auth/detect-client-info");

        let sync = reg.get("/auth/sync-device").unwrap_or_default();
        assert_eq!(
            sync,
            EndpointMetrics {
                request_count: 1,
                failure_count: 1,
                retry_count: 1,
                last_status: Some(503),
                last_error: Some("Server error (HTTP 503)".into()),
            }
        );
        assert_eq!(reg.snapshot().len(), 2);
    }

    #[test]
    fn restore_adds_to_live_counters() {
        let reg = MetricsRegistry::new();
        reg.record_request("/auth/detect-client-info");
        reg.record_status("/auth/detect-client-info", 200);

        let mut saved = MetricsSnapshot::new();
        saved.insert(
            "/auth/detect-client-info".into(),
            EndpointMetrics {
                request_count: 7,
                failure_count: 2,
                retry_count: 3,
                last_status: Some(500),
                last_error: Some("boom".into()),
            },
        );
        reg.restore(saved);

        let m = reg.get("/auth/detect-client-info").unwrap_or_default();
        assert_eq!(m.request_count, 8);
        assert_eq!(m.failure_count, 2);
        assert_eq!(m.last_status, Some(200));
        assert_eq!(m.last_error.as_deref(), Some("boom"));
    }
}
