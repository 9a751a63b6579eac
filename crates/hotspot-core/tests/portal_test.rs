#![allow(clippy::unwrap_used)]
// End-to-end tests for `Portal` against a wiremock backend.

use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hotspot_api::RetryPolicy;
use hotspot_core::{BestEffort, CoreError, Portal, PortalConfig, SyncState};

// ── Helpers ─────────────────────────────────────────────────────────

const DETECT: &str = "/auth/detect-client-info";
const SYNC: &str = "/auth/sync-device";
const CLEAR: &str = "/auth/clear-cache";

fn config(server: &MockServer, data_dir: &Path, landing: Option<&str>) -> PortalConfig {
    let mut config = PortalConfig::new(Url::parse(&server.uri()).unwrap());
    config.local_discovery = false;
    config.ip_providers = Some(Vec::new());
    config.collector.portal_url = landing.map(|l| Url::parse(l).unwrap());
    config.retry = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(10),
    };
    config.data_dir = Some(data_dir.to_path_buf());
    config
}

fn detected(ip: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "data": { "summary": { "detected_ip": ip, "detected_mac": null, "access_mode": "hotspot" } }
    }))
}

fn sync_status(status: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "status": status }))
}

// ── Identity ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_gateway_mac_merges_with_backend_ip() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path(DETECT))
        .respond_with(detected("10.5.50.23"))
        .expect(1)
        .mount(&server)
        .await;

    let portal = Portal::new(config(
        &server,
        dir.path(),
        Some("https://portal.example.net/login?mac=AA-BB-CC-DD-EE-01&dst=x"),
    ))
    .unwrap();

    let first = portal.identify(false).await.unwrap();
    assert_eq!(first.ip, Some(Ipv4Addr::new(10, 5, 50, 23)));
    assert_eq!(first.mac.map(|m| m.to_string()).as_deref(), Some("aa:bb:cc:dd:ee:01"));

    // Served from cache.
    let second = portal.identify(false).await.unwrap();
    assert_eq!(second, first);
    assert!(dir.path().join("client_identity.json").exists());
}

#[tokio::test]
async fn test_restart_serves_stored_identity_without_network() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path(DETECT))
        .respond_with(detected("10.5.50.23"))
        .expect(1)
        .mount(&server)
        .await;

    let first = {
        let portal = Portal::new(config(&server, dir.path(), None)).unwrap();
        let id = portal.identify(false).await.unwrap();
        portal.shutdown().await;
        id
    };

    let portal = Portal::new(config(&server, dir.path(), None)).unwrap();
    assert_eq!(portal.identity(), Some(first.clone()));
    assert_eq!(portal.identify(false).await.unwrap(), first);
    assert_eq!(portal.detection().cycles(), 0);
}

#[tokio::test]
async fn test_detection_rate_limit_blocks_further_requests() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path(DETECT))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "20"))
        .expect(1)
        .mount(&server)
        .await;

    let portal = Portal::new(config(&server, dir.path(), None)).unwrap();

    let err = portal.identify(false).await.unwrap_err();
    assert!(matches!(err, CoreError::NoIdentity));
    let remaining = portal.detection().rate_limited_for().unwrap();
    assert!(remaining > Duration::from_secs(15) && remaining <= Duration::from_secs(20));

    // Even a forced refresh stays quiet during the cooldown.
    assert!(portal.identify(true).await.is_err());
}

#[tokio::test]
async fn test_network_change_resets_sync_and_clears_old_address() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path(DETECT))
        .respond_with(detected("10.5.50.23"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(DETECT))
        .respond_with(detected("10.9.0.7"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SYNC))
        .respond_with(sync_status("DEVICE_VALID"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CLEAR))
        .and(body_json(json!({ "ip": "10.5.50.23", "force_refresh": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let portal = Portal::new(config(&server, dir.path(), None)).unwrap();
    let report = portal.sync(true).await.unwrap();
    assert_eq!(report.state, SyncState::Valid);

    let moved = portal.identify(true).await.unwrap();
    assert_eq!(moved.ip, Some(Ipv4Addr::new(10, 9, 0, 7)));
    assert_eq!(portal.sync_state(), SyncState::Unknown);
}

// ── Device sync ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_unregistered_device_needs_confirmation() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path(DETECT))
        .respond_with(detected("10.5.50.23"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SYNC))
        .and(body_json(json!({ "ip": "10.5.50.23", "mac": null })))
        .respond_with(sync_status("DEVICE_UNREGISTERED"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SYNC))
        .respond_with(sync_status("DEVICE_VALID"))
        .mount(&server)
        .await;

    let portal = Portal::new(config(&server, dir.path(), None)).unwrap();

    let report = portal.sync(true).await.unwrap();
    assert_eq!(report.state, SyncState::Unregistered);
    assert!(report.authorization_required);

    // A valid answer alone does not leave the authorization flow.
    let report = portal.sync(true).await.unwrap();
    assert_eq!(report.state, SyncState::Unregistered);

    portal.confirm_authorization();
    let report = portal.sync(true).await.unwrap();
    assert_eq!(report.state, SyncState::Valid);
    assert!(!report.authorization_required);
}

#[tokio::test]
async fn test_unregistered_ignored_without_authorization_flow() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path(DETECT))
        .respond_with(detected("10.5.50.23"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SYNC))
        .respond_with(sync_status("DEVICE_UNREGISTERED"))
        .mount(&server)
        .await;

    let portal = Portal::new(config(&server, dir.path(), None)).unwrap();
    let report = portal.sync(false).await.unwrap();
    assert_eq!(report.state, SyncState::Unknown);
    assert!(!report.authorization_required);
}

#[tokio::test]
async fn test_throttled_sync_arms_detection_cooldown() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path(DETECT))
        .respond_with(detected("10.5.50.23"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SYNC))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "status": "THROTTLED", "retry_after": 45 })),
        )
        .mount(&server)
        .await;

    let portal = Portal::new(config(&server, dir.path(), None)).unwrap();
    let report = portal.sync(true).await.unwrap();
    assert_eq!(report.state, SyncState::Throttled);

    let remaining = portal.detection().rate_limited_for().unwrap();
    assert!(remaining > Duration::from_secs(40));
    portal.identify(true).await.unwrap();
}

#[tokio::test]
async fn test_sync_error_leaves_state_unchanged() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path(DETECT))
        .respond_with(detected("10.5.50.23"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SYNC))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let portal = Portal::new(config(&server, dir.path(), None)).unwrap();
    let report = portal.sync(true).await.unwrap();
    assert_eq!(report.state, SyncState::Unknown);
}

#[tokio::test]
async fn test_backend_error_answer_recorded_on_first_sync() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path(DETECT))
        .respond_with(detected("10.5.50.23"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SYNC))
        .respond_with(sync_status("ERROR"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SYNC))
        .respond_with(sync_status("DEVICE_VALID"))
        .mount(&server)
        .await;

    let portal = Portal::new(config(&server, dir.path(), None)).unwrap();
    assert_eq!(portal.sync(true).await.unwrap().state, SyncState::Error);
    assert_eq!(portal.sync(true).await.unwrap().state, SyncState::Valid);
}

// ── Cache clear & metrics ───────────────────────────────────────────

#[tokio::test]
async fn test_clear_cache_resets_even_when_backend_fails() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path(DETECT))
        .respond_with(detected("10.5.50.23"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SYNC))
        .respond_with(sync_status("DEVICE_VALID"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CLEAR))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let portal = Portal::new(config(&server, dir.path(), None)).unwrap();
    portal.sync(true).await.unwrap();
    assert_eq!(portal.sync_state(), SyncState::Valid);

    let outcome = portal.clear_cache(true).await;
    assert!(matches!(outcome, BestEffort::Dropped { .. }));
    assert_eq!(portal.sync_state(), SyncState::Unknown);
    assert!(portal.identity().is_none());
    assert!(!dir.path().join("client_identity.json").exists());
}

#[tokio::test]
async fn test_metrics_persist_across_restart() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path(DETECT))
        .respond_with(detected("10.5.50.23"))
        .mount(&server)
        .await;

    {
        let portal = Portal::new(config(&server, dir.path(), None)).unwrap();
        portal.identify(false).await.unwrap();
        portal.shutdown().await;
    }
    assert!(dir.path().join("endpoint_metrics.json").exists());

    let portal = Portal::new(config(&server, dir.path(), None)).unwrap();
    let metrics = portal.api().metrics().get(DETECT).unwrap();
    assert_eq!(metrics.request_count, 1);
    assert_eq!(metrics.last_status, Some(200));
}
