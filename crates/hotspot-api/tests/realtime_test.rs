#![allow(clippy::unwrap_used)]
// Integration tests for the realtime channel against an in-process
// websocket server and a wiremock push endpoint.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Message, http};
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hotspot_api::{AddressHint, ChannelState, PushMessage, RealtimeConfig, RealtimeHandle};

const WAIT: Duration = Duration::from_secs(5);

fn hint(ip: &str) -> Option<AddressHint> {
    Some(AddressHint {
        ip: Some(ip.into()),
        mac: None,
    })
}

async fn next_message(rx: &mut broadcast::Receiver<Arc<PushMessage>>) -> PushMessage {
    let msg = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    (*msg).clone()
}

async fn wait_state(handle: &RealtimeHandle, want: ChannelState) {
    let mut rx = handle.watch_state();
    timeout(WAIT, rx.wait_for(|s| *s == want)).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_registers_receives_and_degrades_on_policy_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let push = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sse/client-info"))
        .and(query_param("ip", "10.5.50.23"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string("data: {\"type\":\"cache_cleared\",\"ip\":\"10.5.50.23\"}\n\n"),
        )
        .mount(&push)
        .await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let first = ws.next().await.unwrap().unwrap();
        let register: serde_json::Value = serde_json::from_str(first.to_text().unwrap()).unwrap();

        ws.send(Message::text(
            r#"{"type":"mac_detected","ip":"10.5.50.23","mac":"aa:bb:cc:dd:ee:01"}"#,
        ))
        .await
        .unwrap();
        ws.close(Some(CloseFrame {
            code: CloseCode::Policy,
            reason: "blocked".into(),
        }))
        .await
        .unwrap();
        register
    });

    let mut config = RealtimeConfig::new(Url::parse(&format!("http://{addr}")).unwrap());
    config.push_base_url = Some(Url::parse(&push.uri()).unwrap());
    let (_tx, identity) = watch::channel(hint("10.5.50.23"));
    let handle = RealtimeHandle::spawn(
        config,
        identity,
        reqwest::Client::new(),
        CancellationToken::new(),
    );
    let mut rx = handle.subscribe();

    assert_eq!(
        next_message(&mut rx).await,
        PushMessage::MacDetected {
            ip: Some("10.5.50.23".into()),
            mac: Some("aa:bb:cc:dd:ee:01".into()),
        }
    );

    let register = server.await.unwrap();
    assert_eq!(register["type"], "register");
    assert_eq!(register["ip"], "10.5.50.23");

    wait_state(&handle, ChannelState::Degraded).await;
    assert_eq!(
        next_message(&mut rx).await,
        PushMessage::CacheCleared {
            ip: Some("10.5.50.23".into()),
        }
    );

    handle.shutdown();
    assert_eq!(handle.state(), ChannelState::Closed);
}

#[tokio::test]
async fn test_legacy_path_used_when_canonical_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        // Canonical path: refuse the upgrade.
        let (stream, _) = listener.accept().await.unwrap();
        let rejected = tokio_tungstenite::accept_hdr_async(
            stream,
            |_req: &Request, _resp: Response| -> Result<Response, ErrorResponse> {
                Err(http::Response::builder().status(404).body(None).unwrap())
            },
        )
        .await;
        assert!(rejected.is_err());

        // Legacy path: accept and record the requested path.
        let (stream, _) = listener.accept().await.unwrap();
        let (path_tx, path_rx) = std::sync::mpsc::channel();
        let mut ws = tokio_tungstenite::accept_hdr_async(
            stream,
            move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                path_tx.send(req.uri().to_string()).unwrap();
                Ok(resp)
            },
        )
        .await
        .unwrap();
        let first = ws.next().await.unwrap().unwrap();
        (path_rx.recv().unwrap(), first.into_text().unwrap().to_string(), ws)
    });

    let config = RealtimeConfig::new(Url::parse(&format!("http://{addr}")).unwrap());
    let (_tx, identity) = watch::channel(hint("10.0.0.5"));
    let handle = RealtimeHandle::spawn(
        config,
        identity,
        reqwest::Client::new(),
        CancellationToken::new(),
    );

    let (legacy_uri, register, _ws) = timeout(WAIT, server).await.unwrap().unwrap();
    assert_eq!(legacy_uri, "/ws?ip=10.0.0.5");
    assert!(register.contains(r#""type":"register""#));

    wait_state(&handle, ChannelState::Open).await;
    handle.shutdown();
}

#[tokio::test]
async fn test_reregisters_when_address_changes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let mut registrations = Vec::new();
        while registrations.len() < 2 {
            let frame = ws.next().await.unwrap().unwrap();
            let value: serde_json::Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
            if value["type"] == "register" {
                registrations.push(value["ip"].as_str().map(str::to_owned));
            }
        }
        registrations
    });

    let config = RealtimeConfig::new(Url::parse(&format!("http://{addr}")).unwrap());
    let (tx, identity) = watch::channel(hint("10.0.0.5"));
    let handle = RealtimeHandle::spawn(
        config,
        identity,
        reqwest::Client::new(),
        CancellationToken::new(),
    );

    wait_state(&handle, ChannelState::Open).await;
    tx.send_replace(hint("10.0.0.9"));

    let registrations = timeout(WAIT, server).await.unwrap().unwrap();
    assert_eq!(
        registrations,
        vec![Some("10.0.0.5".to_string()), Some("10.0.0.9".to_string())]
    );
    handle.shutdown();
}
