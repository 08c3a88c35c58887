//! Integration tests for the inkstream delivery pipeline
//!
//! Unit tests cover the state machine without sockets; these tests run the
//! real driver against a loopback WebSocket server and the dispatcher
//! against capture transports.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use inkstream::config::{ObserveConfig, RelayConfig};
use inkstream::observe::{HostRequest, Observer};
use inkstream::relay::handshake::{AnonymousIdentity, SettingsStore, StaticSettings};
use inkstream::relay::{Dispatcher, DrainPolicy, SocketRelay, Transport};

// ============================================
// Helpers
// ============================================

/// Captures frames instead of delivering them
struct CaptureTransport {
    frames: Arc<Mutex<Vec<String>>>,
}

impl Transport for CaptureTransport {
    fn name(&self) -> &'static str {
        "capture"
    }

    fn send(&self, frame: &str) -> inkstream::Result<()> {
        self.frames.lock().unwrap().push(frame.to_owned());
        Ok(())
    }
}

/// Settings store simulating unavailable host storage
struct EmptySettings;

impl SettingsStore for EmptySettings {
    fn read(&self, _keys: &'static [&'static str]) -> BoxFuture<'static, Map<String, Value>> {
        Box::pin(async { Map::new() })
    }
}

/// Loopback collector: accepts WebSocket connections and forwards every
/// text frame it receives, tagged with the connection number.
async fn spawn_collector() -> (String, mpsc::UnboundedReceiver<(usize, Value)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut conn_number = 0;
        while let Ok((stream, _)) = listener.accept().await {
            conn_number += 1;
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(mut socket) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = socket.next().await {
                    if let Ok(text) = message.into_text() {
                        if text.is_empty() {
                            continue;
                        }
                        let parsed: Value = serde_json::from_str(&text).unwrap();
                        let _ = tx.send((conn_number, parsed));
                    }
                }
            });
        }
    });

    (format!("ws://{}/wsapi/in/", addr), rx)
}

async fn recv_event(rx: &mut mpsc::UnboundedReceiver<(usize, Value)>) -> (usize, Value) {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for collector frame")
        .expect("collector channel closed")
}

fn relay_config(drain: DrainPolicy) -> RelayConfig {
    RelayConfig {
        reconnect_delay_ms: 50,
        drain,
    }
}

// ============================================
// Socket relay end to end
// ============================================

#[tokio::test]
async fn test_handshake_then_queued_records_drain_in_order() {
    let (url, mut rx) = spawn_collector().await;

    let relay = SocketRelay::spawn(
        url,
        &relay_config(DrainPolicy::Full),
        Arc::new(AnonymousIdentity),
        Arc::new(StaticSettings::new(Map::new())),
    );

    for n in 0..3 {
        relay.send(&format!("{{\"event\":\"keystroke\",\"seq\":{}}}", n));
    }

    // Both prerequisites first, in either order.
    let (_, first) = recv_event(&mut rx).await;
    let (_, second) = recv_event(&mut rx).await;
    let mut prerequisite_kinds = vec![
        first["event"].as_str().unwrap().to_string(),
        second["event"].as_str().unwrap().to_string(),
    ];
    prerequisite_kinds.sort();
    assert_eq!(prerequisite_kinds, vec!["identity", "settings"]);

    // Then the gate marker, then the queued records in FIFO order.
    let (_, marker) = recv_event(&mut rx).await;
    assert_eq!(marker["event"], "metadata_finished");

    for n in 0..3 {
        let (_, record) = recv_event(&mut rx).await;
        assert_eq!(record["event"], "keystroke");
        assert_eq!(record["seq"], n);
    }

    relay.shutdown();
}

#[tokio::test]
async fn test_settings_record_carries_minted_unique_id() {
    let (url, mut rx) = spawn_collector().await;

    let relay = SocketRelay::spawn(
        url,
        &relay_config(DrainPolicy::Full),
        Arc::new(AnonymousIdentity),
        Arc::new(StaticSettings::new(Map::new())),
    );

    loop {
        let (_, event) = recv_event(&mut rx).await;
        if event["event"] == "settings" {
            assert!(event["settings"]["unique-id"].is_string());
            break;
        }
    }

    relay.shutdown();
}

#[tokio::test]
async fn test_empty_settings_store_still_reaches_ready() {
    // Unavailable host storage yields an empty mapping; the handshake must
    // still complete and open the gate.
    let (url, mut rx) = spawn_collector().await;

    let relay = SocketRelay::spawn(
        url,
        &relay_config(DrainPolicy::Full),
        Arc::new(AnonymousIdentity),
        Arc::new(EmptySettings),
    );

    relay.send("{\"event\":\"keystroke\",\"seq\":0}");

    let mut saw_empty_settings = false;
    loop {
        let (_, event) = recv_event(&mut rx).await;
        if event["event"] == "settings" {
            assert_eq!(event["settings"], json!({}));
            saw_empty_settings = true;
        }
        if event["event"] == "keystroke" {
            break;
        }
    }
    assert!(saw_empty_settings);

    relay.shutdown();
}

#[tokio::test]
async fn test_hold_last_policy_delays_newest_record() {
    let (url, mut rx) = spawn_collector().await;

    let relay = SocketRelay::spawn(
        url,
        &relay_config(DrainPolicy::HoldLast),
        Arc::new(AnonymousIdentity),
        Arc::new(StaticSettings::new(Map::new())),
    );

    // Wait for the gate so the enqueues below hit a ready connection
    // deterministically.
    loop {
        let (_, event) = recv_event(&mut rx).await;
        if event["event"] == "metadata_finished" {
            break;
        }
    }

    relay.send("{\"event\":\"keystroke\",\"seq\":0}");
    relay.send("{\"event\":\"keystroke\",\"seq\":1}");

    // seq 1 is held back; only seq 0 may arrive until the next enqueue.
    let (_, record) = recv_event(&mut rx).await;
    assert_eq!(record["seq"], 0);

    relay.send("{\"event\":\"keystroke\",\"seq\":2}");
    let (_, record) = recv_event(&mut rx).await;
    assert_eq!(record["seq"], 1);

    relay.shutdown();
}

#[tokio::test]
async fn test_reconnect_redoes_handshake_and_delivers_warning() {
    // A collector that drops the first connection as soon as it opens.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        // First connection: accept the WebSocket, then hang up.
        if let Ok((stream, _)) = listener.accept().await {
            if let Ok(socket) = tokio_tungstenite::accept_async(stream).await {
                drop(socket);
            }
        }
        // Later connections behave.
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(mut socket) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = socket.next().await {
                    if let Ok(text) = message.into_text() {
                        if text.is_empty() {
                            continue;
                        }
                        let parsed: Value = serde_json::from_str(&text).unwrap();
                        let _ = tx.send((0, parsed));
                    }
                }
            });
        }
    });

    let relay = SocketRelay::spawn(
        format!("ws://{}/wsapi/in/", addr),
        &relay_config(DrainPolicy::Full),
        Arc::new(AnonymousIdentity),
        Arc::new(StaticSettings::new(Map::new())),
    );

    // The healthy connection replays the full handshake and then drains the
    // warning queued when the first connection died.
    let mut saw_marker = false;
    loop {
        let (_, event) = recv_event(&mut rx).await;
        match event["event"].as_str().unwrap() {
            "metadata_finished" => saw_marker = true,
            "warning" => {
                assert!(saw_marker, "warning must drain after the gate opens");
                let issue = event["issue"].as_str().unwrap();
                assert!(issue == "Lost connection" || issue == "Could not connect");
                break;
            }
            _ => {}
        }
    }

    relay.shutdown();
}

// ============================================
// Dispatcher + producer end to end
// ============================================

#[tokio::test]
async fn test_save_event_flows_through_dispatcher() {
    let frames = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = Arc::new(Dispatcher::new(vec![Box::new(CaptureTransport {
        frames: frames.clone(),
    })]));
    let observer = Observer::new(dispatcher.clone(), &ObserveConfig::default());

    observer.announce_loaded();

    let mut form_data = HashMap::new();
    form_data.insert("bundles".to_string(), r#"[{"commands":[{"ty":"is"}]}]"#.to_string());
    form_data.insert("rev".to_string(), "7".to_string());
    observer.observe_request(&HostRequest {
        url: "https://docs.google.com/document/d/DOC123/save?id=x&sid=y".to_string(),
        form_data,
        timestamp_ms: 1_700_000_000_000,
    });

    let events: Vec<Value> = frames
        .lock()
        .unwrap()
        .iter()
        .map(|f| serde_json::from_str(f).unwrap())
        .collect();

    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["event"], "relay_loaded");
    assert_eq!(events[1]["event"], "document_save");
    assert_eq!(events[1]["doc_id"], "DOC123");
    assert_eq!(events[1]["source"], "org.inkstream.writing-telemetry");
    assert!(events[1]["ts"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_dispatcher_feeds_socket_relay() {
    let (url, mut rx) = spawn_collector().await;

    let relay = SocketRelay::spawn(
        url,
        &relay_config(DrainPolicy::Full),
        Arc::new(AnonymousIdentity),
        Arc::new(StaticSettings::new(Map::new())),
    );
    let dispatcher = Dispatcher::new(vec![Box::new(relay)]);

    dispatcher.log("keystroke", inkstream::event::payload(json!({"key": "a"})));

    loop {
        let (_, event) = recv_event(&mut rx).await;
        if event["event"] == "keystroke" {
            assert_eq!(event["key"], "a");
            assert_eq!(event["origin"], "relay");
            break;
        }
    }
}
