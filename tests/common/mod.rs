//! Common test utilities
//!
//! `MockHub` is an in-process WebSocket server that speaks the hub login
//! sequence and answers commands through a pluggable responder. It records
//! every frame it receives so tests can assert on ids and ordering.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};

use hub_client::config::{ClientConfig, ConnectionSettings, HubSettings};

pub const TOKEN: &str = "T";

/// Builds the reply for one command frame; `None` means stay silent
pub type Responder = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

#[derive(Debug, Clone)]
enum Control {
    Push(Value),
    Close,
}

pub struct MockHub {
    addr: SocketAddr,
    shutdown_tx: Option<mpsc::Sender<()>>,
    control_tx: broadcast::Sender<Control>,
    received: Arc<RwLock<Vec<Value>>>,
    connections: Arc<AtomicUsize>,
}

impl MockHub {
    /// Hub with the default responder
    pub async fn start() -> Self {
        Self::with_responder(Arc::new(default_reply)).await
    }

    pub async fn with_responder(responder: Responder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (control_tx, _) = broadcast::channel(64);
        let received = Arc::new(RwLock::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let control = control_tx.clone();
        let frames = Arc::clone(&received);
        let accepted = Arc::clone(&connections);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        if let Ok((stream, _)) = accept_result {
                            let frames = Arc::clone(&frames);
                            let responder = Arc::clone(&responder);
                            let control_rx = control.subscribe();
                            accepted.fetch_add(1, Ordering::SeqCst);
                            tokio::spawn(async move {
                                if let Ok(ws_stream) = accept_async(stream).await {
                                    handle_connection(ws_stream, frames, responder, control_rx).await;
                                }
                            });
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            control_tx,
            received,
            connections,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/api/websocket", self.addr)
    }

    /// Client config pointing at this hub with short test timings
    pub fn config(&self) -> ClientConfig {
        self.config_with_token(Some(TOKEN))
    }

    pub fn config_with_token(&self, token: Option<&str>) -> ClientConfig {
        ClientConfig {
            hub: HubSettings {
                url: self.ws_url(),
                token: token.map(str::to_string),
            },
            connection: ConnectionSettings {
                connect_timeout_ms: 2_000,
                auth_timeout_ms: 2_000,
                request_timeout_ms: 2_000,
                reconnect_base_delay_ms: 20,
                max_reconnect_attempts: 3,
                heartbeat_interval_ms: 0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Every frame received, across all connections, in arrival order
    pub fn received(&self) -> Vec<Value> {
        self.received.read().clone()
    }

    /// Received frames of one `type`
    pub fn received_of(&self, kind: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|frame| frame["type"] == kind)
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Send a frame to every live connection
    pub fn push(&self, frame: Value) {
        let _ = self.control_tx.send(Control::Push(frame));
    }

    /// Close every live connection from the server side
    pub fn drop_connections(&self) {
        let _ = self.control_tx.send(Control::Close);
    }

    /// Stop accepting new connections
    pub fn stop_accepting(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }

    /// Poll until `condition` holds or two seconds pass
    pub async fn wait_for(&self, condition: impl Fn(&MockHub) -> bool) -> bool {
        for _ in 0..200 {
            if condition(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl Drop for MockHub {
    fn drop(&mut self) {
        self.stop_accepting();
        let _ = self.control_tx.send(Control::Close);
    }
}

async fn handle_connection<S>(
    ws_stream: S,
    frames: Arc<RwLock<Vec<Value>>>,
    responder: Responder,
    mut control_rx: broadcast::Receiver<Control>,
) where
    S: StreamExt<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + SinkExt<WsMessage>
        + Unpin,
{
    let (mut write, mut read) = ws_stream.split();

    let hello = json!({"type": "auth_required", "ha_version": "2024.3.0"});
    if write.send(WsMessage::Text(hello.to_string())).await.is_err() {
        return;
    }

    let mut authenticated = false;

    loop {
        tokio::select! {
            msg = read.next() => {
                let text = match msg {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                };
                let Ok(frame) = serde_json::from_str::<Value>(&text) else { continue };
                frames.write().push(frame.clone());

                if !authenticated {
                    if frame["type"] != "auth" {
                        continue;
                    }
                    if frame["access_token"] == TOKEN {
                        authenticated = true;
                        let ok = json!({"type": "auth_ok", "ha_version": "2024.3.0"});
                        let _ = write.send(WsMessage::Text(ok.to_string())).await;
                    } else {
                        let invalid = json!({"type": "auth_invalid", "message": "Invalid access token or password"});
                        let _ = write.send(WsMessage::Text(invalid.to_string())).await;
                        let _ = write.send(WsMessage::Close(None)).await;
                        break;
                    }
                    continue;
                }

                if let Some(reply) = responder(&frame) {
                    let _ = write.send(WsMessage::Text(reply.to_string())).await;
                }
            }

            control = control_rx.recv() => match control {
                Ok(Control::Push(frame)) => {
                    if authenticated {
                        let _ = write.send(WsMessage::Text(frame.to_string())).await;
                    }
                }
                Ok(Control::Close) | Err(broadcast::error::RecvError::Closed) => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Reply helpers
// ─────────────────────────────────────────────────────────────────

pub fn success(id: &Value, result: Value) -> Value {
    json!({"id": id, "type": "result", "success": true, "result": result})
}

pub fn failure(id: &Value, code: &str, message: &str) -> Value {
    json!({"id": id, "type": "result", "success": false, "error": {"code": code, "message": message}})
}

pub fn state_changed(entity_id: &str, new_state: Option<&str>) -> Value {
    let new_state = new_state.map(|state| {
        json!({
            "entity_id": entity_id,
            "state": state,
            "attributes": {},
            "last_changed": "2024-03-01T10:00:00+00:00",
            "last_updated": "2024-03-01T10:00:00+00:00"
        })
    });
    json!({
        "id": 1,
        "type": "event",
        "event": {
            "event_type": "state_changed",
            "data": {"entity_id": entity_id, "new_state": new_state, "old_state": null},
            "origin": "LOCAL",
            "time_fired": "2024-03-01T10:00:00+00:00"
        }
    })
}

/// Subscriptions succeed, pings pong, `get_states` returns one sensor
pub fn default_reply(frame: &Value) -> Option<Value> {
    let id = &frame["id"];
    match frame["type"].as_str() {
        Some("ping") => Some(json!({"id": id, "type": "pong"})),
        Some("get_states") => Some(success(id, json!([{"entity_id": "sensor.x", "state": "5"}]))),
        _ => Some(success(id, Value::Null)),
    }
}

/// Poll a condition for up to two seconds
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
