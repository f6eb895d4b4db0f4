//! Scriptable event-bus WebSocket server.
//!
//! Every accepted connection immediately receives a `session_welcome` with
//! a fresh session id; frames pushed by the test afterwards reach all live
//! connections (a socket the client already closed just drops them).

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::protocol::Message;
use uuid::Uuid;

pub struct MockEventBus {
    addr: SocketAddr,
    frames: broadcast::Sender<String>,
    connections: Arc<AtomicUsize>,
}

impl MockEventBus {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock bus");
        let addr = listener.local_addr().expect("local addr");
        let (frames, _) = broadcast::channel::<String>(256);
        let connections = Arc::new(AtomicUsize::new(0));

        let frames_accept = frames.clone();
        let connections_accept = connections.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _peer)) = listener.accept().await else {
                    break;
                };
                let frames_rx = frames_accept.subscribe();
                let connections = connections_accept.clone();
                tokio::spawn(serve_connection(stream, frames_rx, connections));
            }
        });

        MockEventBus {
            addr,
            frames,
            connections,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Total connections accepted since start (reconnects included).
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub async fn wait_for_connections(&self, at_least: usize) {
        for _ in 0..200 {
            if self.connection_count() >= at_least {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        panic!(
            "expected at least {at_least} connections, saw {}",
            self.connection_count()
        );
    }

    pub fn send_raw(&self, frame: String) {
        let _ = self.frames.send(frame);
    }

    pub fn send_keepalive(&self) {
        self.send_raw(frame("session_keepalive", json!({})).to_string());
    }

    pub fn send_notification(&self, sub_type: &str, event: Value) {
        let payload = json!({
            "subscription": { "id": Uuid::new_v4().to_string(), "type": sub_type },
            "event": event,
        });
        self.send_raw(frame("notification", payload).to_string());
    }

    /// Points the client at this same server; the replacement connection
    /// gets its own welcome.
    pub fn send_reconnect(&self) {
        let payload = json!({
            "session": {
                "id": Uuid::new_v4().to_string(),
                "reconnect_url": self.url(),
            }
        });
        self.send_raw(frame("session_reconnect", payload).to_string());
    }

    pub fn send_revocation(&self, subscription_id: &str, sub_type: &str) {
        let payload = json!({
            "subscription": {
                "id": subscription_id,
                "type": sub_type,
                "status": "authorization_revoked",
            }
        });
        self.send_raw(frame("revocation", payload).to_string());
    }
}

fn frame(message_type: &str, payload: Value) -> Value {
    json!({
        "metadata": {
            "message_id": Uuid::new_v4().to_string(),
            "message_type": message_type,
            "message_timestamp": "2025-01-01T00:00:00Z",
        },
        "payload": payload,
    })
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    mut frames: broadcast::Receiver<String>,
    connections: Arc<AtomicUsize>,
) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    connections.fetch_add(1, Ordering::SeqCst);

    let welcome = frame(
        "session_welcome",
        json!({
            "session": {
                "id": Uuid::new_v4().to_string(),
                "keepalive_timeout_seconds": 10,
                "reconnect_url": null,
            }
        }),
    );
    if ws.send(Message::Text(welcome.to_string().into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            pushed = frames.recv() => match pushed {
                Ok(text) => {
                    if ws.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            inbound = ws.next() => match inbound {
                Some(Ok(Message::Ping(data))) => { let _ = ws.send(Message::Pong(data)).await; }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }
}
