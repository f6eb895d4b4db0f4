//! Shared harness for the broker integration suites: a broker wired to
//! mock upstream endpoints, an HTTP client, and a raw subscriber WebSocket
//! client.

#![allow(dead_code)]

use broker::config::{AuthConfig, BrokerConfig, ChatConfig, UpstreamConfig};
use broker::{AppState, build_router};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use ov_protocol::{ClientMessage, ServerMessage};
use ov_store::{CredentialTuple, MemoryStore, TenantRecord};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::Message;

pub const SIGNING_KEY: &str = "integration-signing-key";

pub fn test_config(
    eventsub_ws_url: String,
    subscriptions_url: String,
    token_url: String,
    chat_ws_url: String,
) -> BrokerConfig {
    BrokerConfig {
        bind_addr: "127.0.0.1:0".to_owned(),
        store_path: PathBuf::from("unused.db"),
        allowed_origins: Vec::new(),
        auth: AuthConfig {
            signing_key: SIGNING_KEY.to_owned(),
        },
        upstream: UpstreamConfig {
            client_id: "test-client".to_owned(),
            client_secret: "test-secret".to_owned(),
            eventsub_ws_url,
            subscriptions_url,
            token_url,
            keepalive_timeout: Duration::from_secs(60),
        },
        chat: ChatConfig { ws_url: chat_ws_url },
    }
}

pub struct Harness {
    pub state: AppState,
    pub base_url: String,
    pub http: reqwest::Client,
}

pub async fn spawn_broker(config: BrokerConfig) -> Harness {
    let state = AppState::new(config, Arc::new(MemoryStore::new()));
    let router = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind broker");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Harness {
        state,
        base_url: format!("http://{addr}"),
        http: reqwest::Client::new(),
    }
}

impl Harness {
    pub fn token_for(&self, tenant_id: &str) -> String {
        broker::auth::sign_token(SIGNING_KEY, tenant_id, Utc::now().timestamp() + 3600)
            .expect("sign token")
    }

    pub async fn seed_tenant(&self, tenant_id: &str, username: &str) -> TenantRecord {
        let mut tenant = TenantRecord::new(tenant_id, username);
        tenant.credentials = Some(CredentialTuple {
            access_token: "seed-access".to_owned(),
            refresh_token: "seed-refresh".to_owned(),
            expires_at: Utc::now() + chrono::Duration::hours(4),
        });
        self.state.records.put_tenant(&tenant).await.expect("seed tenant");
        tenant
    }

    pub async fn post_empty(&self, path: &str, token: &str) -> reqwest::Response {
        self.http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .expect("request")
    }

    pub async fn post_json(
        &self,
        path: &str,
        token: &str,
        body: &serde_json::Value,
    ) -> reqwest::Response {
        self.http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .expect("request")
    }

    pub async fn get(&self, path: &str, token: &str) -> reqwest::Response {
        self.http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .expect("request")
    }
}

// ---------------------------------------------------------------------------
// Raw subscriber WebSocket client
// ---------------------------------------------------------------------------

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct WsClient {
    ws: WsStream,
}

impl WsClient {
    pub async fn connect(base_url: &str, token: Option<&str>) -> Self {
        let ws_base = base_url.replacen("http://", "ws://", 1);
        let url = match token {
            Some(token) => format!("{ws_base}/ws?token={token}"),
            None => format!("{ws_base}/ws"),
        };
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .expect("subscriber connect");
        WsClient { ws }
    }

    pub async fn send(&mut self, message: &ClientMessage) {
        let json = serde_json::to_string(message).expect("serialize client message");
        self.ws
            .send(Message::Text(json.into()))
            .await
            .expect("send client message");
    }

    /// Next server message within `timeout`, skipping protocol frames.
    pub async fn recv(&mut self, timeout: Duration) -> Option<ServerMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())?;
            let frame = tokio::time::timeout(remaining, self.ws.next()).await.ok()??;
            match frame.ok()? {
                Message::Text(text) => {
                    if let Ok(message) = serde_json::from_str(&text) {
                        return Some(message);
                    }
                }
                Message::Close(_) => return None,
                _ => {}
            }
        }
    }

    /// Collect messages until `timeout` elapses with no further traffic.
    pub async fn drain(&mut self, quiet: Duration) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Some(message) = self.recv(quiet).await {
            out.push(message);
        }
        out
    }

    /// Receive until a message satisfies `predicate`.
    pub async fn wait_for<F>(&mut self, predicate: F, timeout: Duration) -> Option<ServerMessage>
    where
        F: Fn(&ServerMessage) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())?;
            let message = self.recv(remaining).await?;
            if predicate(&message) {
                return Some(message);
            }
        }
    }
}
