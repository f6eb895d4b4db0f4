//! Mock subscription-creation and token-refresh HTTP endpoints.
//!
//! Responses default to success (201 / 200). Tests can queue one-off
//! status overrides or set a sticky default to simulate 409s, 401s, and
//! refresh rejections.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Clone)]
struct Script {
    queued: Arc<Mutex<VecDeque<u16>>>,
    sticky: Arc<Mutex<Option<u16>>>,
    hits: Arc<AtomicUsize>,
}

impl Script {
    fn new() -> Self {
        Script {
            queued: Arc::new(Mutex::new(VecDeque::new())),
            sticky: Arc::new(Mutex::new(None)),
            hits: Arc::new(AtomicUsize::new(0)),
        }
    }

    async fn next_status(&self, default: u16) -> u16 {
        self.hits.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.queued.lock().await.pop_front() {
            return status;
        }
        self.sticky.lock().await.unwrap_or(default)
    }
}

#[derive(Clone)]
struct MockState {
    subscriptions: Script,
    tokens: Script,
}

pub struct MockUpstreamHttp {
    state: MockState,
    base_url: String,
}

impl MockUpstreamHttp {
    pub async fn start() -> Self {
        let state = MockState {
            subscriptions: Script::new(),
            tokens: Script::new(),
        };
        let app = axum::Router::new()
            .route("/subscriptions", post(handle_subscription))
            .route("/token", post(handle_token))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock upstream http");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        MockUpstreamHttp {
            state,
            base_url: format!("http://{addr}"),
        }
    }

    pub fn subscriptions_url(&self) -> String {
        format!("{}/subscriptions", self.base_url)
    }

    pub fn token_url(&self) -> String {
        format!("{}/token", self.base_url)
    }

    pub fn subscription_hits(&self) -> usize {
        self.state.subscriptions.hits.load(Ordering::SeqCst)
    }

    pub fn token_hits(&self) -> usize {
        self.state.tokens.hits.load(Ordering::SeqCst)
    }

    /// Queue one-off subscription-creation statuses, consumed in order.
    pub async fn queue_subscription_status(&self, status: u16, times: usize) {
        let mut queued = self.state.subscriptions.queued.lock().await;
        for _ in 0..times {
            queued.push_back(status);
        }
    }

    /// Every subscription creation returns `status` until cleared.
    pub async fn set_subscription_default(&self, status: Option<u16>) {
        *self.state.subscriptions.sticky.lock().await = status;
    }

    pub async fn queue_token_status(&self, status: u16, times: usize) {
        let mut queued = self.state.tokens.queued.lock().await;
        for _ in 0..times {
            queued.push_back(status);
        }
    }

    pub async fn set_token_default(&self, status: Option<u16>) {
        *self.state.tokens.sticky.lock().await = status;
    }
}

async fn handle_subscription(
    State(state): State<MockState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let status = state.subscriptions.next_status(201).await;
    let sub_type = body
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let body = json!({
        "data": [{
            "id": Uuid::new_v4().to_string(),
            "type": sub_type,
            "status": "enabled",
        }]
    });
    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(body),
    )
}

async fn handle_token(State(state): State<MockState>) -> (StatusCode, Json<Value>) {
    let status = state.tokens.next_status(200).await;
    let body = json!({
        "access_token": format!("access-{}", Uuid::new_v4()),
        "refresh_token": format!("refresh-{}", Uuid::new_v4()),
        "expires_in": 14400,
    });
    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(body),
    )
}
