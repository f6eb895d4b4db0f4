//! Capturing webhook receiver.

use axum::Json;
use axum::extract::State;
use axum::routing::post;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub struct MockWebhook {
    url: String,
    bodies: Arc<Mutex<Vec<Value>>>,
}

impl MockWebhook {
    pub async fn start() -> Self {
        let bodies: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let app = axum::Router::new()
            .route("/hook", post(capture))
            .with_state(bodies.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock webhook");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        MockWebhook {
            url: format!("http://{addr}/hook"),
            bodies,
        }
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    pub async fn bodies(&self) -> Vec<Value> {
        self.bodies.lock().await.clone()
    }

    pub async fn delivery_count(&self) -> usize {
        self.bodies.lock().await.len()
    }

    /// Poll until at least `count` deliveries arrived, or time out.
    pub async fn wait_for_deliveries(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.delivery_count().await >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

async fn capture(State(bodies): State<Arc<Mutex<Vec<Value>>>>, Json(body): Json<Value>) {
    bodies.lock().await.push(body);
}
