//! Session supervisor: exclusive owner of the two upstream sessions per
//! tenant.
//!
//! Starts and stops the event session and the chat session in response to
//! lifecycle transitions and explicit monitor/bot controls, and tears both
//! down when a session reports revoked credentials.

use crate::chat::session::{ChatSession, ChatSessionContext};
use crate::chat::ChatOutbox;
use crate::config::{ChatConfig, UpstreamConfig};
use crate::dispatcher::Dispatcher;
use crate::error::CoreError;
use crate::eventsub::{EventSession, EventSessionContext, SessionNotice, StatusSnapshot};
use crate::rooms::Rooms;
use crate::token_broker::TokenBroker;
use ov_protocol::{ServerMessage, StreamEvent, StreamStatus};
use ov_store::{Records, TenantRecord};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::{info, warn};

pub struct Supervisor {
    records: Records,
    broker: Arc<TokenBroker>,
    dispatcher: Arc<Dispatcher>,
    rooms: Arc<Rooms>,
    outbox: Arc<ChatOutbox>,
    events: mpsc::Sender<StreamEvent>,
    upstream_cfg: UpstreamConfig,
    chat_cfg: ChatConfig,
    monitors: RwLock<HashMap<String, EventSession>>,
    chats: RwLock<HashMap<String, ChatSession>>,
    notices: mpsc::UnboundedSender<SessionNotice>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        records: Records,
        broker: Arc<TokenBroker>,
        dispatcher: Arc<Dispatcher>,
        rooms: Arc<Rooms>,
        outbox: Arc<ChatOutbox>,
        events: mpsc::Sender<StreamEvent>,
        upstream_cfg: UpstreamConfig,
        chat_cfg: ChatConfig,
    ) -> Arc<Self> {
        let (notices, notices_rx) = mpsc::unbounded_channel();
        let supervisor = Arc::new(Supervisor {
            records,
            broker,
            dispatcher,
            rooms,
            outbox,
            events,
            upstream_cfg,
            chat_cfg,
            monitors: RwLock::new(HashMap::new()),
            chats: RwLock::new(HashMap::new()),
            notices,
        });
        tokio::spawn(notice_loop(supervisor.clone(), notices_rx));
        supervisor
    }

    async fn tenant(&self, tenant_id: &str) -> Result<TenantRecord, CoreError> {
        self.records
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("tenant {tenant_id}")))
    }

    // -----------------------------------------------------------------------
    // Upstream event session (monitor)
    // -----------------------------------------------------------------------

    /// Start the tenant's event session; a running session is kept as-is.
    pub async fn start_monitor(&self, tenant_id: &str) -> Result<(), CoreError> {
        let tenant = self.tenant(tenant_id).await?;
        if tenant.credentials.is_none() || tenant.credentials_revoked {
            return Err(CoreError::NoCredentials);
        }

        let mut monitors = self.monitors.write().await;
        if monitors.contains_key(tenant_id) {
            return Ok(());
        }
        let session = EventSession::spawn(EventSessionContext {
            tenant_id: tenant_id.to_owned(),
            features: tenant.features,
            cfg: self.upstream_cfg.clone(),
            broker: self.broker.clone(),
            events: self.events.clone(),
            rooms: self.rooms.clone(),
            notices: self.notices.clone(),
        });
        monitors.insert(tenant_id.to_owned(), session);
        info!(tenant_id, "upstream event session started");
        Ok(())
    }

    /// Stop the tenant's event session. Idempotent.
    pub async fn stop_monitor(&self, tenant_id: &str) {
        let session = self.monitors.write().await.remove(tenant_id);
        if let Some(session) = session {
            session.stop().await;
            info!(tenant_id, "upstream event session stopped");
        }
    }

    /// Tear down and start a fresh session — fresh socket, fresh welcome,
    /// re-created subscriptions.
    pub async fn reconnect_monitor(&self, tenant_id: &str) -> Result<(), CoreError> {
        self.stop_monitor(tenant_id).await;
        self.start_monitor(tenant_id).await
    }

    /// Whether a session handle exists (running or reconnecting).
    pub async fn monitor_exists(&self, tenant_id: &str) -> bool {
        self.monitors.read().await.contains_key(tenant_id)
    }

    /// Whether the session currently holds a welcomed connection.
    pub async fn monitor_connected(&self, tenant_id: &str) -> bool {
        let status = {
            let monitors = self.monitors.read().await;
            monitors.get(tenant_id).map(EventSession::status)
        };
        match status {
            Some(status) => status.is_connected().await,
            None => false,
        }
    }

    pub async fn monitor_status(&self, tenant_id: &str) -> Option<StatusSnapshot> {
        let status = {
            let monitors = self.monitors.read().await;
            monitors.get(tenant_id).map(EventSession::status)
        };
        match status {
            Some(status) => Some(status.snapshot().await),
            None => None,
        }
    }

    // -----------------------------------------------------------------------
    // Chat session (bot)
    // -----------------------------------------------------------------------

    /// Start the tenant's chat bot. Requires the `chatCommands` feature and
    /// a prepping or live stream.
    pub async fn start_chat(&self, tenant_id: &str) -> Result<(), CoreError> {
        let tenant = self.tenant(tenant_id).await?;
        if !tenant.features.chat_commands {
            return Err(CoreError::FeatureDisabled("chatCommands".to_owned()));
        }
        if !matches!(
            tenant.stream_status,
            StreamStatus::Prepping | StreamStatus::Live
        ) {
            return Err(CoreError::InvalidTransition(
                "chat bot requires a prepping or live stream".to_owned(),
            ));
        }

        let mut chats = self.chats.write().await;
        if chats.contains_key(tenant_id) {
            return Ok(());
        }
        let session = ChatSession::spawn(ChatSessionContext {
            tenant_id: tenant_id.to_owned(),
            channel: tenant.username.to_lowercase(),
            cfg: self.chat_cfg.clone(),
            broker: self.broker.clone(),
            dispatcher: self.dispatcher.clone(),
            outbox: self.outbox.clone(),
            rooms: self.rooms.clone(),
        });
        chats.insert(tenant_id.to_owned(), session);
        info!(tenant_id, "chat session started");
        Ok(())
    }

    /// Stop the tenant's chat bot. Idempotent.
    pub async fn stop_chat(&self, tenant_id: &str) {
        let session = self.chats.write().await.remove(tenant_id);
        if let Some(session) = session {
            session.stop().await;
            info!(tenant_id, "chat session stopped");
        }
    }

    pub async fn chat_exists(&self, tenant_id: &str) -> bool {
        self.chats.read().await.contains_key(tenant_id)
    }

    pub async fn chat_connected(&self, tenant_id: &str) -> bool {
        self.outbox.is_connected(tenant_id).await
    }

    // -----------------------------------------------------------------------
    // Lifecycle hooks
    // -----------------------------------------------------------------------

    /// `prep` side effects: chat bot up (when the feature allows) and an
    /// unconditionally fresh upstream session, to recover from silent
    /// failures.
    pub async fn activate(&self, tenant: &TenantRecord) -> Result<(), CoreError> {
        if tenant.features.chat_commands {
            self.start_chat(&tenant.tenant_id).await?;
        }
        self.reconnect_monitor(&tenant.tenant_id).await
    }

    /// `end-stream` / `cancel-prep` side effects.
    pub async fn deactivate(&self, tenant_id: &str) {
        self.stop_chat(tenant_id).await;
        self.stop_monitor(tenant_id).await;
    }

    /// Graceful shutdown: close every session cleanly.
    pub async fn shutdown_all(&self) {
        let chat_ids: Vec<String> = self.chats.read().await.keys().cloned().collect();
        for tenant_id in chat_ids {
            self.stop_chat(&tenant_id).await;
        }
        let monitor_ids: Vec<String> = self.monitors.read().await.keys().cloned().collect();
        for tenant_id in monitor_ids {
            self.stop_monitor(&tenant_id).await;
        }
    }
}

/// Credential revocation is terminal for the tenant's sessions: stop both
/// and tell the room.
async fn notice_loop(
    supervisor: Arc<Supervisor>,
    mut notices: mpsc::UnboundedReceiver<SessionNotice>,
) {
    while let Some(notice) = notices.recv().await {
        match notice {
            SessionNotice::AuthRevoked { tenant_id } => {
                warn!(tenant_id, "auth revoked, stopping tenant sessions");
                supervisor.stop_chat(&tenant_id).await;
                supervisor.stop_monitor(&tenant_id).await;
                supervisor
                    .rooms
                    .broadcast(&tenant_id, &ServerMessage::AuthRevoked {})
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::CounterEngine;
    use crate::dispatcher::event_channel;
    use chrono::Utc;
    use ov_store::{CredentialTuple, MemoryStore};
    use std::time::Duration;

    fn test_upstream_cfg() -> UpstreamConfig {
        UpstreamConfig {
            client_id: "cid".to_owned(),
            client_secret: "cs".to_owned(),
            // Nothing listens on these; sessions just cycle their backoff.
            eventsub_ws_url: "ws://127.0.0.1:9/ws".to_owned(),
            subscriptions_url: "http://127.0.0.1:9/subs".to_owned(),
            token_url: "http://127.0.0.1:9/token".to_owned(),
            keepalive_timeout: Duration::from_secs(60),
        }
    }

    async fn fixture() -> (Arc<Supervisor>, Records, Arc<Rooms>) {
        let records = Records::new(Arc::new(MemoryStore::new()));
        let engine = Arc::new(CounterEngine::new(records.clone()));
        let rooms = Arc::new(Rooms::new());
        let outbox = Arc::new(ChatOutbox::new());
        let dispatcher = Arc::new(Dispatcher::new(
            records.clone(),
            engine,
            rooms.clone(),
            outbox.clone(),
        ));
        let broker = Arc::new(TokenBroker::new(records.clone(), test_upstream_cfg()));
        let (events_tx, _events_rx) = event_channel();
        let supervisor = Supervisor::new(
            records.clone(),
            broker,
            dispatcher,
            rooms.clone(),
            outbox,
            events_tx,
            test_upstream_cfg(),
            ChatConfig {
                ws_url: "ws://127.0.0.1:9/chat".to_owned(),
            },
        );
        (supervisor, records, rooms)
    }

    async fn seed_tenant(records: &Records, with_credentials: bool, status: StreamStatus) {
        let mut tenant = TenantRecord::new("t-1", "streamer");
        tenant.stream_status = status;
        if with_credentials {
            tenant.credentials = Some(CredentialTuple {
                access_token: "a".to_owned(),
                refresh_token: "r".to_owned(),
                expires_at: Utc::now() + chrono::Duration::hours(4),
            });
        }
        records.put_tenant(&tenant).await.unwrap();
    }

    #[tokio::test]
    async fn monitor_start_requires_credentials() {
        let (supervisor, records, _) = fixture().await;
        seed_tenant(&records, false, StreamStatus::Offline).await;
        match supervisor.start_monitor("t-1").await {
            Err(CoreError::NoCredentials) => {}
            other => panic!("expected NoCredentials, got {other:?}"),
        }
        assert!(!supervisor.monitor_exists("t-1").await);
    }

    #[tokio::test]
    async fn monitor_start_is_idempotent_and_stop_removes_the_handle() {
        let (supervisor, records, _) = fixture().await;
        seed_tenant(&records, true, StreamStatus::Offline).await;

        supervisor.start_monitor("t-1").await.unwrap();
        supervisor.start_monitor("t-1").await.unwrap();
        assert!(supervisor.monitor_exists("t-1").await);
        assert_eq!(supervisor.monitors.read().await.len(), 1);

        supervisor.stop_monitor("t-1").await;
        assert!(!supervisor.monitor_exists("t-1").await);
        // A second stop is a no-op.
        supervisor.stop_monitor("t-1").await;
    }

    #[tokio::test]
    async fn chat_requires_feature_and_active_stream() {
        let (supervisor, records, _) = fixture().await;
        seed_tenant(&records, true, StreamStatus::Offline).await;

        match supervisor.start_chat("t-1").await {
            Err(CoreError::InvalidTransition(_)) => {}
            other => panic!("expected InvalidTransition, got {other:?}"),
        }

        let mut tenant = records.get_tenant("t-1").await.unwrap().unwrap();
        tenant.stream_status = StreamStatus::Prepping;
        tenant.features.chat_commands = false;
        records.put_tenant(&tenant).await.unwrap();
        match supervisor.start_chat("t-1").await {
            Err(CoreError::FeatureDisabled(_)) => {}
            other => panic!("expected FeatureDisabled, got {other:?}"),
        }

        let mut tenant = records.get_tenant("t-1").await.unwrap().unwrap();
        tenant.features.chat_commands = true;
        records.put_tenant(&tenant).await.unwrap();
        supervisor.start_chat("t-1").await.unwrap();
        assert!(supervisor.chat_exists("t-1").await);
        supervisor.stop_chat("t-1").await;
        assert!(!supervisor.chat_exists("t-1").await);
    }

    #[tokio::test]
    async fn activate_replaces_the_monitor_with_a_fresh_session() {
        let (supervisor, records, _) = fixture().await;
        seed_tenant(&records, true, StreamStatus::Prepping).await;
        let tenant = records.get_tenant("t-1").await.unwrap().unwrap();

        supervisor.activate(&tenant).await.unwrap();
        assert!(supervisor.monitor_exists("t-1").await);
        assert!(supervisor.chat_exists("t-1").await);
        assert_eq!(supervisor.monitors.read().await.len(), 1);

        // A second prep still leaves exactly one session.
        supervisor.activate(&tenant).await.unwrap();
        assert_eq!(supervisor.monitors.read().await.len(), 1);

        supervisor.deactivate("t-1").await;
        assert!(!supervisor.monitor_exists("t-1").await);
        assert!(!supervisor.chat_exists("t-1").await);
    }

    #[tokio::test]
    async fn auth_revoked_notice_tears_down_and_tells_the_room() {
        let (supervisor, records, rooms) = fixture().await;
        seed_tenant(&records, true, StreamStatus::Prepping).await;
        supervisor.start_monitor("t-1").await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        rooms.join("t-1", uuid::Uuid::new_v4(), tx, None).await;

        supervisor
            .notices
            .send(SessionNotice::AuthRevoked {
                tenant_id: "t-1".to_owned(),
            })
            .unwrap();

        // The notice loop runs async; wait for the room event.
        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("authRevoked should reach the room")
            .unwrap();
        assert_eq!(msg, ServerMessage::AuthRevoked {});
        assert!(!supervisor.monitor_exists("t-1").await);
    }
}
