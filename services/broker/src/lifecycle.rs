//! Lifecycle controller: owner of the per-tenant stream status machine.
//!
//! Transitions are driven only by the tenant (or a managing mod); upstream
//! stream-online/offline events never change the status, and monitoring
//! stays active across the real live-to-offline moment until the tenant
//! ends the session.

use crate::counters::CounterEngine;
use crate::error::CoreError;
use crate::rooms::Rooms;
use crate::supervisor::Supervisor;
use ov_protocol::{ServerMessage, StreamStatus};
use ov_store::Records;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Prep,
    GoLive,
    EndStream,
    CancelPrep,
}

impl LifecycleAction {
    fn as_str(self) -> &'static str {
        match self {
            LifecycleAction::Prep => "prep",
            LifecycleAction::GoLive => "go-live",
            LifecycleAction::EndStream => "end-stream",
            LifecycleAction::CancelPrep => "cancel-prep",
        }
    }
}

pub struct LifecycleController {
    records: Records,
    engine: Arc<CounterEngine>,
    supervisor: Arc<Supervisor>,
    rooms: Arc<Rooms>,
}

impl LifecycleController {
    pub fn new(
        records: Records,
        engine: Arc<CounterEngine>,
        supervisor: Arc<Supervisor>,
        rooms: Arc<Rooms>,
    ) -> Self {
        LifecycleController {
            records,
            engine,
            supervisor,
            rooms,
        }
    }

    pub async fn status(&self, tenant_id: &str) -> Result<StreamStatus, CoreError> {
        let tenant = self
            .records
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("tenant {tenant_id}")))?;
        Ok(tenant.stream_status)
    }

    /// Apply one lifecycle action. Every successful transition broadcasts
    /// `streamStatusChanged` to the tenant's room.
    pub async fn transition(
        &self,
        tenant_id: &str,
        action: LifecycleAction,
    ) -> Result<StreamStatus, CoreError> {
        let mut tenant = self
            .records
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("tenant {tenant_id}")))?;
        let from = tenant.stream_status;

        let to = match (from, action) {
            (StreamStatus::Offline, LifecycleAction::Prep) => StreamStatus::Prepping,
            (StreamStatus::Prepping, LifecycleAction::GoLive) => StreamStatus::Live,
            (StreamStatus::Live | StreamStatus::Prepping, LifecycleAction::EndStream) => {
                StreamStatus::Offline
            }
            (StreamStatus::Prepping, LifecycleAction::CancelPrep) => StreamStatus::Offline,
            _ => {
                return Err(CoreError::InvalidTransition(format!(
                    "{} not allowed from {}",
                    action.as_str(),
                    from.as_str()
                )));
            }
        };

        tenant.stream_status = to;
        self.records.put_tenant(&tenant).await?;

        match action {
            LifecycleAction::Prep => {
                // Unconditionally fresh upstream session: every prep gets a
                // new socket and re-created subscriptions, recovering from
                // silent failures.
                if let Err(e) = self.supervisor.activate(&tenant).await {
                    self.supervisor.deactivate(tenant_id).await;
                    tenant.stream_status = from;
                    self.records.put_tenant(&tenant).await?;
                    return Err(e);
                }
            }
            LifecycleAction::GoLive => {
                self.engine.start_stream(tenant_id).await?;
                self.rooms
                    .broadcast(tenant_id, &ServerMessage::StreamStarted {})
                    .await;
            }
            LifecycleAction::EndStream => {
                if from == StreamStatus::Live {
                    self.engine.end_stream(tenant_id).await?;
                    self.rooms
                        .broadcast(tenant_id, &ServerMessage::StreamEnded {})
                        .await;
                }
                self.supervisor.deactivate(tenant_id).await;
            }
            LifecycleAction::CancelPrep => {
                self.supervisor.deactivate(tenant_id).await;
            }
        }

        self.rooms
            .broadcast(tenant_id, &ServerMessage::StreamStatusChanged { status: to })
            .await;
        info!(
            tenant_id,
            from = from.as_str(),
            to = to.as_str(),
            action = action.as_str(),
            "lifecycle transition"
        );
        Ok(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatOutbox;
    use crate::config::{ChatConfig, UpstreamConfig};
    use crate::dispatcher::{Dispatcher, event_channel};
    use crate::token_broker::TokenBroker;
    use chrono::Utc;
    use ov_store::{CredentialTuple, MemoryStore, TenantRecord};
    use std::time::Duration;

    struct Fixture {
        lifecycle: LifecycleController,
        supervisor: Arc<Supervisor>,
        engine: Arc<CounterEngine>,
        records: Records,
        rooms: Arc<Rooms>,
    }

    async fn fixture() -> Fixture {
        let records = Records::new(Arc::new(MemoryStore::new()));
        let engine = Arc::new(CounterEngine::new(records.clone()));
        let rooms = Arc::new(Rooms::new());
        let outbox = Arc::new(ChatOutbox::new());
        let dispatcher = Arc::new(Dispatcher::new(
            records.clone(),
            engine.clone(),
            rooms.clone(),
            outbox.clone(),
        ));
        let upstream_cfg = UpstreamConfig {
            client_id: "cid".to_owned(),
            client_secret: "cs".to_owned(),
            eventsub_ws_url: "ws://127.0.0.1:9/ws".to_owned(),
            subscriptions_url: "http://127.0.0.1:9/subs".to_owned(),
            token_url: "http://127.0.0.1:9/token".to_owned(),
            keepalive_timeout: Duration::from_secs(60),
        };
        let broker = Arc::new(TokenBroker::new(records.clone(), upstream_cfg.clone()));
        let (events_tx, _events_rx) = event_channel();
        let supervisor = Supervisor::new(
            records.clone(),
            broker,
            dispatcher,
            rooms.clone(),
            outbox,
            events_tx,
            upstream_cfg,
            ChatConfig {
                ws_url: "ws://127.0.0.1:9/chat".to_owned(),
            },
        );
        let lifecycle = LifecycleController::new(
            records.clone(),
            engine.clone(),
            supervisor.clone(),
            rooms.clone(),
        );

        let mut tenant = TenantRecord::new("t-1", "streamer");
        tenant.credentials = Some(CredentialTuple {
            access_token: "a".to_owned(),
            refresh_token: "r".to_owned(),
            expires_at: Utc::now() + chrono::Duration::hours(4),
        });
        records.put_tenant(&tenant).await.unwrap();

        Fixture {
            lifecycle,
            supervisor,
            engine,
            records,
            rooms,
        }
    }

    #[tokio::test]
    async fn full_cycle_prep_golive_end() {
        let f = fixture().await;
        f.engine.add_bits("t-1", 100).await.unwrap();

        let status = f
            .lifecycle
            .transition("t-1", LifecycleAction::Prep)
            .await
            .unwrap();
        assert_eq!(status, StreamStatus::Prepping);
        assert!(f.supervisor.monitor_exists("t-1").await);

        let status = f
            .lifecycle
            .transition("t-1", LifecycleAction::GoLive)
            .await
            .unwrap();
        assert_eq!(status, StreamStatus::Live);
        let counters = f.engine.get("t-1").await.unwrap();
        assert_eq!(counters.bits, 0);
        assert!(counters.stream_started.is_some());

        let status = f
            .lifecycle
            .transition("t-1", LifecycleAction::EndStream)
            .await
            .unwrap();
        assert_eq!(status, StreamStatus::Offline);
        let counters = f.engine.get("t-1").await.unwrap();
        assert!(counters.stream_started.is_none());
        assert!(counters.last_notified_stream_id.is_none());
        assert!(!f.supervisor.monitor_exists("t-1").await);
    }

    #[tokio::test]
    async fn prep_cancel_prep_leaves_no_leaked_session() {
        let f = fixture().await;
        f.lifecycle
            .transition("t-1", LifecycleAction::Prep)
            .await
            .unwrap();
        f.lifecycle
            .transition("t-1", LifecycleAction::CancelPrep)
            .await
            .unwrap();
        assert!(!f.supervisor.monitor_exists("t-1").await);

        let status = f
            .lifecycle
            .transition("t-1", LifecycleAction::Prep)
            .await
            .unwrap();
        assert_eq!(status, StreamStatus::Prepping);
        assert!(f.supervisor.monitor_exists("t-1").await);
    }

    #[tokio::test]
    async fn illegal_transitions_are_rejected() {
        let f = fixture().await;
        for action in [
            LifecycleAction::GoLive,
            LifecycleAction::EndStream,
            LifecycleAction::CancelPrep,
        ] {
            match f.lifecycle.transition("t-1", action).await {
                Err(CoreError::InvalidTransition(_)) => {}
                other => panic!("expected InvalidTransition for {action:?}, got {other:?}"),
            }
        }

        f.lifecycle
            .transition("t-1", LifecycleAction::Prep)
            .await
            .unwrap();
        match f.lifecycle.transition("t-1", LifecycleAction::Prep).await {
            Err(CoreError::InvalidTransition(_)) => {}
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn end_stream_from_prepping_skips_the_counter_end() {
        let f = fixture().await;
        f.engine
            .set_last_notified_stream_id("t-1", Some("S1".to_owned()))
            .await
            .unwrap();
        f.lifecycle
            .transition("t-1", LifecycleAction::Prep)
            .await
            .unwrap();
        f.lifecycle
            .transition("t-1", LifecycleAction::EndStream)
            .await
            .unwrap();

        // Never went live, so the suppression cursor survives.
        let counters = f.engine.get("t-1").await.unwrap();
        assert_eq!(counters.last_notified_stream_id.as_deref(), Some("S1"));
    }

    #[tokio::test]
    async fn every_transition_broadcasts_status() {
        let f = fixture().await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        f.rooms.join("t-1", uuid::Uuid::new_v4(), tx, None).await;

        f.lifecycle
            .transition("t-1", LifecycleAction::Prep)
            .await
            .unwrap();
        let mut saw_status = false;
        while let Ok(msg) = rx.try_recv() {
            if matches!(
                msg,
                ServerMessage::StreamStatusChanged {
                    status: StreamStatus::Prepping
                }
            ) {
                saw_status = true;
            }
        }
        assert!(saw_status);
    }

    #[tokio::test]
    async fn prep_without_credentials_rolls_back() {
        let f = fixture().await;
        let mut tenant = f.records.get_tenant("t-1").await.unwrap().unwrap();
        tenant.credentials = None;
        f.records.put_tenant(&tenant).await.unwrap();

        match f.lifecycle.transition("t-1", LifecycleAction::Prep).await {
            Err(CoreError::NoCredentials) => {}
            other => panic!("expected NoCredentials, got {other:?}"),
        }
        assert_eq!(
            f.lifecycle.status("t-1").await.unwrap(),
            StreamStatus::Offline
        );
    }
}
