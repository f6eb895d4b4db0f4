//! Upstream event session: one WebSocket to the event bus per active
//! tenant, carrying the typed subscription catalog.
//!
//! # Protocol
//! 1. Connect to the event-bus URL
//! 2. Receive `session_welcome` — extract `session.id`
//! 3. Create the subscription catalog bound to that session id
//! 4. Handle `keepalive` / `notification` / `session_reconnect` /
//!    `revocation` frames until the socket dies or shutdown is requested
//!
//! A `session_reconnect` frame swaps the transport: the replacement URL is
//! already welcomed server-side, so the new socket's welcome is awaited and
//! the old socket closed without re-creating subscriptions. A fresh connect
//! (including the forced reconnect on `prep`) always re-creates them.

use crate::config::UpstreamConfig;
use crate::error::CoreError;
use crate::eventsub::subscribe;
use crate::rooms::Rooms;
use crate::token_broker::TokenBroker;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use ov_protocol::{
    BusFrame, BusNotification, BusSessionPayload, BusSubscription, EventPayload, Features,
    ServerMessage, StreamEvent, frame_types,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// ---------------------------------------------------------------------------
// Shared session status
// ---------------------------------------------------------------------------

/// Live view of a session, shared with the supervisor and the monitor
/// status endpoint.
#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    pub connected: bool,
    pub session_id: Option<String>,
    pub subscriptions: Vec<BusSubscription>,
    pub last_connected: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct SessionStatus {
    inner: tokio::sync::RwLock<StatusSnapshot>,
}

impl SessionStatus {
    pub async fn snapshot(&self) -> StatusSnapshot {
        self.inner.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.read().await.connected
    }

    async fn set_connected(&self, session_id: String, subscriptions: Vec<BusSubscription>) {
        let mut inner = self.inner.write().await;
        inner.connected = true;
        inner.session_id = Some(session_id);
        inner.subscriptions = subscriptions;
        inner.last_connected = Some(Utc::now());
    }

    async fn set_session_id(&self, session_id: String) {
        self.inner.write().await.session_id = Some(session_id);
    }

    async fn set_disconnected(&self) {
        let mut inner = self.inner.write().await;
        inner.connected = false;
        inner.session_id = None;
    }

    async fn revoke_subscription(&self, subscription_id: &str) {
        self.inner
            .write()
            .await
            .subscriptions
            .retain(|s| s.id != subscription_id);
    }
}

// ---------------------------------------------------------------------------
// Session handle
// ---------------------------------------------------------------------------

/// Raised to the supervisor when a session dies for a non-retryable reason.
#[derive(Debug)]
pub enum SessionNotice {
    AuthRevoked { tenant_id: String },
}

/// Everything a session task needs; owned per tenant by the supervisor.
pub struct EventSessionContext {
    pub tenant_id: String,
    pub features: Features,
    pub cfg: UpstreamConfig,
    pub broker: Arc<TokenBroker>,
    pub events: mpsc::Sender<StreamEvent>,
    pub rooms: Arc<Rooms>,
    pub notices: mpsc::UnboundedSender<SessionNotice>,
}

/// A running upstream event session. Stopping closes the socket cleanly.
pub struct EventSession {
    status: Arc<SessionStatus>,
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl EventSession {
    pub fn spawn(ctx: EventSessionContext) -> Self {
        let status = Arc::new(SessionStatus::default());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(ctx, status.clone(), shutdown_rx));
        EventSession {
            status,
            shutdown,
            task,
        }
    }

    pub fn status(&self) -> Arc<SessionStatus> {
        self.status.clone()
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

// ---------------------------------------------------------------------------
// Connection loop
// ---------------------------------------------------------------------------

enum ConnEnd {
    Shutdown,
    AuthRevoked,
    /// Transient failure; reconnect with backoff. Carries whether any
    /// notification was processed (which resets the backoff).
    Retry { processed_any: bool },
}

async fn run(ctx: EventSessionContext, status: Arc<SessionStatus>, mut shutdown: watch::Receiver<bool>) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        if *shutdown.borrow() {
            break;
        }
        let end = run_connection(&ctx, &status, &mut shutdown).await;
        let was_connected = status.is_connected().await;
        status.set_disconnected().await;
        match end {
            ConnEnd::Shutdown => break,
            ConnEnd::AuthRevoked => {
                warn!(tenant_id = %ctx.tenant_id, "upstream session terminated: auth revoked");
                let _ = ctx.notices.send(SessionNotice::AuthRevoked {
                    tenant_id: ctx.tenant_id.clone(),
                });
                break;
            }
            ConnEnd::Retry { processed_any } => {
                if was_connected {
                    ctx.rooms
                        .broadcast(
                            &ctx.tenant_id,
                            &ServerMessage::EventSubStatusChanged { connected: false },
                        )
                        .await;
                }
                if processed_any {
                    backoff = INITIAL_BACKOFF;
                }
                debug!(tenant_id = %ctx.tenant_id, backoff_secs = backoff.as_secs(), "reconnecting");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.changed() => break,
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
    status.set_disconnected().await;
}

async fn run_connection(
    ctx: &EventSessionContext,
    status: &SessionStatus,
    shutdown: &mut watch::Receiver<bool>,
) -> ConnEnd {
    use tokio_tungstenite::connect_async;

    let window = ctx.cfg.keepalive_timeout;
    let mut processed_any = false;

    let mut ws = match connect_async(ctx.cfg.eventsub_ws_url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            debug!(tenant_id = %ctx.tenant_id, error = %e, "event-bus connect failed");
            return ConnEnd::Retry { processed_any };
        }
    };

    let session = match await_welcome(&mut ws, window).await {
        Some(session) => session,
        None => return ConnEnd::Retry { processed_any },
    };
    let mut session_id = session.id;

    // Subscriptions are created once per fresh welcome, never on
    // reconnect-frame swaps.
    let subscriptions = match subscribe::create_all(
        &reqwest::Client::new(),
        &ctx.cfg,
        &ctx.broker,
        &ctx.tenant_id,
        &session_id,
        &ctx.features,
    )
    .await
    {
        Ok(subs) => subs,
        Err(CoreError::AuthRevoked | CoreError::NoCredentials) => return ConnEnd::AuthRevoked,
        Err(e) => {
            warn!(tenant_id = %ctx.tenant_id, error = %e, "subscription creation failed");
            return ConnEnd::Retry { processed_any };
        }
    };

    status
        .set_connected(session_id.clone(), subscriptions)
        .await;
    ctx.rooms
        .broadcast(
            &ctx.tenant_id,
            &ServerMessage::EventSubStatusChanged { connected: true },
        )
        .await;
    info!(tenant_id = %ctx.tenant_id, session_id = %session_id, "upstream event session running");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = ws.close(None).await;
                return ConnEnd::Shutdown;
            }
            frame = tokio::time::timeout(window, ws.next()) => {
                let message = match frame {
                    Err(_elapsed) => {
                        warn!(tenant_id = %ctx.tenant_id, "keepalive window exceeded, treating connection as dead");
                        return ConnEnd::Retry { processed_any };
                    }
                    Ok(None) | Ok(Some(Err(_))) => return ConnEnd::Retry { processed_any },
                    Ok(Some(Ok(message))) => message,
                };
                match message {
                    Message::Text(text) => {
                        let BusFrame { metadata, payload } = match serde_json::from_str(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                debug!(tenant_id = %ctx.tenant_id, error = %e, "unparseable frame ignored");
                                continue;
                            }
                        };
                        match metadata.message_type.as_str() {
                            frame_types::KEEPALIVE => {}
                            frame_types::NOTIFICATION => {
                                match serde_json::from_value::<BusNotification>(payload) {
                                    Ok(notification) => {
                                        if let Some(payload) = normalize(
                                            &notification.subscription.sub_type,
                                            &notification.event,
                                        ) {
                                            let event = StreamEvent::new(ctx.tenant_id.clone(), payload);
                                            if ctx.events.send(event).await.is_err() {
                                                // Dispatcher gone: the broker is shutting down.
                                                return ConnEnd::Shutdown;
                                            }
                                            processed_any = true;
                                        } else {
                                            debug!(
                                                tenant_id = %ctx.tenant_id,
                                                sub_type = %notification.subscription.sub_type,
                                                "notification for unknown subscription type ignored"
                                            );
                                        }
                                    }
                                    Err(e) => {
                                        debug!(tenant_id = %ctx.tenant_id, error = %e, "malformed notification ignored");
                                    }
                                }
                            }
                            frame_types::RECONNECT => {
                                let reconnect_url = serde_json::from_value::<BusSessionPayload>(payload)
                                    .ok()
                                    .and_then(|p| p.session.reconnect_url);
                                let Some(url) = reconnect_url else {
                                    warn!(tenant_id = %ctx.tenant_id, "reconnect frame without URL");
                                    return ConnEnd::Retry { processed_any };
                                };
                                // Transparent transport swap: welcome the
                                // replacement before dropping the old socket.
                                match connect_async(url.as_str()).await {
                                    Ok((mut new_ws, _)) => match await_welcome(&mut new_ws, window).await {
                                        Some(session) => {
                                            let _ = ws.close(None).await;
                                            ws = new_ws;
                                            session_id = session.id;
                                            status.set_session_id(session_id.clone()).await;
                                            info!(tenant_id = %ctx.tenant_id, session_id = %session_id, "session swapped via reconnect frame");
                                        }
                                        None => return ConnEnd::Retry { processed_any },
                                    },
                                    Err(e) => {
                                        warn!(tenant_id = %ctx.tenant_id, error = %e, "reconnect-frame swap failed");
                                        return ConnEnd::Retry { processed_any };
                                    }
                                }
                            }
                            frame_types::REVOCATION => {
                                if let Ok(revocation) =
                                    serde_json::from_value::<ov_protocol::BusRevocation>(payload)
                                {
                                    warn!(
                                        tenant_id = %ctx.tenant_id,
                                        subscription_id = %revocation.subscription.id,
                                        sub_type = %revocation.subscription.sub_type,
                                        "subscription revoked, not retrying it"
                                    );
                                    status.revoke_subscription(&revocation.subscription.id).await;
                                }
                            }
                            other => {
                                debug!(tenant_id = %ctx.tenant_id, frame_type = other, "unknown frame type ignored");
                            }
                        }
                    }
                    Message::Ping(data) => {
                        let _ = ws.send(Message::Pong(data)).await;
                    }
                    Message::Close(_) => return ConnEnd::Retry { processed_any },
                    _ => {}
                }
            }
        }
    }
}

/// Read frames until the welcome arrives; anything else pre-welcome is
/// ignored. `None` on timeout, socket error, or close.
async fn await_welcome(ws: &mut WsStream, window: Duration) -> Option<ov_protocol::BusSession> {
    loop {
        let frame = tokio::time::timeout(window, ws.next()).await.ok()??;
        let message = frame.ok()?;
        match message {
            Message::Text(text) => {
                let frame: BusFrame = serde_json::from_str(&text).ok()?;
                if frame.metadata.message_type == frame_types::WELCOME {
                    let payload: BusSessionPayload = serde_json::from_value(frame.payload).ok()?;
                    return Some(payload.session);
                }
            }
            Message::Close(_) => return None,
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Notification normalization
// ---------------------------------------------------------------------------

fn str_field(event: &Value, key: &str) -> String {
    event
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

fn u64_field(event: &Value, key: &str) -> u64 {
    event.get(key).and_then(Value::as_u64).unwrap_or(0)
}

/// Map a raw notification event to the internal catalog. Unknown
/// subscription types return `None` and are ignored upstream.
pub(crate) fn normalize(sub_type: &str, event: &Value) -> Option<EventPayload> {
    let payload = match sub_type {
        "stream.online" => EventPayload::StreamOnline {
            stream_id: str_field(event, "id"),
            started_at: event
                .get("started_at")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok()),
        },
        "stream.offline" => EventPayload::StreamOffline {},
        "channel.follow" => EventPayload::Follow {
            username: str_field(event, "user_name"),
        },
        "channel.subscribe" => EventPayload::Subscribe {
            username: str_field(event, "user_name"),
            tier: str_field(event, "tier"),
            is_gift: event.get("is_gift").and_then(Value::as_bool).unwrap_or(false),
        },
        "channel.subscription.gift" => EventPayload::SubscribeGift {
            gifter: str_field(event, "user_name"),
            total: u64_field(event, "total"),
            tier: str_field(event, "tier"),
        },
        "channel.subscription.message" => EventPayload::SubscribeMessage {
            username: str_field(event, "user_name"),
            months: u64_field(event, "cumulative_months"),
            tier: str_field(event, "tier"),
            message: event
                .get("message")
                .and_then(|m| m.get("text"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        },
        "channel.cheer" => EventPayload::Cheer {
            // Anonymous cheers carry a null user.
            username: event
                .get("user_name")
                .and_then(Value::as_str)
                .unwrap_or("anonymous")
                .to_owned(),
            bits: u64_field(event, "bits"),
            message: str_field(event, "message"),
        },
        "channel.raid" => EventPayload::Raid {
            raider: str_field(event, "from_broadcaster_user_name"),
            viewers: u64_field(event, "viewers"),
        },
        "channel.channel_points_custom_reward_redemption.add" => EventPayload::RewardRedeemed {
            username: str_field(event, "user_name"),
            reward_id: event
                .get("reward")
                .map(|r| str_field(r, "id"))
                .unwrap_or_default(),
            reward_title: event
                .get("reward")
                .map(|r| str_field(r, "title"))
                .unwrap_or_default(),
            cost: event.get("reward").map(|r| u64_field(r, "cost")).unwrap_or(0),
            user_input: str_field(event, "user_input"),
        },
        _ => return None,
    };
    Some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stream_online_maps_id_to_the_suppression_key() {
        let event = json!({ "id": "S1", "started_at": "2025-06-01T18:00:00Z" });
        match normalize("stream.online", &event) {
            Some(EventPayload::StreamOnline { stream_id, started_at }) => {
                assert_eq!(stream_id, "S1");
                assert!(started_at.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn resub_reads_the_nested_message_text() {
        let event = json!({
            "user_name": "fan",
            "cumulative_months": 12,
            "tier": "2000",
            "message": { "text": "a whole year!" }
        });
        match normalize("channel.subscription.message", &event) {
            Some(EventPayload::SubscribeMessage { username, months, tier, message }) => {
                assert_eq!(username, "fan");
                assert_eq!(months, 12);
                assert_eq!(tier, "2000");
                assert_eq!(message, "a whole year!");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn anonymous_cheer_gets_a_placeholder_name() {
        let event = json!({ "user_name": null, "bits": 100, "message": "" });
        match normalize("channel.cheer", &event) {
            Some(EventPayload::Cheer { username, bits, .. }) => {
                assert_eq!(username, "anonymous");
                assert_eq!(bits, 100);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reward_redemption_flattens_the_reward_object() {
        let event = json!({
            "user_name": "fan",
            "user_input": "for the counter",
            "reward": { "id": "r-1", "title": "Add a Death", "cost": 100 }
        });
        match normalize("channel.channel_points_custom_reward_redemption.add", &event) {
            Some(EventPayload::RewardRedeemed { reward_id, reward_title, cost, .. }) => {
                assert_eq!(reward_id, "r-1");
                assert_eq!(reward_title, "Add a Death");
                assert_eq!(cost, 100);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_subscription_types_are_ignored() {
        assert!(normalize("channel.goal.begin", &json!({})).is_none());
    }
}
