//! Subscriber WebSocket endpoint: dashboards, overlays, and mobile clients.
//!
//! Authenticated subscribers (bearer token in the `token` query parameter
//! or Authorization header) are auto-joined to their own tenant's room and
//! may mutate their own counters. Anyone may `joinRoom` any tenant for a
//! read-only feed — that is how overlay browser sources work without
//! shared credentials.

use crate::auth::{extract_bearer, verify_token};
use crate::dispatcher::CounterOp;
use crate::error::CoreError;
use crate::rooms::SubscriberId;
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use ov_protocol::{ClientMessage, CounterKind, ServerMessage, StreamStatus};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Deserialize)]
pub struct WsQuery {
    /// Browsers cannot set headers on WebSocket upgrades, so the bearer
    /// token also rides in the query string.
    token: Option<String>,
}

pub async fn ws_subscriber_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::extract::Query(query): axum::extract::Query<WsQuery>,
) -> impl IntoResponse {
    if !origin_allowed(&state, &headers) {
        return StatusCode::FORBIDDEN.into_response();
    }

    let raw_token = query.token.or_else(|| {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(extract_bearer)
            .map(ToOwned::to_owned)
    });
    let auth_tenant =
        raw_token.and_then(|t| verify_token(&state.config.auth.signing_key, &t));

    ws.on_upgrade(move |socket| handle_socket(socket, state, auth_tenant))
        .into_response()
}

fn origin_allowed(state: &AppState, headers: &HeaderMap) -> bool {
    let allowed = &state.config.allowed_origins;
    if allowed.is_empty() {
        return true;
    }
    match headers.get("origin").and_then(|v| v.to_str().ok()) {
        // Non-browser clients send no Origin; the bearer check still gates
        // anything that mutates.
        None => true,
        Some(origin) => allowed.iter().any(|a| a == origin),
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState, auth_tenant: Option<String>) {
    let subscriber_id: SubscriberId = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    if let Some(tenant_id) = &auth_tenant {
        join_room(&state, tenant_id, subscriber_id, &tx, auth_tenant.clone()).await;
        info!(%subscriber_id, tenant_id, "authenticated subscriber connected");
    } else {
        debug!(%subscriber_id, "anonymous subscriber connected");
    }

    loop {
        tokio::select! {
            queued = rx.recv() => {
                // Room fan-out: per-subscriber FIFO.
                let Some(message) = queued else { break };
                match serde_json::to_string(&message) {
                    Ok(json) => {
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "unserializable server message dropped"),
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => {
                                handle_client_message(
                                    &state,
                                    subscriber_id,
                                    auth_tenant.as_deref(),
                                    &tx,
                                    message,
                                )
                                .await;
                            }
                            Err(e) => {
                                let _ = tx.send(ServerMessage::Error {
                                    error: format!("unrecognized message: {e}"),
                                });
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = socket.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(%subscriber_id, error = %e, "subscriber socket error");
                        break;
                    }
                }
            }
        }
    }

    state.rooms.leave_all(subscriber_id).await;
    debug!(%subscriber_id, "subscriber disconnected");
}

async fn handle_client_message(
    state: &AppState,
    subscriber_id: SubscriberId,
    auth_tenant: Option<&str>,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    message: ClientMessage,
) {
    match message {
        ClientMessage::Ping {} => {
            let _ = tx.send(ServerMessage::Pong {});
        }
        ClientMessage::JoinRoom { tenant_id } => {
            join_room(
                state,
                &tenant_id,
                subscriber_id,
                tx,
                auth_tenant.map(ToOwned::to_owned),
            )
            .await;
        }
        ClientMessage::GetStreamStatus { tenant_id } => {
            match state.lifecycle.status(&tenant_id).await {
                Ok(status) => {
                    let _ = tx.send(ServerMessage::StreamStatusChanged { status });
                }
                Err(e) => {
                    let _ = tx.send(ServerMessage::Error { error: e.to_string() });
                }
            }
        }
        ClientMessage::StreamModeHeartbeat {} => {
            let active = match auth_tenant {
                Some(tenant_id) => state.supervisor.monitor_connected(tenant_id).await,
                None => false,
            };
            let _ = tx.send(ServerMessage::StreamModeStatus { active });
        }
        ClientMessage::ConnectTwitch {} => {
            let Some(tenant_id) = auth_tenant else {
                let _ = tx.send(unauthorized());
                return;
            };
            // Accepted now; the real state arrives asynchronously through
            // eventSubStatusChanged.
            if let Err(e) = state.supervisor.start_monitor(tenant_id).await {
                let _ = tx.send(ServerMessage::Error { error: e.to_string() });
            }
        }
        ClientMessage::OverlaySettingsUpdate { settings } => {
            let Some(tenant_id) = auth_tenant else {
                let _ = tx.send(unauthorized());
                return;
            };
            // Opaque to the broker; relayed to the tenant's overlays.
            state
                .rooms
                .broadcast(tenant_id, &ServerMessage::OverlaySettingsUpdate { settings })
                .await;
        }
        ClientMessage::IncrementDeaths {} => {
            mutate(state, auth_tenant, tx, CounterOp::Increment(CounterKind::Deaths)).await;
        }
        ClientMessage::DecrementDeaths {} => {
            mutate(state, auth_tenant, tx, CounterOp::Decrement(CounterKind::Deaths)).await;
        }
        ClientMessage::IncrementSwears {} => {
            mutate(state, auth_tenant, tx, CounterOp::Increment(CounterKind::Swears)).await;
        }
        ClientMessage::DecrementSwears {} => {
            mutate(state, auth_tenant, tx, CounterOp::Decrement(CounterKind::Swears)).await;
        }
        ClientMessage::ResetCounters {} => {
            mutate(state, auth_tenant, tx, CounterOp::Reset).await;
        }
    }
}

fn unauthorized() -> ServerMessage {
    ServerMessage::Error {
        error: CoreError::Unauthorized.to_string(),
    }
}

/// Counter mutations from the socket apply to the subscriber's own tenant;
/// anonymous members are read-only.
async fn mutate(
    state: &AppState,
    auth_tenant: Option<&str>,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    op: CounterOp,
) {
    let Some(tenant_id) = auth_tenant else {
        let _ = tx.send(unauthorized());
        return;
    };
    if let Err(e) = state.dispatcher.apply_counter(tenant_id, op, "dashboard").await {
        let _ = tx.send(ServerMessage::Error { error: e.to_string() });
    }
}

/// Membership plus the initial state snapshot, with the stale-live
/// cross-check: a tenant reported live without an upstream session (e.g.
/// after a broker restart) is corrected back to offline before anything is
/// displayed.
async fn join_room(
    state: &AppState,
    tenant_id: &str,
    subscriber_id: SubscriberId,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    auth_tenant: Option<String>,
) {
    let tenant = match state.records.get_tenant(tenant_id).await {
        Ok(Some(tenant)) => tenant,
        Ok(None) => {
            let _ = tx.send(ServerMessage::Error {
                error: format!("unknown tenant {tenant_id}"),
            });
            return;
        }
        Err(e) => {
            let _ = tx.send(ServerMessage::Error { error: e.to_string() });
            return;
        }
    };

    state
        .rooms
        .join(tenant_id, subscriber_id, tx.clone(), auth_tenant)
        .await;

    let mut status = tenant.stream_status;
    if status == StreamStatus::Live && !state.supervisor.monitor_exists(tenant_id).await {
        warn!(tenant_id, "stale live status detected on join, downgrading to offline");
        let mut corrected = tenant.clone();
        corrected.stream_status = StreamStatus::Offline;
        if let Err(e) = state.records.put_tenant(&corrected).await {
            warn!(tenant_id, error = %e, "failed to persist status downgrade");
        }
        status = StreamStatus::Offline;
        state
            .rooms
            .broadcast(tenant_id, &ServerMessage::StreamStatusChanged { status })
            .await;
    }

    let counters = match state.engine.get(tenant_id).await {
        Ok(record) => record.snapshot(),
        Err(e) => {
            let _ = tx.send(ServerMessage::Error { error: e.to_string() });
            return;
        }
    };
    let _ = tx.send(ServerMessage::RoomJoined {
        tenant_id: tenant_id.to_owned(),
        counters,
        status,
        features: tenant.features,
    });
}
