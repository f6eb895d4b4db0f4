//! Lifecycle, monitor and chat-bot control endpoints.
//!
//! Monitor/bot control is accept-then-report: a 200 means the request was
//! accepted; the actual session state arrives asynchronously through
//! `eventSubStatusChanged` / `twitchBotStatusChanged`.

use crate::error::CoreError;
use crate::http::{AuthedTenant, TargetQuery, resolve_target};
use crate::lifecycle::LifecycleAction;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Query, State};
use chrono::{DateTime, Utc};
use ov_protocol::StreamStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: StreamStatus,
}

async fn apply(
    state: &AppState,
    actor: ov_store::TenantRecord,
    target: Option<String>,
    action: LifecycleAction,
) -> Result<Json<StatusResponse>, CoreError> {
    let tenant_id = resolve_target(state, &actor, target).await?;
    let status = state.lifecycle.transition(&tenant_id, action).await?;
    Ok(Json(StatusResponse { status }))
}

pub async fn prep(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
    Query(target): Query<TargetQuery>,
) -> Result<Json<StatusResponse>, CoreError> {
    apply(&state, actor, target.tenant, LifecycleAction::Prep).await
}

pub async fn go_live(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
    Query(target): Query<TargetQuery>,
) -> Result<Json<StatusResponse>, CoreError> {
    apply(&state, actor, target.tenant, LifecycleAction::GoLive).await
}

pub async fn end_stream(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
    Query(target): Query<TargetQuery>,
) -> Result<Json<StatusResponse>, CoreError> {
    apply(&state, actor, target.tenant, LifecycleAction::EndStream).await
}

pub async fn cancel_prep(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
    Query(target): Query<TargetQuery>,
) -> Result<Json<StatusResponse>, CoreError> {
    apply(&state, actor, target.tenant, LifecycleAction::CancelPrep).await
}

pub async fn stream_status(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
    Query(target): Query<TargetQuery>,
) -> Result<Json<StatusResponse>, CoreError> {
    let tenant_id = resolve_target(&state, &actor, target.tenant).await?;
    let status = state.lifecycle.status(&tenant_id).await?;
    Ok(Json(StatusResponse { status }))
}

// ---------------------------------------------------------------------------
// Upstream session (monitor) control
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatusResponse {
    pub connected: bool,
    pub subscriptions: Vec<String>,
    pub last_connected: Option<DateTime<Utc>>,
}

async fn monitor_status_response(state: &AppState, tenant_id: &str) -> MonitorStatusResponse {
    match state.supervisor.monitor_status(tenant_id).await {
        Some(snapshot) => MonitorStatusResponse {
            connected: snapshot.connected,
            subscriptions: snapshot.subscriptions.into_iter().map(|s| s.sub_type).collect(),
            last_connected: snapshot.last_connected,
        },
        None => MonitorStatusResponse {
            connected: false,
            subscriptions: Vec::new(),
            last_connected: None,
        },
    }
}

pub async fn monitor_start(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
) -> Result<Json<MonitorStatusResponse>, CoreError> {
    state.supervisor.start_monitor(&actor.tenant_id).await?;
    Ok(Json(monitor_status_response(&state, &actor.tenant_id).await))
}

pub async fn monitor_stop(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
) -> Result<Json<MonitorStatusResponse>, CoreError> {
    state.supervisor.stop_monitor(&actor.tenant_id).await;
    Ok(Json(monitor_status_response(&state, &actor.tenant_id).await))
}

pub async fn monitor_reconnect(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
) -> Result<Json<MonitorStatusResponse>, CoreError> {
    state.supervisor.reconnect_monitor(&actor.tenant_id).await?;
    Ok(Json(monitor_status_response(&state, &actor.tenant_id).await))
}

pub async fn monitor_status(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
) -> Result<Json<MonitorStatusResponse>, CoreError> {
    Ok(Json(monitor_status_response(&state, &actor.tenant_id).await))
}

// ---------------------------------------------------------------------------
// Chat bot control
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct BotToggleBody {
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct BotStatusResponse {
    pub connected: bool,
    pub running: bool,
}

async fn bot_status_response(state: &AppState, tenant_id: &str) -> BotStatusResponse {
    BotStatusResponse {
        connected: state.supervisor.chat_connected(tenant_id).await,
        running: state.supervisor.chat_exists(tenant_id).await,
    }
}

pub async fn bot_toggle(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
    Json(body): Json<BotToggleBody>,
) -> Result<Json<BotStatusResponse>, CoreError> {
    match body.action.as_str() {
        "start" => state.supervisor.start_chat(&actor.tenant_id).await?,
        "stop" => state.supervisor.stop_chat(&actor.tenant_id).await,
        other => {
            return Err(CoreError::InvalidInput(format!(
                "unknown bot action {other}"
            )));
        }
    }
    Ok(Json(bot_status_response(&state, &actor.tenant_id).await))
}

pub async fn bot_status(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
) -> Result<Json<BotStatusResponse>, CoreError> {
    Ok(Json(bot_status_response(&state, &actor.tenant_id).await))
}
