//! Alert definition and event mapping endpoints.
//!
//! Built-in templates are read-only: editing or deleting one is a
//! conflict. Custom alerts carry generated ids and validate their display
//! duration against the allowed range.

use crate::error::CoreError;
use crate::http::AuthedTenant;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use ov_protocol::{
    AlertDefinition, AlertEffects, AlertType, DURATION_MS_MAX, DURATION_MS_MIN, EVENT_NAMES,
    EventMapping, MAPPING_NONE,
};
use ov_store::defaults::{default_alert, default_alerts, default_event_mapping};
use serde::Deserialize;
use uuid::Uuid;

fn parse_alert_type(raw: &str) -> Result<AlertType, CoreError> {
    serde_json::from_value(serde_json::Value::String(raw.to_owned()))
        .map_err(|_| CoreError::InvalidInput(format!("unknown alert type {raw}")))
}

fn validate_duration(duration_ms: u32) -> Result<(), CoreError> {
    if !(DURATION_MS_MIN..=DURATION_MS_MAX).contains(&duration_ms) {
        return Err(CoreError::InvalidInput(format!(
            "durationMs must be between {DURATION_MS_MIN} and {DURATION_MS_MAX}"
        )));
    }
    Ok(())
}

pub async fn list_alerts(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
) -> Result<Json<Vec<AlertDefinition>>, CoreError> {
    let mut alerts = default_alerts();
    alerts.extend(state.records.list_alerts(&actor.tenant_id).await?);
    Ok(Json(alerts))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertBody {
    #[serde(rename = "type")]
    pub alert_type: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub text_template: String,
    pub duration_ms: u32,
    pub background_color: String,
    pub text_color: String,
    pub border_color: String,
    #[serde(default)]
    pub effects: AlertEffects,
}

fn default_enabled() -> bool {
    true
}

pub async fn create_alert(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
    Json(body): Json<AlertBody>,
) -> Result<Json<AlertDefinition>, CoreError> {
    let alert_type = parse_alert_type(&body.alert_type)?;
    validate_duration(body.duration_ms)?;

    let alert = AlertDefinition {
        alert_id: Uuid::new_v4().to_string(),
        alert_type,
        name: body.name,
        enabled: body.enabled,
        text_template: body.text_template,
        duration_ms: body.duration_ms,
        background_color: body.background_color,
        text_color: body.text_color,
        border_color: body.border_color,
        effects: body.effects,
        is_default: false,
    };
    state.records.put_alert(&actor.tenant_id, &alert).await?;
    Ok(Json(alert))
}

pub async fn update_alert(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
    Path(alert_id): Path<String>,
    Json(body): Json<AlertBody>,
) -> Result<Json<AlertDefinition>, CoreError> {
    if default_alert(&alert_id).is_some() {
        return Err(CoreError::Conflict(
            "default alerts are read-only".to_owned(),
        ));
    }
    let existing = state
        .records
        .get_alert(&actor.tenant_id, &alert_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("alert {alert_id}")))?;

    let alert_type = parse_alert_type(&body.alert_type)?;
    validate_duration(body.duration_ms)?;

    let alert = AlertDefinition {
        alert_id: existing.alert_id,
        alert_type,
        name: body.name,
        enabled: body.enabled,
        text_template: body.text_template,
        duration_ms: body.duration_ms,
        background_color: body.background_color,
        text_color: body.text_color,
        border_color: body.border_color,
        effects: body.effects,
        is_default: false,
    };
    state.records.put_alert(&actor.tenant_id, &alert).await?;
    Ok(Json(alert))
}

pub async fn delete_alert(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
    Path(alert_id): Path<String>,
) -> Result<StatusCode, CoreError> {
    if default_alert(&alert_id).is_some() {
        return Err(CoreError::Conflict(
            "default alerts are read-only".to_owned(),
        ));
    }
    if state.records.delete_alert(&actor.tenant_id, &alert_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(CoreError::NotFound(format!("alert {alert_id}")))
    }
}

// ---------------------------------------------------------------------------
// Event mappings
// ---------------------------------------------------------------------------

pub async fn get_mappings(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
) -> Result<Json<EventMapping>, CoreError> {
    let mapping = state
        .records
        .get_event_mapping(&actor.tenant_id)
        .await?
        .unwrap_or_else(default_event_mapping);
    Ok(Json(mapping))
}

pub async fn put_mappings(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
    Json(mapping): Json<EventMapping>,
) -> Result<Json<EventMapping>, CoreError> {
    for (event_name, alert_id) in &mapping.mappings {
        if !EVENT_NAMES.contains(&event_name.as_str()) {
            return Err(CoreError::InvalidInput(format!(
                "unknown event name {event_name}"
            )));
        }
        if alert_id == MAPPING_NONE || default_alert(alert_id).is_some() {
            continue;
        }
        if state
            .records
            .get_alert(&actor.tenant_id, alert_id)
            .await?
            .is_none()
        {
            return Err(CoreError::InvalidInput(format!(
                "mapping for {event_name} points at unknown alert {alert_id}"
            )));
        }
    }
    state
        .records
        .put_event_mapping(&actor.tenant_id, &mapping)
        .await?;
    Ok(Json(mapping))
}
