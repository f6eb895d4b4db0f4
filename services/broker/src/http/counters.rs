//! Counter endpoints.

use crate::dispatcher::CounterOp;
use crate::error::CoreError;
use crate::http::{AuthedTenant, TargetQuery, resolve_target};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use ov_protocol::{CounterChange, CounterKind, CounterSnapshot, MilestoneThresholds, SeriesSnapshot};
use serde::Serialize;

/// Post-state of a counter mutation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterResponse {
    pub counters: CounterSnapshot,
    pub change: CounterChange,
}

pub async fn get_counters(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
    Query(target): Query<TargetQuery>,
) -> Result<Json<CounterSnapshot>, CoreError> {
    let tenant_id = resolve_target(&state, &actor, target.tenant).await?;
    let record = state.engine.get(&tenant_id).await?;
    Ok(Json(record.snapshot()))
}

pub async fn mutate_counter(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
    Path((kind, action)): Path<(String, String)>,
    Query(target): Query<TargetQuery>,
) -> Result<Json<CounterResponse>, CoreError> {
    let tenant_id = resolve_target(&state, &actor, target.tenant).await?;
    let kind = CounterKind::parse(&kind)
        .ok_or_else(|| CoreError::InvalidInput(format!("unknown counter {kind}")))?;
    let op = match action.as_str() {
        "increment" => CounterOp::Increment(kind),
        "decrement" => CounterOp::Decrement(kind),
        other => {
            return Err(CoreError::InvalidInput(format!(
                "unknown counter action {other}"
            )));
        }
    };
    let outcome = state.dispatcher.apply_counter(&tenant_id, op, "api").await?;
    Ok(Json(CounterResponse {
        counters: outcome.record.snapshot(),
        change: outcome.change,
    }))
}

pub async fn reset_counters(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
    Query(target): Query<TargetQuery>,
) -> Result<Json<CounterResponse>, CoreError> {
    let tenant_id = resolve_target(&state, &actor, target.tenant).await?;
    let outcome = state
        .dispatcher
        .apply_counter(&tenant_id, CounterOp::Reset, "api")
        .await?;
    Ok(Json(CounterResponse {
        counters: outcome.record.snapshot(),
        change: outcome.change,
    }))
}

/// The persisted state worth carrying between installs: current counters
/// plus every series snapshot.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResponse {
    pub counters: CounterSnapshot,
    pub series: Vec<SeriesSnapshot>,
}

pub async fn export_counters(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
) -> Result<Json<ExportResponse>, CoreError> {
    let counters = state.engine.get(&actor.tenant_id).await?.snapshot();
    let series = state.engine.list_series(&actor.tenant_id).await?;
    Ok(Json(ExportResponse { counters, series }))
}

pub async fn get_milestones(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
) -> Result<Json<MilestoneThresholds>, CoreError> {
    let thresholds = state
        .records
        .get_milestones(&actor.tenant_id)
        .await?
        .unwrap_or_default();
    Ok(Json(thresholds))
}

pub async fn put_milestones(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
    Json(mut thresholds): Json<MilestoneThresholds>,
) -> Result<Json<MilestoneThresholds>, CoreError> {
    for list in [
        &mut thresholds.deaths,
        &mut thresholds.swears,
        &mut thresholds.screams,
    ] {
        if list.contains(&0) {
            return Err(CoreError::InvalidInput(
                "milestone thresholds must be positive".to_owned(),
            ));
        }
        list.sort_unstable();
        list.dedup();
    }
    state
        .records
        .put_milestones(&actor.tenant_id, &thresholds)
        .await?;
    Ok(Json(thresholds))
}
