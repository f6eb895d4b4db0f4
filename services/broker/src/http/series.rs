//! Series snapshot endpoints.

use crate::dispatcher::CounterOp;
use crate::error::CoreError;
use crate::http::AuthedTenant;
use crate::http::counters::CounterResponse;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use ov_protocol::SeriesSnapshot;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSeriesBody {
    pub series_name: String,
    #[serde(default)]
    pub description: String,
}

pub async fn save_series(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
    Json(body): Json<SaveSeriesBody>,
) -> Result<Json<SeriesSnapshot>, CoreError> {
    let snapshot = state
        .engine
        .save_series(&actor.tenant_id, &body.series_name, &body.description)
        .await?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSeriesBody {
    pub series_id: String,
}

pub async fn load_series(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
    Json(body): Json<LoadSeriesBody>,
) -> Result<Json<CounterResponse>, CoreError> {
    let outcome = state
        .dispatcher
        .apply_counter(
            &actor.tenant_id,
            CounterOp::LoadSeries(body.series_id),
            "load",
        )
        .await?;
    Ok(Json(CounterResponse {
        counters: outcome.record.snapshot(),
        change: outcome.change,
    }))
}

pub async fn list_series(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
) -> Result<Json<Vec<SeriesSnapshot>>, CoreError> {
    let series = state.engine.list_series(&actor.tenant_id).await?;
    Ok(Json(series))
}

pub async fn delete_series(
    State(state): State<AppState>,
    AuthedTenant(actor): AuthedTenant,
    Path(series_id): Path<String>,
) -> Result<StatusCode, CoreError> {
    state.engine.delete_series(&actor.tenant_id, &series_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
