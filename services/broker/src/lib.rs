// broker: Multi-tenant real-time event broker for live-streaming overlays.
// Exposes modules for integration testing.

pub mod auth;
pub mod chat;
pub mod config;
pub mod counters;
pub mod dispatcher;
pub mod error;
pub mod eventsub;
pub mod http;
pub mod lifecycle;
pub mod rooms;
pub mod secrets;
pub mod state;
pub mod supervisor;
pub mod token_broker;
pub mod webhook;
pub mod ws_subscriber;

pub use state::AppState;

use axum::Router;
use axum::routing::{delete, get, post, put};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws_subscriber::ws_subscriber_handler))
        .route("/counters", get(http::counters::get_counters))
        .route("/counters/reset", post(http::counters::reset_counters))
        .route("/counters/export", get(http::counters::export_counters))
        .route(
            "/counters/milestones",
            get(http::counters::get_milestones).put(http::counters::put_milestones),
        )
        .route("/counters/series/save", post(http::series::save_series))
        .route("/counters/series/load", post(http::series::load_series))
        .route("/counters/series/list", get(http::series::list_series))
        .route(
            "/counters/series/{series_id}",
            delete(http::series::delete_series),
        )
        .route(
            "/counters/{kind}/{action}",
            post(http::counters::mutate_counter),
        )
        .route("/stream/prep", post(http::stream::prep))
        .route("/stream/go-live", post(http::stream::go_live))
        .route("/stream/end-stream", post(http::stream::end_stream))
        .route("/stream/cancel-prep", post(http::stream::cancel_prep))
        .route("/stream/status", get(http::stream::stream_status))
        .route("/stream/monitor/start", post(http::stream::monitor_start))
        .route("/stream/monitor/stop", post(http::stream::monitor_stop))
        .route(
            "/stream/monitor/reconnect",
            post(http::stream::monitor_reconnect),
        )
        .route("/stream/monitor/status", get(http::stream::monitor_status))
        .route("/stream/bot/toggle", post(http::stream::bot_toggle))
        .route("/stream/bot/status", get(http::stream::bot_status))
        .route(
            "/alerts",
            get(http::alerts::list_alerts).post(http::alerts::create_alert),
        )
        .route(
            "/alerts/mappings",
            get(http::alerts::get_mappings).put(http::alerts::put_mappings),
        )
        .route(
            "/alerts/{alert_id}",
            put(http::alerts::update_alert).delete(http::alerts::delete_alert),
        )
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}
