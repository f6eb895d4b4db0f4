//! Series save/load across streams, through the HTTP surface.

mod common;

use common::{spawn_broker, test_config};
use ov_protocol::CounterKind;
use ov_test_utils::{MockChat, MockEventBus, MockUpstreamHttp};
use serde_json::json;

async fn harness() -> common::Harness {
    let bus = MockEventBus::start().await;
    let upstream = MockUpstreamHttp::start().await;
    let chat = MockChat::start().await;
    spawn_broker(test_config(
        bus.url(),
        upstream.subscriptions_url(),
        upstream.token_url(),
        chat.url(),
    ))
    .await
}

#[tokio::test]
async fn save_mutate_load_restores_the_snapshot() {
    let h = harness().await;
    h.seed_tenant("t-1", "streamer").await;
    let token = h.token_for("t-1");

    // Episode one: 15 deaths, 22 swears, 40 bits.
    for _ in 0..15 {
        h.state.engine.increment("t-1", CounterKind::Deaths).await.unwrap();
    }
    for _ in 0..22 {
        h.state.engine.increment("t-1", CounterKind::Swears).await.unwrap();
    }
    h.state.engine.add_bits("t-1", 40).await.unwrap();

    let response = h
        .post_json(
            "/counters/series/save",
            &token,
            &json!({ "seriesName": "Ep1", "description": "first episode" }),
        )
        .await;
    assert_eq!(response.status(), 200);
    let saved: serde_json::Value = response.json().await.unwrap();
    let series_id = saved["seriesId"].as_str().unwrap().to_owned();
    assert!(series_id.ends_with("_Ep1"));

    // New stream: counters drift, bits reset by go-live elsewhere.
    for _ in 0..15 {
        h.state.engine.increment("t-1", CounterKind::Deaths).await.unwrap();
    }
    h.state.engine.start_stream("t-1").await.unwrap();
    let stream_started_before = h.state.engine.get("t-1").await.unwrap().stream_started;

    let response = h
        .post_json("/counters/series/load", &token, &json!({ "seriesId": series_id }))
        .await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["counters"]["deaths"], 15);
    assert_eq!(body["counters"]["swears"], 22);
    assert_eq!(body["counters"]["bits"], 40);

    // Load restores counters but never touches the running stream.
    let record = h.state.engine.get("t-1").await.unwrap();
    assert_eq!(record.stream_started, stream_started_before);

    // Listed, deletable, then gone.
    let listed: serde_json::Value = h
        .get("/counters/series/list", &token)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let response = h
        .http
        .delete(format!("{}/counters/series/{series_id}", h.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let response = h
        .post_json("/counters/series/load", &token, &json!({ "seriesId": series_id }))
        .await;
    assert_eq!(response.status(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn loading_identical_state_reports_a_zero_change() {
    let h = harness().await;
    h.seed_tenant("t-1", "streamer").await;
    let token = h.token_for("t-1");

    h.state.engine.increment("t-1", CounterKind::Deaths).await.unwrap();
    let response = h
        .post_json("/counters/series/save", &token, &json!({ "seriesName": "Same" }))
        .await;
    let saved: serde_json::Value = response.json().await.unwrap();
    let series_id = saved["seriesId"].as_str().unwrap();

    let response = h
        .post_json("/counters/series/load", &token, &json!({ "seriesId": series_id }))
        .await;
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["change"]["deaths"], 0);
    assert_eq!(body["change"]["swears"], 0);
    assert_eq!(body["change"]["bits"], 0);
}

#[tokio::test]
async fn export_bundles_counters_and_series() {
    let h = harness().await;
    h.seed_tenant("t-1", "streamer").await;
    let token = h.token_for("t-1");

    h.state.engine.increment("t-1", CounterKind::Screams).await.unwrap();
    h.post_json("/counters/series/save", &token, &json!({ "seriesName": "Ep1" }))
        .await;

    let exported: serde_json::Value =
        h.get("/counters/export", &token).await.json().await.unwrap();
    assert_eq!(exported["counters"]["screams"], 1);
    assert_eq!(exported["series"].as_array().unwrap().len(), 1);
}
