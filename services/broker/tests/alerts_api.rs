//! Alert definition and event mapping boundaries.

mod common;

use common::{spawn_broker, test_config};
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

fn alert_body(duration_ms: u32) -> serde_json::Value {
    json!({
        "type": "follow",
        "name": "Custom Follow",
        "textTemplate": "{username} joined the party!",
        "durationMs": duration_ms,
        "backgroundColor": "#000000",
        "textColor": "#ffffff",
        "borderColor": "#9146ff",
    })
}

#[tokio::test]
async fn duration_out_of_range_is_invalid_input() {
    let h = harness().await;
    h.seed_tenant("t-1", "streamer").await;
    let token = h.token_for("t-1");

    for bad in [999, 30_001] {
        let response = h.post_json("/alerts", &token, &alert_body(bad)).await;
        assert_eq!(response.status(), 400);
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("durationMs"));
    }

    for good in [1000, 30_000] {
        let response = h.post_json("/alerts", &token, &alert_body(good)).await;
        assert_eq!(response.status(), 200);
    }
}

#[tokio::test]
async fn unknown_alert_type_is_invalid_input() {
    let h = harness().await;
    h.seed_tenant("t-1", "streamer").await;
    let token = h.token_for("t-1");

    let mut body = alert_body(5000);
    body["type"] = json!("explosion");
    let response = h.post_json("/alerts", &token, &body).await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn default_alerts_are_read_only() {
    let h = harness().await;
    h.seed_tenant("t-1", "streamer").await;
    let token = h.token_for("t-1");

    let response = h
        .http
        .put(format!("{}/alerts/default-follow", h.base_url))
        .bearer_auth(&token)
        .json(&alert_body(5000))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("read-only"));

    let response = h
        .http
        .delete(format!("{}/alerts/default-follow", h.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn custom_alerts_crud_and_listing_includes_defaults() {
    let h = harness().await;
    h.seed_tenant("t-1", "streamer").await;
    let token = h.token_for("t-1");

    let listed: serde_json::Value = h.get("/alerts", &token).await.json().await.unwrap();
    let default_count = listed.as_array().unwrap().len();
    assert!(default_count >= 6);

    let created: serde_json::Value = h
        .post_json("/alerts", &token, &alert_body(5000))
        .await
        .json()
        .await
        .unwrap();
    let alert_id = created["alertId"].as_str().unwrap().to_owned();
    assert_eq!(created["isDefault"], false);

    let listed: serde_json::Value = h.get("/alerts", &token).await.json().await.unwrap();
    assert_eq!(listed.as_array().unwrap().len(), default_count + 1);

    let mut updated_body = alert_body(2000);
    updated_body["name"] = json!("Renamed");
    let response = h
        .http
        .put(format!("{}/alerts/{alert_id}", h.base_url))
        .bearer_auth(&token)
        .json(&updated_body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let updated: serde_json::Value = response.json().await.unwrap();
    assert_eq!(updated["name"], "Renamed");
    assert_eq!(updated["durationMs"], 2000);

    let response = h
        .http
        .delete(format!("{}/alerts/{alert_id}", h.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
}

#[tokio::test]
async fn mappings_validate_event_names_and_targets() {
    let h = harness().await;
    h.seed_tenant("t-1", "streamer").await;
    let token = h.token_for("t-1");

    // Unknown event name.
    let response = h
        .http
        .put(format!("{}/alerts/mappings", h.base_url))
        .bearer_auth(&token)
        .json(&json!({ "mappings": { "explosion": "default-follow" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Unknown alert target.
    let response = h
        .http
        .put(format!("{}/alerts/mappings", h.base_url))
        .bearer_auth(&token)
        .json(&json!({ "mappings": { "follow": "no-such-alert" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // "none" disables the alert and round-trips.
    let response = h
        .http
        .put(format!("{}/alerts/mappings", h.base_url))
        .bearer_auth(&token)
        .json(&json!({ "mappings": { "follow": "none", "raid": "default-raid" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let mapping: serde_json::Value = h
        .get("/alerts/mappings", &token)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(mapping["mappings"]["follow"], "none");
}

#[tokio::test]
async fn requests_without_a_token_are_unauthorized() {
    let h = harness().await;
    h.seed_tenant("t-1", "streamer").await;

    let response = h
        .http
        .get(format!("{}/counters", h.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().is_some());
}
