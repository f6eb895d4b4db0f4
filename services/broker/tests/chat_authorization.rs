//! Chat command authorization: broadcaster/mod badges gate mutations,
//! public reads answer anyone.

mod common;

use common::{spawn_broker, test_config};
use ov_protocol::StreamStatus;
use ov_test_utils::{MockChat, MockEventBus, MockUpstreamHttp};
use serde_json::json;
use std::time::Duration;

async fn chat_harness() -> (common::Harness, MockChat) {
    let bus = MockEventBus::start().await;
    let upstream = MockUpstreamHttp::start().await;
    let chat = MockChat::start().await;
    let h = spawn_broker(test_config(
        bus.url(),
        upstream.subscriptions_url(),
        upstream.token_url(),
        chat.url(),
    ))
    .await;

    let mut tenant = h.seed_tenant("t-1", "streamer").await;
    tenant.stream_status = StreamStatus::Prepping;
    h.state.records.put_tenant(&tenant).await.unwrap();

    let token = h.token_for("t-1");
    let response = h
        .post_json("/stream/bot/toggle", &token, &json!({ "action": "start" }))
        .await;
    assert_eq!(response.status(), 200);

    // The session handshakes and joins before commands can flow.
    chat.wait_for_line(|l| l.starts_with("JOIN #streamer"), Duration::from_secs(5))
        .await
        .expect("chat session should join the channel");

    (h, chat)
}

#[tokio::test]
async fn unprivileged_mutations_are_silently_ignored() {
    let (h, chat) = chat_harness().await;

    chat.send_privmsg("streamer", "Rando", "subscriber/3", "!death+");
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(h.state.engine.get("t-1").await.unwrap().deaths, 0);
    // No outbound reply either.
    let lines = chat.received_lines().await;
    assert!(!lines.iter().any(|l| l.contains("PRIVMSG") && l.contains("deaths")));
}

#[tokio::test]
async fn broadcaster_mutations_apply_and_moderators_count_too() {
    let (h, chat) = chat_harness().await;

    chat.send_privmsg("streamer", "StreamerGal", "broadcaster/1", "!death+");
    chat.send_line(
        "@badges=;mod=1;display-name=Helper :helper!helper@helper.tmi PRIVMSG #streamer :!death+",
    );

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if h.state.engine.get("t-1").await.unwrap().deaths == 2 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "both privileged commands should apply"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn public_reads_answer_anyone_in_channel() {
    let (h, chat) = chat_harness().await;

    chat.send_privmsg("streamer", "StreamerGal", "broadcaster/1", "!death+");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.state.engine.get("t-1").await.unwrap().deaths, 1);

    chat.send_privmsg("streamer", "Rando", "subscriber/3", "!deaths");
    let reply = chat
        .wait_for_line(
            |l| l.starts_with("PRIVMSG #streamer") && l.contains("Current deaths: 1"),
            Duration::from_secs(5),
        )
        .await;
    assert!(reply.is_some(), "public read should answer in channel");
}

#[tokio::test]
async fn series_commands_confirm_in_channel() {
    let (h, chat) = chat_harness().await;
    h.state
        .engine
        .increment("t-1", ov_protocol::CounterKind::Deaths)
        .await
        .unwrap();

    chat.send_privmsg("streamer", "StreamerGal", "broadcaster/1", "!saveseries Ep 1");
    let confirmation = chat
        .wait_for_line(
            |l| l.starts_with("PRIVMSG #streamer") && l.contains("Series saved:"),
            Duration::from_secs(5),
        )
        .await
        .expect("save confirmation");
    assert!(confirmation.contains("_Ep_1"));

    let series = h.state.engine.list_series("t-1").await.unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].series_name, "Ep 1");
}

#[tokio::test]
async fn bot_stop_is_idempotent() {
    let (h, _chat) = chat_harness().await;
    let token = h.token_for("t-1");

    for _ in 0..2 {
        let response = h
            .post_json("/stream/bot/toggle", &token, &json!({ "action": "stop" }))
            .await;
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["running"], false);
    }
}
