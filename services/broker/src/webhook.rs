//! External webhook sink.
//!
//! Best-effort POST of an embed-style JSON document to the tenant's
//! configured URL. Failures are logged and dropped — never retried, never
//! allowed to block the other sinks.

use serde::Serialize;
use std::time::Duration;
use tracing::warn;

const POST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct WebhookField {
    pub name: String,
    pub value: String,
}

/// One notification document, rendered by the receiving side.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookDocument {
    pub title: String,
    pub description: String,
    /// 24-bit RGB color hint.
    pub color: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<WebhookField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl WebhookDocument {
    pub fn new(title: impl Into<String>, description: impl Into<String>, color: u32) -> Self {
        WebhookDocument {
            title: title.into(),
            description: description.into(),
            color,
            fields: Vec::new(),
            url: None,
            thumbnail: None,
            image: None,
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(WebhookField {
            name: name.into(),
            value: value.into(),
        });
        self
    }
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    embeds: [&'a WebhookDocument; 1],
}

#[derive(Clone, Default)]
pub struct WebhookSink {
    http: reqwest::Client,
}

impl WebhookSink {
    pub fn new() -> Self {
        WebhookSink::default()
    }

    /// Fire-and-forget delivery. Always returns; the outcome only shows up
    /// in the logs.
    pub async fn post(&self, url: &str, document: &WebhookDocument) {
        let result = self
            .http
            .post(url)
            .timeout(POST_TIMEOUT)
            .json(&WebhookBody { embeds: [document] })
            .send()
            .await;
        match result {
            Ok(response) if !response.status().is_success() => {
                warn!(status = %response.status(), "webhook delivery rejected");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "webhook delivery failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_serializes_embed_fields() {
        let doc = WebhookDocument::new("Live!", "The stream has started", 0x9146ff)
            .field("Game", "Dark Souls");
        let json = serde_json::to_value(WebhookBody { embeds: [&doc] }).unwrap();
        assert_eq!(json["embeds"][0]["title"], "Live!");
        assert_eq!(json["embeds"][0]["fields"][0]["name"], "Game");
        assert!(json["embeds"][0].get("url").is_none());
    }

    #[tokio::test]
    async fn unreachable_webhook_does_not_error() {
        let sink = WebhookSink::new();
        // Nothing listens here; the call must swallow the failure.
        sink.post(
            "http://127.0.0.1:9/webhook",
            &WebhookDocument::new("t", "d", 0),
        )
        .await;
    }
}
