//! Broker configuration loading.
//!
//! Environment variables are the sole config source; secret-valued keys
//! resolve through the secret provider first and fall back to the
//! environment.
//!
//! # Required keys
//! - `TOKEN_SIGNING_KEY` (secret) — HMAC key for subscriber bearer tokens
//! - `UPSTREAM_CLIENT_ID`
//! - `UPSTREAM_CLIENT_SECRET` (secret)

use crate::secrets::{SecretProvider, resolve};
use std::path::PathBuf;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub bind_addr: String,
    /// SQLite path for the local record mirror.
    pub store_path: PathBuf,
    pub allowed_origins: Vec<String>,
    pub auth: AuthConfig,
    pub upstream: UpstreamConfig,
    pub chat: ChatConfig,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HMAC-SHA256 key for subscriber bearer tokens.
    pub signing_key: String,
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Event-bus WebSocket endpoint.
    pub eventsub_ws_url: String,
    /// Subscription-creation HTTP endpoint.
    pub subscriptions_url: String,
    /// OAuth token refresh endpoint.
    pub token_url: String,
    /// No-frame window before the session is treated as dead.
    pub keepalive_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// IRC-over-WebSocket chat endpoint.
    pub ws_url: String,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required config key: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_owned())
}

impl BrokerConfig {
    /// Load from the environment, resolving secrets through `provider`.
    pub fn load(provider: &dyn SecretProvider) -> Result<Self, ConfigError> {
        let signing_key = resolve(provider, "TOKEN_SIGNING_KEY")
            .ok_or(ConfigError::Missing("TOKEN_SIGNING_KEY"))?;
        let client_id = resolve(provider, "UPSTREAM_CLIENT_ID")
            .ok_or(ConfigError::Missing("UPSTREAM_CLIENT_ID"))?;
        let client_secret = resolve(provider, "UPSTREAM_CLIENT_SECRET")
            .ok_or(ConfigError::Missing("UPSTREAM_CLIENT_SECRET"))?;

        let keepalive_raw = env_or("KEEPALIVE_TIMEOUT_SECS", "60");
        let keepalive_secs: u64 =
            keepalive_raw
                .parse()
                .map_err(|_| ConfigError::Invalid {
                    key: "KEEPALIVE_TIMEOUT_SECS",
                    value: keepalive_raw.clone(),
                })?;

        let allowed_origins = env_or("ALLOWED_ORIGINS", "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .collect();

        Ok(BrokerConfig {
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8080"),
            store_path: PathBuf::from(env_or("STORE_PATH", "broker-store.db")),
            allowed_origins,
            auth: AuthConfig { signing_key },
            upstream: UpstreamConfig {
                client_id,
                client_secret,
                eventsub_ws_url: env_or(
                    "UPSTREAM_EVENTSUB_URL",
                    "wss://eventsub.wss.twitch.tv/ws",
                ),
                subscriptions_url: env_or(
                    "UPSTREAM_SUBSCRIPTIONS_URL",
                    "https://api.twitch.tv/helix/eventsub/subscriptions",
                ),
                token_url: env_or("UPSTREAM_TOKEN_URL", "https://id.twitch.tv/oauth2/token"),
                keepalive_timeout: Duration::from_secs(keepalive_secs),
            },
            chat: ChatConfig {
                ws_url: env_or("CHAT_WS_URL", "wss://irc-ws.chat.twitch.tv:443"),
            },
        })
    }
}
