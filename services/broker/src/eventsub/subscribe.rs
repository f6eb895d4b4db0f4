//! Subscription catalog and creation against the event-bus HTTP endpoint.
//!
//! Subscriptions are created once per fresh welcome and bound to the
//! session id. A 409 on creation means the subscription already exists and
//! counts as success; a 401 triggers one reactive token refresh and one
//! retry before surfacing `AuthRevoked`.

use crate::config::UpstreamConfig;
use crate::error::CoreError;
use crate::token_broker::TokenBroker;
use ov_protocol::{
    BusSubscription, Features, SubscriptionCreateRequest, SubscriptionCreateResponse,
    SubscriptionTransport,
};
use reqwest::StatusCode;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// One entry of the fixed catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionSpec {
    pub sub_type: &'static str,
    pub version: &'static str,
}

/// The typed subscriptions a tenant's session materializes, derived from
/// its feature set. `channel_points` gates the reward-redemption feed.
pub fn catalog(features: &Features) -> Vec<SubscriptionSpec> {
    let mut specs = vec![
        SubscriptionSpec { sub_type: "stream.online", version: "1" },
        SubscriptionSpec { sub_type: "stream.offline", version: "1" },
        SubscriptionSpec { sub_type: "channel.follow", version: "2" },
        SubscriptionSpec { sub_type: "channel.subscribe", version: "1" },
        SubscriptionSpec { sub_type: "channel.subscription.gift", version: "1" },
        SubscriptionSpec { sub_type: "channel.subscription.message", version: "1" },
        SubscriptionSpec { sub_type: "channel.cheer", version: "1" },
        SubscriptionSpec { sub_type: "channel.raid", version: "1" },
    ];
    if features.channel_points {
        specs.push(SubscriptionSpec {
            sub_type: "channel.channel_points_custom_reward_redemption.add",
            version: "1",
        });
    }
    specs
}

/// The condition object for a spec. The tenant id doubles as the upstream
/// broadcaster user id (assigned at OAuth bind).
fn condition(spec: SubscriptionSpec, tenant_id: &str) -> BTreeMap<String, String> {
    let mut condition = BTreeMap::new();
    match spec.sub_type {
        "channel.raid" => {
            condition.insert("to_broadcaster_user_id".to_owned(), tenant_id.to_owned());
        }
        "channel.follow" => {
            condition.insert("broadcaster_user_id".to_owned(), tenant_id.to_owned());
            condition.insert("moderator_user_id".to_owned(), tenant_id.to_owned());
        }
        _ => {
            condition.insert("broadcaster_user_id".to_owned(), tenant_id.to_owned());
        }
    }
    condition
}

/// Create the whole catalog against a freshly-welcomed session.
pub async fn create_all(
    http: &reqwest::Client,
    cfg: &UpstreamConfig,
    broker: &TokenBroker,
    tenant_id: &str,
    session_id: &str,
    features: &Features,
) -> Result<Vec<BusSubscription>, CoreError> {
    let mut token = broker.get_access_token(tenant_id).await?;
    let mut created = Vec::new();

    for spec in catalog(features) {
        let mut retried = false;
        loop {
            match create_one(http, cfg, &token, tenant_id, session_id, spec).await? {
                CreateResult::Created(subscription) => {
                    created.push(subscription);
                    break;
                }
                CreateResult::AlreadyExists => {
                    debug!(tenant_id, sub_type = spec.sub_type, "subscription already exists");
                    created.push(BusSubscription {
                        id: format!("existing:{}", spec.sub_type),
                        sub_type: spec.sub_type.to_owned(),
                        status: Some("enabled".to_owned()),
                    });
                    break;
                }
                CreateResult::Unauthorized if !retried => {
                    token = broker.on_reactive_unauthorized(tenant_id).await?;
                    retried = true;
                }
                CreateResult::Unauthorized => {
                    warn!(tenant_id, sub_type = spec.sub_type, "still unauthorized after refresh");
                    return Err(CoreError::AuthRevoked);
                }
            }
        }
    }

    info!(tenant_id, count = created.len(), "subscriptions materialized");
    Ok(created)
}

enum CreateResult {
    Created(BusSubscription),
    AlreadyExists,
    Unauthorized,
}

async fn create_one(
    http: &reqwest::Client,
    cfg: &UpstreamConfig,
    token: &str,
    tenant_id: &str,
    session_id: &str,
    spec: SubscriptionSpec,
) -> Result<CreateResult, CoreError> {
    let body = SubscriptionCreateRequest {
        sub_type: spec.sub_type.to_owned(),
        version: spec.version.to_owned(),
        condition: condition(spec, tenant_id),
        transport: SubscriptionTransport {
            method: "websocket".to_owned(),
            session_id: session_id.to_owned(),
        },
    };

    let response = http
        .post(&cfg.subscriptions_url)
        .bearer_auth(token)
        .header("Client-Id", &cfg.client_id)
        .json(&body)
        .send()
        .await
        .map_err(|e| CoreError::UpstreamUnavailable(e.to_string()))?;

    match response.status() {
        StatusCode::CONFLICT => Ok(CreateResult::AlreadyExists),
        StatusCode::UNAUTHORIZED => Ok(CreateResult::Unauthorized),
        status if status.is_success() => {
            let parsed: SubscriptionCreateResponse = response
                .json()
                .await
                .map_err(|e| CoreError::UpstreamUnavailable(e.to_string()))?;
            let subscription = parsed.data.into_iter().next().ok_or_else(|| {
                CoreError::UpstreamUnavailable("creation response carried no subscription".into())
            })?;
            Ok(CreateResult::Created(subscription))
        }
        status => Err(CoreError::UpstreamUnavailable(format!(
            "subscription creation for {} returned {status}",
            spec.sub_type
        ))),
    }
}
