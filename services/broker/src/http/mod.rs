//! REST handlers. Every mutation returns the post-state of the affected
//! entity; every failure is a `CoreError` rendered as the `{error}`
//! envelope with its taxonomy status code.

pub mod alerts;
pub mod counters;
pub mod series;
pub mod stream;

use crate::auth::{extract_bearer, verify_token};
use crate::error::CoreError;
use crate::state::AppState;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use ov_store::TenantRecord;
use serde::Deserialize;

/// The tenant behind the request's bearer token.
pub struct AuthedTenant(pub TenantRecord);

impl FromRequestParts<AppState> for AuthedTenant {
    type Rejection = CoreError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(extract_bearer)
            .ok_or(CoreError::Unauthorized)?;
        let tenant_id =
            verify_token(&state.config.auth.signing_key, token).ok_or(CoreError::Unauthorized)?;
        let tenant = state
            .records
            .get_tenant(&tenant_id)
            .await?
            .ok_or(CoreError::Unauthorized)?;
        Ok(AuthedTenant(tenant))
    }
}

/// Optional `?tenant=` target for mod-scoped operations.
#[derive(Debug, Default, Deserialize)]
pub struct TargetQuery {
    pub tenant: Option<String>,
}

/// Resolve the tenant an operation applies to: the caller itself, or a
/// tenant the caller manages.
pub async fn resolve_target(
    state: &AppState,
    actor: &TenantRecord,
    target: Option<String>,
) -> Result<String, CoreError> {
    match target {
        None => Ok(actor.tenant_id.clone()),
        Some(tenant_id) if tenant_id == actor.tenant_id => Ok(tenant_id),
        Some(tenant_id) => {
            let tenant = state
                .records
                .get_tenant(&tenant_id)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("tenant {tenant_id}")))?;
            if tenant.can_be_managed_by(actor) {
                Ok(tenant_id)
            } else {
                Err(CoreError::Unauthorized)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::secrets::StaticSecrets;
    use ov_store::{MemoryStore, Records};
    use std::sync::Arc;

    fn test_state() -> AppState {
        let provider = StaticSecrets::new([
            ("TOKEN_SIGNING_KEY".to_owned(), "k".to_owned()),
            ("UPSTREAM_CLIENT_ID".to_owned(), "cid".to_owned()),
            ("UPSTREAM_CLIENT_SECRET".to_owned(), "cs".to_owned()),
        ]);
        let config = BrokerConfig::load(&provider).unwrap();
        AppState::new(config, Arc::new(MemoryStore::new()))
    }

    async fn seed(records: &Records) -> (TenantRecord, TenantRecord) {
        let streamer = TenantRecord::new("t-1", "streamer");
        let mut moderator = TenantRecord::new("t-2", "helper");
        moderator.managed_tenants.push("t-1".to_owned());
        records.put_tenant(&streamer).await.unwrap();
        records.put_tenant(&moderator).await.unwrap();
        (streamer, moderator)
    }

    #[tokio::test]
    async fn target_defaults_to_self_and_allows_managed_tenants() {
        let state = test_state();
        let (streamer, moderator) = seed(&state.records).await;

        assert_eq!(
            resolve_target(&state, &streamer, None).await.unwrap(),
            "t-1"
        );
        assert_eq!(
            resolve_target(&state, &moderator, Some("t-1".to_owned()))
                .await
                .unwrap(),
            "t-1"
        );
        match resolve_target(&state, &streamer, Some("t-2".to_owned())).await {
            Err(CoreError::Unauthorized) => {}
            other => panic!("expected Unauthorized, got {other:?}"),
        }
        match resolve_target(&state, &streamer, Some("t-404".to_owned())).await {
            Err(CoreError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
}
