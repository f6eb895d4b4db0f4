//! Token broker: one credential tuple per tenant, refreshed on demand.
//!
//! Refresh is serialized per tenant — at most one in-flight refresh, with
//! concurrent callers awaiting its result behind the tenant mutex. The
//! broker is the sole mutator of credential tuples; sessions only read
//! through `get_access_token`.

use crate::config::UpstreamConfig;
use crate::error::CoreError;
use chrono::{Duration as ChronoDuration, Utc};
use ov_store::{CredentialTuple, Records, TenantRecord};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

const REFRESH_TIMEOUT: Duration = Duration::from_secs(10);
/// Refresh proactively when less than this much validity remains.
const REFRESH_MARGIN_HOURS: i64 = 1;

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    refresh_token: String,
    expires_in: u64,
}

pub struct TokenBroker {
    records: Records,
    http: reqwest::Client,
    cfg: UpstreamConfig,
    refresh_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl TokenBroker {
    pub fn new(records: Records, cfg: UpstreamConfig) -> Self {
        TokenBroker {
            records,
            http: reqwest::Client::new(),
            cfg,
            refresh_locks: RwLock::new(HashMap::new()),
        }
    }

    async fn refresh_lock(&self, tenant_id: &str) -> Arc<Mutex<()>> {
        {
            let locks = self.refresh_locks.read().await;
            if let Some(lock) = locks.get(tenant_id) {
                return lock.clone();
            }
        }
        let mut locks = self.refresh_locks.write().await;
        locks
            .entry(tenant_id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// A currently-valid access token for the tenant.
    ///
    /// Refreshes first when under an hour of validity remains.
    pub async fn get_access_token(&self, tenant_id: &str) -> Result<String, CoreError> {
        let lock = self.refresh_lock(tenant_id).await;
        let _guard = lock.lock().await;

        let tenant = self.load_tenant(tenant_id).await?;
        let credentials = match &tenant.credentials {
            Some(c) if !tenant.credentials_revoked => c.clone(),
            _ => return Err(CoreError::NoCredentials),
        };

        if !credentials.expires_within(ChronoDuration::hours(REFRESH_MARGIN_HOURS)) {
            return Ok(credentials.access_token);
        }
        self.refresh(tenant, &credentials).await
    }

    /// Reactive path for an upstream 401: drop the cached tuple and run a
    /// single refresh. A second 401 after the caller retries with the new
    /// token is `AuthRevoked` and terminal for the tenant's sessions.
    pub async fn on_reactive_unauthorized(&self, tenant_id: &str) -> Result<String, CoreError> {
        let lock = self.refresh_lock(tenant_id).await;
        let _guard = lock.lock().await;

        let tenant = self.load_tenant(tenant_id).await?;
        let credentials = match &tenant.credentials {
            Some(c) if !tenant.credentials_revoked => c.clone(),
            _ => return Err(CoreError::AuthRevoked),
        };
        warn!(tenant_id, "upstream rejected access token, refreshing");
        self.refresh(tenant, &credentials)
            .await
            .map_err(|_| CoreError::AuthRevoked)
    }

    async fn load_tenant(&self, tenant_id: &str) -> Result<TenantRecord, CoreError> {
        self.records
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("tenant {tenant_id}")))
    }

    async fn refresh(
        &self,
        mut tenant: TenantRecord,
        credentials: &CredentialTuple,
    ) -> Result<String, CoreError> {
        let response = self
            .http
            .post(&self.cfg.token_url)
            .timeout(REFRESH_TIMEOUT)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", credentials.refresh_token.as_str()),
                ("client_id", self.cfg.client_id.as_str()),
                ("client_secret", self.cfg.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CoreError::RefreshFailed(e.to_string()))?;

        if !response.status().is_success() {
            // A definitive upstream rejection means the refresh token is
            // dead; transient transport failures above do not revoke.
            warn!(
                tenant_id = %tenant.tenant_id,
                status = %response.status(),
                "token refresh rejected, marking credentials revoked"
            );
            tenant.credentials_revoked = true;
            self.records.put_tenant(&tenant).await?;
            return Err(CoreError::RefreshFailed(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| CoreError::RefreshFailed(e.to_string()))?;

        let tuple = CredentialTuple {
            access_token: body.access_token.clone(),
            refresh_token: body.refresh_token,
            expires_at: Utc::now() + ChronoDuration::seconds(body.expires_in as i64),
        };
        tenant.credentials = Some(tuple);
        tenant.credentials_revoked = false;
        self.records.put_tenant(&tenant).await?;
        info!(tenant_id = %tenant.tenant_id, "access token refreshed");
        Ok(body.access_token)
    }
}
