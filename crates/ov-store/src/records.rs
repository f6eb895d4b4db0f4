//! At-rest record types.
//!
//! Wire-visible shapes (counters, series, alerts, mappings) live in
//! `ov-protocol`; this module adds the records that never leave the server
//! whole: the tenant record (with its credential tuple) and the counter
//! record (with the stream-start suppression cursor).

use chrono::{DateTime, Utc};
use ov_protocol::{CounterSnapshot, Features, StreamStatus};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Tenant
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Streamer,
    Mod,
}

/// Upstream OAuth credential tuple. The token broker is the sole mutator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialTuple {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl CredentialTuple {
    /// True when less than `margin` of validity remains.
    pub fn expires_within(&self, margin: chrono::Duration) -> bool {
        self.expires_at - Utc::now() < margin
    }
}

/// One streamer account; the unit of isolation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantRecord {
    pub tenant_id: String,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    #[serde(default)]
    pub features: Features,
    pub stream_status: StreamStatus,
    #[serde(default)]
    pub managed_tenants: Vec<String>,
    #[serde(default)]
    pub external_webhook_url: Option<String>,
    #[serde(default)]
    pub credentials: Option<CredentialTuple>,
    /// Set when a refresh fails terminally; cleared on re-bind.
    #[serde(default)]
    pub credentials_revoked: bool,
    pub created_at: DateTime<Utc>,
}

impl TenantRecord {
    pub fn new(tenant_id: impl Into<String>, username: impl Into<String>) -> Self {
        let username = username.into();
        TenantRecord {
            tenant_id: tenant_id.into(),
            display_name: username.clone(),
            username,
            role: Role::Streamer,
            features: Features::default(),
            stream_status: StreamStatus::Offline,
            managed_tenants: Vec::new(),
            external_webhook_url: None,
            credentials: None,
            credentials_revoked: false,
            created_at: Utc::now(),
        }
    }

    /// Whether `actor` may mutate this tenant's counters: the tenant itself,
    /// or a subscriber whose `managed_tenants` lists this tenant.
    pub fn can_be_managed_by(&self, actor: &TenantRecord) -> bool {
        actor.tenant_id == self.tenant_id
            || actor.managed_tenants.iter().any(|t| t == &self.tenant_id)
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Per-tenant counter state.
///
/// Invariants:
/// - all four counters are non-negative (decrement at 0 is a no-op);
/// - `reset` zeros deaths/swears/screams and preserves bits,
///   `stream_started` and `last_notified_stream_id`;
/// - `start_stream` zeros bits and preserves `last_notified_stream_id`;
/// - `end_stream` nulls `stream_started` AND `last_notified_stream_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterRecord {
    pub deaths: u64,
    pub swears: u64,
    pub screams: u64,
    pub bits: u64,
    #[serde(default)]
    pub stream_started: Option<DateTime<Utc>>,
    /// Duplicate-suppression cursor for stream-start notifications.
    #[serde(default)]
    pub last_notified_stream_id: Option<String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl CounterRecord {
    pub fn get(&self, kind: ov_protocol::CounterKind) -> u64 {
        match kind {
            ov_protocol::CounterKind::Deaths => self.deaths,
            ov_protocol::CounterKind::Swears => self.swears,
            ov_protocol::CounterKind::Screams => self.screams,
        }
    }

    pub fn set(&mut self, kind: ov_protocol::CounterKind, value: u64) {
        match kind {
            ov_protocol::CounterKind::Deaths => self.deaths = value,
            ov_protocol::CounterKind::Swears => self.swears = value,
            ov_protocol::CounterKind::Screams => self.screams = value,
        }
    }

    /// Public view sent to subscribers; omits the suppression cursor.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            deaths: self.deaths,
            swears: self.swears,
            screams: self.screams,
            bits: self.bits,
            stream_started: self.stream_started,
            last_updated: self.last_updated,
        }
    }
}
