//! The `Store` trait and the typed `Records` adapter.
//!
//! `Store` is the four-operation surface the core consumes. `Records` wraps
//! a store handle and exposes typed get/put per record kind; callers never
//! see JSON bodies.

use crate::records::{CounterRecord, TenantRecord};
use crate::{
    PARTITION_USERS, ROW_COUNTERS, ROW_EVENT_MAPPINGS, ROW_MILESTONES, alert_row, series_row,
};
use async_trait::async_trait;
use ov_protocol::{AlertDefinition, EventMapping, MilestoneThresholds, SeriesSnapshot};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("record body is not valid JSON: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("store backend unavailable: {0}")]
    Backend(String),
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Minimal key/partition record store.
///
/// `upsert` has replace semantics and is atomic per (partition, row); no
/// multi-row transactions are assumed anywhere in the core.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, partition: &str, row: &str) -> Result<Option<Value>, StoreError>;
    async fn upsert(&self, partition: &str, row: &str, body: Value) -> Result<(), StoreError>;
    /// All (row, body) pairs under a partition, in unspecified order.
    async fn list(&self, partition: &str) -> Result<Vec<(String, Value)>, StoreError>;
    /// Returns true when a record existed and was removed.
    async fn delete(&self, partition: &str, row: &str) -> Result<bool, StoreError>;
}

// ---------------------------------------------------------------------------
// Typed adapter
// ---------------------------------------------------------------------------

/// Typed access to the record layout. Cheap to clone.
#[derive(Clone)]
pub struct Records {
    store: Arc<dyn Store>,
}

impl Records {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Records { store }
    }

    async fn get_typed<T: DeserializeOwned>(
        &self,
        partition: &str,
        row: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.store.get(partition, row).await? {
            Some(body) => Ok(Some(serde_json::from_value(body)?)),
            None => Ok(None),
        }
    }

    async fn put_typed<T: Serialize>(
        &self,
        partition: &str,
        row: &str,
        record: &T,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_value(record)?;
        self.store.upsert(partition, row, body).await
    }

    // -----------------------------------------------------------------------
    // Tenants
    // -----------------------------------------------------------------------

    pub async fn get_tenant(&self, tenant_id: &str) -> Result<Option<TenantRecord>, StoreError> {
        self.get_typed(PARTITION_USERS, tenant_id).await
    }

    pub async fn put_tenant(&self, tenant: &TenantRecord) -> Result<(), StoreError> {
        self.put_typed(PARTITION_USERS, &tenant.tenant_id, tenant)
            .await
    }

    pub async fn list_tenants(&self) -> Result<Vec<TenantRecord>, StoreError> {
        let rows = self.store.list(PARTITION_USERS).await?;
        let mut tenants = Vec::with_capacity(rows.len());
        for (_, body) in rows {
            tenants.push(serde_json::from_value(body)?);
        }
        Ok(tenants)
    }

    pub async fn delete_tenant(&self, tenant_id: &str) -> Result<bool, StoreError> {
        self.store.delete(PARTITION_USERS, tenant_id).await
    }

    // -----------------------------------------------------------------------
    // Counters
    // -----------------------------------------------------------------------

    pub async fn get_counters(&self, tenant_id: &str) -> Result<Option<CounterRecord>, StoreError> {
        self.get_typed(tenant_id, ROW_COUNTERS).await
    }

    pub async fn put_counters(
        &self,
        tenant_id: &str,
        counters: &CounterRecord,
    ) -> Result<(), StoreError> {
        self.put_typed(tenant_id, ROW_COUNTERS, counters).await
    }

    // -----------------------------------------------------------------------
    // Series snapshots
    // -----------------------------------------------------------------------

    pub async fn get_series(
        &self,
        tenant_id: &str,
        series_id: &str,
    ) -> Result<Option<SeriesSnapshot>, StoreError> {
        self.get_typed(tenant_id, &series_row(series_id)).await
    }

    pub async fn put_series(
        &self,
        tenant_id: &str,
        snapshot: &SeriesSnapshot,
    ) -> Result<(), StoreError> {
        self.put_typed(tenant_id, &series_row(&snapshot.series_id), snapshot)
            .await
    }

    pub async fn list_series(&self, tenant_id: &str) -> Result<Vec<SeriesSnapshot>, StoreError> {
        let rows = self.store.list(tenant_id).await?;
        let mut out = Vec::new();
        for (row, body) in rows {
            if row.starts_with("series:") {
                out.push(serde_json::from_value(body)?);
            }
        }
        out.sort_by(|a: &SeriesSnapshot, b: &SeriesSnapshot| a.saved_at.cmp(&b.saved_at));
        Ok(out)
    }

    pub async fn delete_series(&self, tenant_id: &str, series_id: &str) -> Result<bool, StoreError> {
        self.store.delete(tenant_id, &series_row(series_id)).await
    }

    // -----------------------------------------------------------------------
    // Alerts / mappings / milestones
    // -----------------------------------------------------------------------

    pub async fn get_alert(
        &self,
        tenant_id: &str,
        alert_id: &str,
    ) -> Result<Option<AlertDefinition>, StoreError> {
        self.get_typed(tenant_id, &alert_row(alert_id)).await
    }

    pub async fn put_alert(
        &self,
        tenant_id: &str,
        alert: &AlertDefinition,
    ) -> Result<(), StoreError> {
        self.put_typed(tenant_id, &alert_row(&alert.alert_id), alert)
            .await
    }

    pub async fn list_alerts(&self, tenant_id: &str) -> Result<Vec<AlertDefinition>, StoreError> {
        let rows = self.store.list(tenant_id).await?;
        let mut out = Vec::new();
        for (row, body) in rows {
            if row.starts_with("alerts:") {
                out.push(serde_json::from_value(body)?);
            }
        }
        Ok(out)
    }

    pub async fn delete_alert(&self, tenant_id: &str, alert_id: &str) -> Result<bool, StoreError> {
        self.store.delete(tenant_id, &alert_row(alert_id)).await
    }

    pub async fn get_event_mapping(
        &self,
        tenant_id: &str,
    ) -> Result<Option<EventMapping>, StoreError> {
        self.get_typed(tenant_id, ROW_EVENT_MAPPINGS).await
    }

    pub async fn put_event_mapping(
        &self,
        tenant_id: &str,
        mapping: &EventMapping,
    ) -> Result<(), StoreError> {
        self.put_typed(tenant_id, ROW_EVENT_MAPPINGS, mapping).await
    }

    pub async fn get_milestones(
        &self,
        tenant_id: &str,
    ) -> Result<Option<MilestoneThresholds>, StoreError> {
        self.get_typed(tenant_id, ROW_MILESTONES).await
    }

    pub async fn put_milestones(
        &self,
        tenant_id: &str,
        thresholds: &MilestoneThresholds,
    ) -> Result<(), StoreError> {
        self.put_typed(tenant_id, ROW_MILESTONES, thresholds).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use chrono::Utc;

    fn records() -> Records {
        Records::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn tenant_round_trip_and_delete() {
        let records = records();
        let tenant = TenantRecord::new("t-1", "streamer");
        records.put_tenant(&tenant).await.unwrap();

        let loaded = records.get_tenant("t-1").await.unwrap().unwrap();
        assert_eq!(loaded.username, "streamer");

        assert!(records.delete_tenant("t-1").await.unwrap());
        assert!(records.get_tenant("t-1").await.unwrap().is_none());
        assert!(!records.delete_tenant("t-1").await.unwrap());
    }

    #[tokio::test]
    async fn series_listing_ignores_other_rows_and_sorts_by_save_time() {
        let records = records();
        records
            .put_counters("t-1", &CounterRecord::default())
            .await
            .unwrap();

        for (id, offset) in [("200_b", 2), ("100_a", 1)] {
            records
                .put_series(
                    "t-1",
                    &SeriesSnapshot {
                        series_id: id.to_owned(),
                        series_name: id.to_owned(),
                        description: String::new(),
                        deaths: 1,
                        swears: 2,
                        bits: 3,
                        saved_at: Utc::now() + chrono::Duration::seconds(offset),
                    },
                )
                .await
                .unwrap();
        }

        let series = records.list_series("t-1").await.unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].series_id, "100_a");
        assert_eq!(series[1].series_id, "200_b");
    }

    #[tokio::test]
    async fn counters_default_to_absent_until_written() {
        let records = records();
        assert!(records.get_counters("t-9").await.unwrap().is_none());
        records
            .put_counters("t-9", &CounterRecord::default())
            .await
            .unwrap();
        assert!(records.get_counters("t-9").await.unwrap().is_some());
    }
}
