//! Counter engine: the sole mutator of counter records and series snapshots.
//!
//! All operations on a single tenant are serialized through a per-tenant
//! slot; cross-tenant operations proceed in parallel. Each mutation ends in
//! exactly one atomic counter upsert, and that upsert is the only store call
//! performed for an already-cached tenant while its slot is held.

use crate::error::CoreError;
use chrono::Utc;
use ov_protocol::{CounterChange, CounterKind, MilestoneRecord, SeriesSnapshot};
use ov_store::{CounterRecord, Records, sanitize_series_name};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of one counter mutation: the post-state, the delta applied, and
/// any milestone crossings the mutation produced (ascending order).
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub record: CounterRecord,
    pub change: CounterChange,
    pub milestones: Vec<MilestoneRecord>,
}

type Slot = Arc<Mutex<Option<CounterRecord>>>;

/// Per-tenant counter state and series snapshots.
pub struct CounterEngine {
    records: Records,
    slots: RwLock<HashMap<String, Slot>>,
}

impl CounterEngine {
    pub fn new(records: Records) -> Self {
        CounterEngine {
            records,
            slots: RwLock::new(HashMap::new()),
        }
    }

    async fn slot(&self, tenant_id: &str) -> Slot {
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(tenant_id) {
                return slot.clone();
            }
        }
        let mut slots = self.slots.write().await;
        slots
            .entry(tenant_id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Run one serialized read-modify-write against a tenant's record.
    ///
    /// The slot cache is invalidated when the trailing upsert fails, so the
    /// next operation reloads from the store.
    async fn with_record<T>(
        &self,
        tenant_id: &str,
        f: impl FnOnce(&mut CounterRecord) -> T,
    ) -> Result<(CounterRecord, T), CoreError> {
        let slot = self.slot(tenant_id).await;
        let mut guard = slot.lock().await;
        let mut record = match guard.take() {
            Some(record) => record,
            None => self
                .records
                .get_counters(tenant_id)
                .await?
                .unwrap_or_default(),
        };
        let out = f(&mut record);
        record.last_updated = Some(Utc::now());
        self.records.put_counters(tenant_id, &record).await?;
        *guard = Some(record.clone());
        Ok((record, out))
    }

    /// Current counters; tenants without a record read as all-zero.
    pub async fn get(&self, tenant_id: &str) -> Result<CounterRecord, CoreError> {
        let slot = self.slot(tenant_id).await;
        let mut guard = slot.lock().await;
        if let Some(record) = guard.as_ref() {
            return Ok(record.clone());
        }
        let record = self
            .records
            .get_counters(tenant_id)
            .await?
            .unwrap_or_default();
        *guard = Some(record.clone());
        Ok(record)
    }

    // -----------------------------------------------------------------------
    // Counter mutations
    // -----------------------------------------------------------------------

    pub async fn increment(
        &self,
        tenant_id: &str,
        kind: CounterKind,
    ) -> Result<MutationOutcome, CoreError> {
        let thresholds = self
            .records
            .get_milestones(tenant_id)
            .await?
            .unwrap_or_default();
        let (record, (change, milestones)) = self
            .with_record(tenant_id, |record| {
                let prev = record.get(kind);
                let next = prev + 1;
                record.set(kind, next);
                let mut change = CounterChange::default();
                apply_change(&mut change, kind, 1);
                (change, crossed(thresholds.for_kind(kind), kind, prev, next))
            })
            .await?;
        Ok(MutationOutcome {
            record,
            change,
            milestones,
        })
    }

    /// Decrement at 0 is a no-op: the unchanged record comes back with a
    /// zero delta, not an error.
    pub async fn decrement(
        &self,
        tenant_id: &str,
        kind: CounterKind,
    ) -> Result<MutationOutcome, CoreError> {
        let (record, change) = self
            .with_record(tenant_id, |record| {
                let prev = record.get(kind);
                let mut change = CounterChange::default();
                if prev > 0 {
                    record.set(kind, prev - 1);
                    apply_change(&mut change, kind, -1);
                }
                change
            })
            .await?;
        Ok(MutationOutcome {
            record,
            change,
            milestones: Vec::new(),
        })
    }

    /// Zero deaths/swears/screams; preserve bits, `stream_started` and
    /// `last_notified_stream_id`.
    pub async fn reset(&self, tenant_id: &str) -> Result<MutationOutcome, CoreError> {
        let (record, change) = self
            .with_record(tenant_id, |record| {
                let change = CounterChange {
                    deaths: -(record.deaths as i64),
                    swears: -(record.swears as i64),
                    screams: -(record.screams as i64),
                    bits: 0,
                };
                record.deaths = 0;
                record.swears = 0;
                record.screams = 0;
                change
            })
            .await?;
        Ok(MutationOutcome {
            record,
            change,
            milestones: Vec::new(),
        })
    }

    pub async fn add_bits(&self, tenant_id: &str, amount: u64) -> Result<MutationOutcome, CoreError> {
        let (record, change) = self
            .with_record(tenant_id, |record| {
                record.bits += amount;
                CounterChange {
                    bits: amount as i64,
                    ..CounterChange::default()
                }
            })
            .await?;
        Ok(MutationOutcome {
            record,
            change,
            milestones: Vec::new(),
        })
    }

    /// Zero bits and stamp the stream start; `last_notified_stream_id` is
    /// deliberately preserved so reconnect suppression survives go-live.
    pub async fn start_stream(&self, tenant_id: &str) -> Result<CounterRecord, CoreError> {
        let (record, ()) = self
            .with_record(tenant_id, |record| {
                record.bits = 0;
                record.stream_started = Some(Utc::now());
            })
            .await?;
        Ok(record)
    }

    /// Null `stream_started` AND `last_notified_stream_id`.
    pub async fn end_stream(&self, tenant_id: &str) -> Result<CounterRecord, CoreError> {
        let (record, ()) = self
            .with_record(tenant_id, |record| {
                record.stream_started = None;
                record.last_notified_stream_id = None;
            })
            .await?;
        Ok(record)
    }

    pub async fn get_last_notified_stream_id(
        &self,
        tenant_id: &str,
    ) -> Result<Option<String>, CoreError> {
        Ok(self.get(tenant_id).await?.last_notified_stream_id)
    }

    pub async fn set_last_notified_stream_id(
        &self,
        tenant_id: &str,
        stream_id: Option<String>,
    ) -> Result<(), CoreError> {
        self.with_record(tenant_id, |record| {
            record.last_notified_stream_id = stream_id;
        })
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Series snapshots
    // -----------------------------------------------------------------------

    /// Capture the current deaths/swears/bits under the tenant's slot, then
    /// persist the snapshot.
    pub async fn save_series(
        &self,
        tenant_id: &str,
        name: &str,
        description: &str,
    ) -> Result<SeriesSnapshot, CoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::InvalidInput("series name is empty".to_owned()));
        }
        let record = self.get(tenant_id).await?;
        let now = Utc::now();
        let snapshot = SeriesSnapshot {
            series_id: format!("{}_{}", now.timestamp_millis(), sanitize_series_name(name)),
            series_name: name.to_owned(),
            description: description.to_owned(),
            deaths: record.deaths,
            swears: record.swears,
            bits: record.bits,
            saved_at: now,
        };
        self.records.put_series(tenant_id, &snapshot).await?;
        Ok(snapshot)
    }

    /// Restore deaths/swears/bits from a snapshot; screams,
    /// `stream_started` and `last_notified_stream_id` are untouched.
    pub async fn load_series(
        &self,
        tenant_id: &str,
        series_id: &str,
    ) -> Result<MutationOutcome, CoreError> {
        let snapshot = self
            .records
            .get_series(tenant_id, series_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("series {series_id}")))?;
        let (record, change) = self
            .with_record(tenant_id, |record| {
                let change = CounterChange {
                    deaths: snapshot.deaths as i64 - record.deaths as i64,
                    swears: snapshot.swears as i64 - record.swears as i64,
                    screams: 0,
                    bits: snapshot.bits as i64 - record.bits as i64,
                };
                record.deaths = snapshot.deaths;
                record.swears = snapshot.swears;
                record.bits = snapshot.bits;
                change
            })
            .await?;
        Ok(MutationOutcome {
            record,
            change,
            milestones: Vec::new(),
        })
    }

    pub async fn list_series(&self, tenant_id: &str) -> Result<Vec<SeriesSnapshot>, CoreError> {
        Ok(self.records.list_series(tenant_id).await?)
    }

    pub async fn delete_series(&self, tenant_id: &str, series_id: &str) -> Result<(), CoreError> {
        if self.records.delete_series(tenant_id, series_id).await? {
            Ok(())
        } else {
            Err(CoreError::NotFound(format!("series {series_id}")))
        }
    }
}

fn apply_change(change: &mut CounterChange, kind: CounterKind, delta: i64) {
    match kind {
        CounterKind::Deaths => change.deaths = delta,
        CounterKind::Swears => change.swears = delta,
        CounterKind::Screams => change.screams = delta,
    }
}

/// Milestones crossed moving from `prev` to `next`, ascending.
///
/// One record per `t` with `prev < t <= next`; `previous_milestone` is the
/// largest configured threshold below `t`, or 0.
fn crossed(thresholds: &[u64], kind: CounterKind, prev: u64, next: u64) -> Vec<MilestoneRecord> {
    let mut sorted: Vec<u64> = thresholds.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    sorted
        .iter()
        .filter(|&&t| prev < t && t <= next)
        .map(|&t| MilestoneRecord {
            kind,
            threshold: t,
            previous_milestone: sorted.iter().copied().filter(|&t2| t2 < t).max().unwrap_or(0),
        })
        .collect()
}
