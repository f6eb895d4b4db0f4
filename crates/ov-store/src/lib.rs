// ov-store: Typed record storage for the overlay broker.
//
// Two pluggable backends implement the same four operations the core
// consumes: get / upsert / list / delete, atomic per (partition, row).
// Partitions isolate tenants. Record bodies are JSON strings at rest;
// this crate is the only place that knows about that encoding — everything
// above the `Records` adapter works with typed structs.

pub mod defaults;
pub mod memory;
pub mod records;
pub mod sqlite;
mod store;

pub use memory::MemoryStore;
pub use records::{CounterRecord, CredentialTuple, Role, TenantRecord};
pub use sqlite::SqliteStore;
pub use store::{Records, Store, StoreError};

// ---------------------------------------------------------------------------
// Partition / row layout
// ---------------------------------------------------------------------------

/// Partition holding one row per tenant, keyed by tenant id.
pub const PARTITION_USERS: &str = "user";
/// Row key for the per-tenant counter record (partition = tenant id).
pub const ROW_COUNTERS: &str = "counters";
/// Row key for the per-tenant event-to-alert mapping.
pub const ROW_EVENT_MAPPINGS: &str = "event-mappings";
/// Row key for the per-tenant milestone threshold lists.
pub const ROW_MILESTONES: &str = "milestones";

/// Row key for one series snapshot.
pub fn series_row(series_id: &str) -> String {
    format!("series:{series_id}")
}

/// Row key for one alert definition.
pub fn alert_row(alert_id: &str) -> String {
    format!("alerts:{alert_id}")
}

/// Replace every character outside `[A-Za-z0-9]` with `_`.
pub fn sanitize_series_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
