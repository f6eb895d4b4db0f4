//! In-process store backend used by tests and single-node development.

use crate::store::{Store, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// A `Store` over a process-local map. Atomicity per (partition, row) falls
/// out of the single write lock.
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<(String, String), Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, partition: &str, row: &str) -> Result<Option<Value>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows.get(&(partition.to_owned(), row.to_owned())).cloned())
    }

    async fn upsert(&self, partition: &str, row: &str, body: Value) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        rows.insert((partition.to_owned(), row.to_owned()), body);
        Ok(())
    }

    async fn list(&self, partition: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|((p, _), _)| p == partition)
            .map(|((_, r), body)| (r.clone(), body.clone()))
            .collect())
    }

    async fn delete(&self, partition: &str, row: &str) -> Result<bool, StoreError> {
        let mut rows = self.rows.write().await;
        Ok(rows
            .remove(&(partition.to_owned(), row.to_owned()))
            .is_some())
    }
}
