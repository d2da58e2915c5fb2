//! In-memory storage backend.
//!
//! Records live in `resource_type → id → record` maps behind one tokio
//! `RwLock`. A batch commit holds the write lock for the whole batch, so
//! readers never observe half of it. Ids are kept in a `BTreeMap`, which gives
//! `list` its stable id ordering.

use crate::storage::{
    StorageError, StorageKey, StorageProvider, WriteBatch, WriteOp, value_at_path_matches,
};

use log::trace;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

type Records = HashMap<String, BTreeMap<String, Value>>;

/// Thread-safe in-memory storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    data: Arc<RwLock<Records>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stats(&self) -> InMemoryStorageStats {
        let data = self.data.read().await;
        InMemoryStorageStats {
            resource_type_count: data.values().filter(|records| !records.is_empty()).count(),
            total_resources: data.values().map(BTreeMap::len).sum(),
        }
    }

    /// Remove every record (test helper).
    pub async fn clear(&self) {
        self.data.write().await.clear();
    }
}

impl StorageProvider for InMemoryStorage {
    type Error = StorageError;

    async fn get(&self, key: StorageKey) -> Result<Option<Value>, Self::Error> {
        let data = self.data.read().await;
        Ok(data
            .get(key.resource_type())
            .and_then(|records| records.get(key.resource_id()))
            .cloned())
    }

    async fn list(&self, resource_type: &str) -> Result<Vec<(StorageKey, Value)>, Self::Error> {
        let data = self.data.read().await;
        Ok(data
            .get(resource_type)
            .map(|records| {
                records
                    .iter()
                    .map(|(id, record)| (StorageKey::new(resource_type, id.clone()), record.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_by_attribute(
        &self,
        resource_type: &str,
        path: &[&str],
        value: &str,
    ) -> Result<Vec<(StorageKey, Value)>, Self::Error> {
        let data = self.data.read().await;
        Ok(data
            .get(resource_type)
            .map(|records| {
                records
                    .iter()
                    .filter(|(_, record)| value_at_path_matches(record, path, value))
                    .map(|(id, record)| (StorageKey::new(resource_type, id.clone()), record.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), Self::Error> {
        let mut data = self.data.write().await;
        trace!("Committing batch of {} writes", batch.len());
        for op in batch.into_ops() {
            match op {
                WriteOp::Put(key, record) => {
                    data.entry(key.resource_type().to_string())
                        .or_default()
                        .insert(key.resource_id().to_string(), record);
                }
                WriteOp::Delete(key) => {
                    if let Some(records) = data.get_mut(key.resource_type()) {
                        records.remove(key.resource_id());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Record counts for debugging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InMemoryStorageStats {
    pub resource_type_count: usize,
    pub total_resources: usize,
}
