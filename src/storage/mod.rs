//! Storage abstraction for resource records.
//!
//! The storage layer persists opaque JSON records keyed by resource type and
//! id. It knows nothing about schemas, versions or access control; those
//! belong to the coordinator. Writes are grouped into a [`WriteBatch`] that a
//! backend must apply atomically, which is what lets the coordinator commit a
//! mutation together with its back-reference repairs.
//!
//! ```rust
//! use scim_engine::storage::{InMemoryStorage, StorageKey, StorageProvider, WriteBatch};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = InMemoryStorage::new();
//!
//! let mut batch = WriteBatch::new();
//! batch.put(StorageKey::new("User", "u1"), json!({"id": "u1"}));
//! batch.put(StorageKey::new("Group", "g1"), json!({"id": "g1"}));
//! storage.commit(batch).await?;
//!
//! assert!(storage.get(StorageKey::new("User", "u1")).await?.is_some());
//! assert_eq!(storage.list("Group").await?.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod in_memory;

pub use errors::StorageError;
pub use in_memory::{InMemoryStorage, InMemoryStorageStats};

use serde_json::Value;
use std::fmt;
use std::future::Future;

/// Identifies one stored record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey {
    resource_type: String,
    resource_id: String,
}

impl StorageKey {
    pub fn new(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.resource_id)
    }
}

/// One write in a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put(StorageKey, Value),
    Delete(StorageKey),
}

impl WriteOp {
    pub fn key(&self) -> &StorageKey {
        match self {
            WriteOp::Put(key, _) | WriteOp::Delete(key) => key,
        }
    }
}

/// Writes applied together or not at all.
///
/// A later write to the same key replaces an earlier one in the batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: StorageKey, data: Value) -> &mut Self {
        self.push(WriteOp::Put(key, data))
    }

    pub fn delete(&mut self, key: StorageKey) -> &mut Self {
        self.push(WriteOp::Delete(key))
    }

    fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.retain(|existing| existing.key() != op.key());
        self.ops.push(op);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Pluggable persistence for resource records.
///
/// # Contract
///
/// - `get` returns exactly what the last committed `Put` stored.
/// - `list` returns every record of a type ordered by id.
/// - `find_by_attribute` matches a string value at a key path,
///   ASCII-case-insensitively, descending into arrays along the way.
/// - `commit` applies the whole batch atomically: concurrent readers observe
///   either none of it or all of it.
pub trait StorageProvider: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn get(
        &self,
        key: StorageKey,
    ) -> impl Future<Output = Result<Option<Value>, Self::Error>> + Send;

    fn list(
        &self,
        resource_type: &str,
    ) -> impl Future<Output = Result<Vec<(StorageKey, Value)>, Self::Error>> + Send;

    /// Records whose value at `path` equals `value`.
    ///
    /// `path` is a sequence of object keys; keys may contain dots (schema
    /// URNs do), so it is not a dotted string.
    fn find_by_attribute(
        &self,
        resource_type: &str,
        path: &[&str],
        value: &str,
    ) -> impl Future<Output = Result<Vec<(StorageKey, Value)>, Self::Error>> + Send;

    fn commit(&self, batch: WriteBatch) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Whether any string reachable at `path` in `data` equals `value`
/// ignoring ASCII case.
pub fn value_at_path_matches(data: &Value, path: &[&str], value: &str) -> bool {
    match data {
        Value::Array(items) => items.iter().any(|item| value_at_path_matches(item, path, value)),
        _ => match path.split_first() {
            Some((head, rest)) => data
                .get(*head)
                .is_some_and(|next| value_at_path_matches(next, rest, value)),
            None => data.as_str().is_some_and(|s| s.eq_ignore_ascii_case(value)),
        },
    }
}
