//! Shared fixtures for the integration suites.
//!
//! Each suite pulls this in with `mod common;` and uses only part of it.

#![allow(dead_code)]

pub mod fixtures;

use scim_engine::auth::Subject;
use scim_engine::config::{EngineConfig, ScimEngineBuilder};
use scim_engine::patch::PatchRequest;
use scim_engine::projection::AttributeSelection;
use scim_engine::providers::{ResourceCoordinator, ResourceResult};
use scim_engine::resource::{Preconditions, RequestContext};
use scim_engine::storage::{
    InMemoryStorage, StorageError, StorageKey, StorageProvider, WriteBatch,
};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub type Engine = ResourceCoordinator<InMemoryStorage>;

/// Route `log` output through the test harness; safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn engine() -> Engine {
    init_logging();
    ScimEngineBuilder::new(InMemoryStorage::new())
        .build()
        .expect("default engine")
}

pub fn engine_with(config: EngineConfig) -> Engine {
    init_logging();
    ScimEngineBuilder::new(InMemoryStorage::new())
        .with_config(config)
        .build()
        .expect("configured engine")
}

/// The privileged bootstrap subject.
pub fn admin() -> RequestContext {
    RequestContext::for_subject(Subject::system())
}

pub fn as_user(id: &str) -> RequestContext {
    RequestContext::for_subject(Subject::user(id))
}

pub fn all() -> AttributeSelection {
    AttributeSelection::new()
}

pub fn none() -> Preconditions {
    Preconditions::none()
}

pub async fn create(engine: &Engine, kind: &str, body: Value) -> ResourceResult {
    engine
        .create(kind, &body, &all(), &admin())
        .await
        .unwrap_or_else(|e| panic!("create {} failed: {}", kind, e))
}

pub async fn create_user(engine: &Engine, user_name: &str) -> String {
    create(engine, "User", json!({"userName": user_name})).await.id
}

pub async fn create_group(engine: &Engine, name: &str, members: &[&str]) -> String {
    let members: Vec<Value> = members.iter().map(|id| json!({"value": id})).collect();
    create(
        engine,
        "Group",
        json!({"displayName": name, "members": members}),
    )
    .await
    .id
}

/// A role group with `permissions` and the given members.
pub async fn create_role(engine: &Engine, name: &str, members: &[&str], permissions: Value) -> String {
    let members: Vec<Value> = members.iter().map(|id| json!({"value": id})).collect();
    create(
        engine,
        "Group",
        json!({"displayName": name, "members": members, "permissions": permissions}),
    )
    .await
    .id
}

/// Full stored view of a resource as the system subject sees it.
pub async fn fetch(engine: &Engine, kind: &str, id: &str) -> ResourceResult {
    engine
        .get(kind, id, &none(), &all(), &admin())
        .await
        .unwrap_or_else(|e| panic!("get {}/{} failed: {}", kind, id, e))
}

pub async fn body(engine: &Engine, kind: &str, id: &str) -> Map<String, Value> {
    fetch(engine, kind, id).await.resource.expect("get returns a body")
}

pub fn patch_ops(operations: Value) -> PatchRequest {
    PatchRequest::from_json(&json!({
        "schemas": ["urn:ietf:params:scim:api:messages:2.0:PatchOp"],
        "Operations": operations
    }))
    .expect("valid patch request")
}

/// Ids listed under `key` (`members` or `groups`).
pub fn ids_under(body: &Map<String, Value>, key: &str) -> Vec<String> {
    body.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("value").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// In-memory storage whose commits can be switched to fail.
#[derive(Debug, Clone, Default)]
pub struct FailingStorage {
    inner: InMemoryStorage,
    fail_commits: Arc<AtomicBool>,
}

impl FailingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

impl StorageProvider for FailingStorage {
    type Error = StorageError;

    async fn get(&self, key: StorageKey) -> Result<Option<Value>, Self::Error> {
        self.inner.get(key).await
    }

    async fn list(&self, resource_type: &str) -> Result<Vec<(StorageKey, Value)>, Self::Error> {
        self.inner.list(resource_type).await
    }

    async fn find_by_attribute(
        &self,
        resource_type: &str,
        path: &[&str],
        value: &str,
    ) -> Result<Vec<(StorageKey, Value)>, Self::Error> {
        self.inner.find_by_attribute(resource_type, path, value).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), Self::Error> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable("commit rejected by test backend"));
        }
        self.inner.commit(batch).await
    }
}
