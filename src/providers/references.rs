//! Group membership and its inverse references.
//!
//! A Group's `members` list is the forward edge; every member (User or
//! nested Group) carries the inverse edge in its read-only `groups` list.
//! The helpers here compute what has to change on the member side when a
//! group changes, and [`Staging`] collects those changes so that each
//! touched resource is written, and versioned, once per commit.

use crate::resource::Resource;
pub use crate::resource::resource::display_of;
use crate::storage::{StorageError, StorageKey, WriteBatch};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

pub const MEMBERS: &str = "members";
pub const GROUPS: &str = "groups";
pub const GROUP: &str = "Group";

/// Resource kinds a member reference may point at, in lookup order.
pub const MEMBER_KINDS: [&str; 2] = ["User", "Group"];

/// Ids listed in `members`, in order, without duplicates.
pub fn member_ids(attributes: &Map<String, Value>) -> Vec<String> {
    let mut seen = HashSet::new();
    attributes
        .get(MEMBERS)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|member| member.get("value").and_then(Value::as_str))
        .filter(|id| seen.insert(id.to_string()))
        .map(str::to_string)
        .collect()
}

/// The kind recorded on a member entry, when the server filled it in.
pub fn member_kind<'a>(attributes: &'a Map<String, Value>, member_id: &str) -> Option<&'a str> {
    attributes
        .get(MEMBERS)?
        .as_array()?
        .iter()
        .find(|m| m.get("value").and_then(Value::as_str) == Some(member_id))?
        .get("type")?
        .as_str()
}

/// Member-side difference between two states of one group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDelta {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub retained: Vec<String>,
}

impl MembershipDelta {
    pub fn between(before: &Map<String, Value>, after: &Map<String, Value>) -> Self {
        let old = member_ids(before);
        let new = member_ids(after);
        let mut delta = Self::default();
        for id in &new {
            if old.contains(id) {
                delta.retained.push(id.clone());
            } else {
                delta.added.push(id.clone());
            }
        }
        delta.removed = old.into_iter().filter(|id| !new.contains(id)).collect();
        delta
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// The `members` element the server stores for `target`.
pub fn member_entry(target: &Resource, location: String) -> Value {
    let mut entry = Map::new();
    entry.insert("value".into(), Value::String(target.id.clone()));
    if let Some(display) = target.display() {
        entry.insert("display".into(), Value::String(display.to_string()));
    }
    entry.insert("type".into(), Value::String(target.resource_type.clone()));
    entry.insert("$ref".into(), Value::String(location));
    Value::Object(entry)
}

/// The `groups` element a member carries for `group`.
pub fn back_reference(group: &Resource, location: String) -> Value {
    let mut entry = Map::new();
    entry.insert("value".into(), Value::String(group.id.clone()));
    if let Some(display) = group.display() {
        entry.insert("display".into(), Value::String(display.to_string()));
    }
    entry.insert("type".into(), Value::String("direct".into()));
    entry.insert("$ref".into(), Value::String(location));
    Value::Object(entry)
}

fn entry_id(entry: &Value) -> Option<&str> {
    entry.get("value").and_then(Value::as_str)
}

/// Insert or refresh the entry with the same `value`; returns whether
/// anything changed.
fn upsert(attributes: &mut Map<String, Value>, key: &str, entry: Value) -> bool {
    let Some(Value::Array(items)) = attributes.get_mut(key) else {
        attributes.insert(key.to_string(), Value::Array(vec![entry]));
        return true;
    };
    match items.iter_mut().find(|e| entry_id(e) == entry_id(&entry)) {
        Some(existing) if *existing == entry => false,
        Some(existing) => {
            *existing = entry;
            true
        }
        None => {
            items.push(entry);
            true
        }
    }
}

/// Drop entries whose `value` is `id`; an emptied list is removed.
fn prune(attributes: &mut Map<String, Value>, key: &str, id: &str) -> bool {
    let Some(Value::Array(items)) = attributes.get_mut(key) else {
        return false;
    };
    let before = items.len();
    items.retain(|e| entry_id(e) != Some(id));
    let changed = items.len() != before;
    if items.is_empty() {
        attributes.remove(key);
    }
    changed
}

pub fn add_back_reference(member: &mut Map<String, Value>, entry: Value) -> bool {
    upsert(member, GROUPS, entry)
}

pub fn remove_back_reference(member: &mut Map<String, Value>, group_id: &str) -> bool {
    prune(member, GROUPS, group_id)
}

pub fn remove_member(group: &mut Map<String, Value>, member_id: &str) -> bool {
    prune(group, MEMBERS, member_id)
}

/// Rewrite `display` on the group's entry for `member_id`.
pub fn refresh_member_display(
    group: &mut Map<String, Value>,
    member_id: &str,
    display: Option<&str>,
) -> bool {
    let Some(Value::Array(items)) = group.get_mut(MEMBERS) else {
        return false;
    };
    let mut changed = false;
    for entry in items.iter_mut().filter(|e| entry_id(e) == Some(member_id)) {
        let Value::Object(fields) = entry else {
            continue;
        };
        let current = fields.get("display").and_then(Value::as_str);
        if current == display {
            continue;
        }
        match display {
            Some(display) => fields.insert("display".into(), Value::String(display.into())),
            None => fields.remove("display"),
        };
        changed = true;
    }
    changed
}

/// A resource loaded for repair, and whether repair changed it.
#[derive(Debug, Clone)]
pub struct StagedResource {
    pub resource: Resource,
    pub changed: bool,
}

impl StagedResource {
    pub fn update(&mut self, f: impl FnOnce(&mut Map<String, Value>) -> bool) {
        if f(&mut self.resource.attributes) {
            self.changed = true;
        }
    }
}

/// Resources touched by one mutation besides its primary target.
///
/// The primary target is excluded: it is written by the caller, and after a
/// delete it must not be resurrected by a repair write.
#[derive(Debug, Default)]
pub struct Staging {
    primary: Option<StorageKey>,
    entries: BTreeMap<StorageKey, StagedResource>,
}

impl Staging {
    pub fn new(primary: StorageKey) -> Self {
        Self {
            primary: Some(primary),
            entries: BTreeMap::new(),
        }
    }

    pub fn is_primary(&self, key: &StorageKey) -> bool {
        self.primary.as_ref() == Some(key)
    }

    pub fn contains(&self, key: &StorageKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, resource: Resource) {
        let key = resource.key();
        if self.is_primary(&key) {
            return;
        }
        self.entries.entry(key).or_insert(StagedResource {
            resource,
            changed: false,
        });
    }

    pub fn get_mut(&mut self, key: &StorageKey) -> Option<&mut StagedResource> {
        self.entries.get_mut(key)
    }

    /// Keys of the resources repair actually changed.
    pub fn changed_keys(&self) -> impl Iterator<Item = &StorageKey> {
        self.entries
            .iter()
            .filter(|(_, staged)| staged.changed)
            .map(|(key, _)| key)
    }

    /// Version every changed resource once and add it to `batch`.
    pub fn write_into(self, batch: &mut WriteBatch, now: DateTime<Utc>) -> Result<(), StorageError> {
        for (key, staged) in self.entries {
            if !staged.changed {
                continue;
            }
            let mut resource = staged.resource;
            resource.touch(now);
            batch.put(key, resource.to_record()?);
        }
        Ok(())
    }
}
