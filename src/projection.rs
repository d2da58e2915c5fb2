//! Attribute projection for responses.
//!
//! A representation is shaped in two steps. The schema return policy and the
//! caller's `attributes`/`excludedAttributes` choose the candidate attributes;
//! the candidates are then intersected with the subject's read grant. `id`,
//! `schemas` and `meta` are kept regardless, since callers need them to
//! address and version the resource.

use crate::auth::ResourceGrant;
use crate::schema::{AttributeDefinition, ResourceType, Returned, SchemaRegistry, is_urn};

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::collections::hash_map::Entry;

/// Keys returned with every representation.
pub const ALWAYS_RETURNED: [&str; 3] = ["id", "schemas", "meta"];

/// The `attributes` / `excludedAttributes` request parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeSelection {
    pub attributes: Vec<String>,
    pub excluded_attributes: Vec<String>,
}

impl AttributeSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries may themselves be comma-separated lists.
    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.attributes.extend(split_tokens(attributes));
        self
    }

    pub fn excluding<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.excluded_attributes.extend(split_tokens(attributes));
        self
    }

    /// No attributes were explicitly requested.
    pub fn requests_nothing(&self) -> bool {
        self.attributes.is_empty()
    }
}

fn split_tokens<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .flat_map(|item| {
            item.as_ref()
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Which part of an attribute a selection token names.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pick {
    Whole,
    Subs(Vec<String>),
}

impl Pick {
    fn merge(&mut self, other: Pick) {
        match (self, other) {
            (Pick::Whole, _) => {}
            (this, Pick::Whole) => *this = Pick::Whole,
            (Pick::Subs(subs), Pick::Subs(more)) => subs.extend(more),
        }
    }
}

fn pick_key(extension: Option<&str>, name: &str) -> String {
    crate::schema::qualified_name(extension, name).to_ascii_lowercase()
}

/// Resolve selection tokens; unknown names are ignored.
fn picks(
    registry: &SchemaRegistry,
    resource_type: &ResourceType,
    tokens: &[String],
) -> HashMap<String, Pick> {
    let mut out: HashMap<String, Pick> = HashMap::new();
    let mut add = |key: String, pick: Pick| match out.entry(key) {
        Entry::Occupied(mut existing) => existing.get_mut().merge(pick),
        Entry::Vacant(slot) => {
            slot.insert(pick);
        }
    };

    for token in tokens {
        if is_urn(token) {
            if let Some(ext) = registry.extension_schema(resource_type, token) {
                for def in &ext.attributes {
                    add(pick_key(Some(&ext.id), &def.name), Pick::Whole);
                }
                continue;
            }
        }
        let Some(resolved) = registry.resolve_str(resource_type, token) else {
            continue;
        };
        let key = pick_key(resolved.extension, &resolved.attribute.name);
        match resolved.sub_attribute {
            Some(sub) => add(key, Pick::Subs(vec![sub.name.clone()])),
            None => add(key, Pick::Whole),
        }
    }
    out
}

/// Shape a stored representation for one caller.
pub fn project(
    registry: &SchemaRegistry,
    resource_type: &ResourceType,
    resource: &Map<String, Value>,
    selection: &AttributeSelection,
    grant: &ResourceGrant,
) -> Map<String, Value> {
    let requested = picks(registry, resource_type, &selection.attributes);
    let excluded = picks(registry, resource_type, &selection.excluded_attributes);

    let mut out = Map::new();
    for key in ALWAYS_RETURNED {
        if let Some(value) = resource.get(key) {
            out.insert(key.to_string(), value.clone());
        }
    }

    for (extension, def) in registry.attributes(resource_type) {
        if ALWAYS_RETURNED.iter().any(|k| k.eq_ignore_ascii_case(&def.name)) && extension.is_none() {
            continue;
        }
        let Some(value) = crate::schema::value::get_attribute(resource, extension, &def.name) else {
            continue;
        };
        if def.is_never_returned() {
            continue;
        }

        let key = pick_key(extension, &def.name);
        let shaped = if !grant.allows(extension, &def.name) {
            None
        } else if def.returned == Returned::Always {
            strip_hidden(def, value)
        } else if !selection.requests_nothing() {
            match requested.get(&key) {
                Some(Pick::Whole) => strip_hidden(def, value),
                Some(Pick::Subs(subs)) => keep_subs(def, value, subs),
                None => None,
            }
        } else if def.returned == Returned::Request {
            None
        } else {
            match excluded.get(&key) {
                Some(Pick::Whole) => None,
                Some(Pick::Subs(subs)) => drop_subs(def, value, subs),
                None => strip_hidden(def, value),
            }
        };

        if let Some(shaped) = shaped {
            crate::schema::value::set_attribute(&mut out, extension, &def.name, Some(shaped));
        }
    }
    out
}

/// Apply `f` to every complex element of `value` and drop emptied elements.
fn map_elements(
    value: &Value,
    f: impl Fn(&Map<String, Value>) -> Map<String, Value>,
) -> Option<Value> {
    match value {
        Value::Object(object) => {
            let shaped = f(object);
            (!shaped.is_empty()).then_some(Value::Object(shaped))
        }
        Value::Array(items) => {
            let shaped: Vec<Value> = items
                .iter()
                .filter_map(|item| match item {
                    Value::Object(object) => {
                        let shaped = f(object);
                        (!shaped.is_empty()).then_some(Value::Object(shaped))
                    }
                    other => Some(other.clone()),
                })
                .collect();
            (!shaped.is_empty()).then_some(Value::Array(shaped))
        }
        other => Some(other.clone()),
    }
}

fn sub_visible(def: &AttributeDefinition, key: &str) -> bool {
    def.sub_attribute(key).is_none_or(|sub| !sub.is_never_returned())
}

fn strip_hidden(def: &AttributeDefinition, value: &Value) -> Option<Value> {
    if !def.is_complex() {
        return Some(value.clone());
    }
    map_elements(value, |object| {
        object
            .iter()
            .filter(|(k, _)| sub_visible(def, k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    })
}

fn keep_subs(def: &AttributeDefinition, value: &Value, subs: &[String]) -> Option<Value> {
    map_elements(value, |object| {
        object
            .iter()
            .filter(|(k, _)| sub_visible(def, k) && subs.iter().any(|s| s.eq_ignore_ascii_case(k)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    })
}

fn drop_subs(def: &AttributeDefinition, value: &Value, subs: &[String]) -> Option<Value> {
    map_elements(value, |object| {
        object
            .iter()
            .filter(|(k, _)| sub_visible(def, k) && !subs.iter().any(|s| s.eq_ignore_ascii_case(k)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    })
}
