//! Resource bodies reused across suites.

use serde_json::{Value, json};

pub const ENTERPRISE: &str = "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User";

pub fn bjensen() -> Value {
    json!({
        "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"],
        "userName": "bjensen",
        "name": {"givenName": "Barbara", "familyName": "Jensen"},
        "displayName": "Babs Jensen",
        "emails": [
            {"value": "bjensen@work.com", "type": "work", "primary": true},
            {"value": "babs@home.org", "type": "home"}
        ],
        "active": true
    })
}

/// Four users of which only `alice` has a work email ending in `.com`.
pub fn search_population() -> Vec<Value> {
    vec![
        json!({
            "userName": "alice",
            "emails": [{"value": "alice@work.com", "type": "work"}]
        }),
        json!({
            "userName": "bob",
            "emails": [{"value": "bob@work.org", "type": "work"}]
        }),
        json!({
            "userName": "carol",
            "emails": [{"value": "carol@home.com", "type": "home"}]
        }),
        json!({"userName": "dave"}),
    ]
}

pub fn employee(user_name: &str, number: &str, department: &str) -> Value {
    json!({
        "userName": user_name,
        ENTERPRISE: {"employeeNumber": number, "department": department}
    })
}

pub fn read_permission(kind: &str, allow: &str, mode: &str) -> Value {
    json!({
        "resourceType": kind,
        "operation": "read",
        "allowAttributes": allow,
        "matchMode": mode
    })
}

pub fn write_permission(kind: &str, allow: &str) -> Value {
    json!({
        "resourceType": kind,
        "operation": "write",
        "allowAttributes": allow,
        "matchMode": "ANY"
    })
}
