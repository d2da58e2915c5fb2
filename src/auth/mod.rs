//! Role-based, attribute-level access control.
//!
//! Roles are Group resources carrying `permissions` entries. A subject's
//! roles are every group it belongs to, directly or through nested groups;
//! its grant for a (kind, operation) pair is resolved by
//! [`RoleTable::grants_for`] and then narrowed per resource with
//! [`AccessGrant::for_resource`].
//!
//! # Example
//!
//! ```rust
//! use scim_engine::auth::{AttributeRule, MatchMode, Operation, Permission, RoleTable, Subject};
//! use scim_engine::filter::FilterScope;
//! use scim_engine::schema::SchemaRegistry;
//! use serde_json::Map;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = SchemaRegistry::new()?;
//! let user = registry.require_resource_type("User")?;
//!
//! let mut roles = RoleTable::new();
//! roles.add_member("helpdesk", "u-42");
//! roles.add_role("helpdesk", vec![Permission::new(
//!     "User",
//!     Operation::Read,
//!     AttributeRule::Allow("userName,emails".into()),
//!     MatchMode::Any,
//! )]);
//!
//! let grant = roles
//!     .grants_for(&Subject::user("u-42"), user, Operation::Read)
//!     .for_resource(&FilterScope::new(&registry, user), &Map::new());
//! assert!(grant.allows(None, "emails"));
//! assert!(!grant.allows(None, "displayName"));
//! # Ok(())
//! # }
//! ```

pub mod grants;
pub mod permission;

pub use grants::{AccessGrant, ResourceGrant, RoleTable};
pub use permission::{AttributeRule, AttributeSet, MatchMode, Operation, Permission};

use crate::error::{ScimError, ScimResult};
use crate::schema::value::get_attribute;
use crate::schema::{AttributeDefinition, ResourceType, SchemaRegistry, qualified_name};

use log::debug;
use serde_json::{Map, Value};

/// The authenticated caller of an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subject {
    /// Resource id of the caller, when it is a known User
    pub id: Option<String>,
    /// Group ids reported by the authentication collaborator
    pub direct_groups: Vec<String>,
    system: bool,
}

impl Subject {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// A caller with no identity; only direct groups can grant it anything.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Privileged subject that bypasses access control.
    pub fn system() -> Self {
        Self {
            system: true,
            ..Self::default()
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.direct_groups.extend(groups.into_iter().map(Into::into));
        self
    }

    pub fn is_system(&self) -> bool {
        self.system
    }
}

/// Top-level client-writable attributes whose values differ between two
/// canonical attribute maps.
pub fn changed_attributes<'r>(
    registry: &'r SchemaRegistry,
    resource_type: &'r ResourceType,
    before: &Map<String, Value>,
    after: &Map<String, Value>,
) -> Vec<(Option<&'r str>, &'r AttributeDefinition)> {
    registry
        .attributes(resource_type)
        .into_iter()
        .filter(|(_, def)| !def.is_read_only())
        .filter(|(extension, def)| {
            get_attribute(before, *extension, &def.name) != get_attribute(after, *extension, &def.name)
        })
        .collect()
}

/// Every attribute in `changes` must be covered by the write grant.
pub fn check_write(
    grant: &ResourceGrant,
    resource_type: &ResourceType,
    changes: &[(Option<&str>, &AttributeDefinition)],
) -> ScimResult<()> {
    let denied: Vec<String> = changes
        .iter()
        .filter(|(extension, def)| !grant.allows(*extension, &def.name))
        .map(|(extension, def)| qualified_name(*extension, &def.name))
        .collect();
    if denied.is_empty() {
        return Ok(());
    }
    debug!(
        "Write to {} denied for attributes [{}]",
        resource_type.name,
        denied.join(", ")
    );
    Err(ScimError::forbidden(&resource_type.name, "write"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_changed_attributes_ignores_read_only() {
        let registry = SchemaRegistry::new().unwrap();
        let user = registry.resource_type("User").unwrap();
        let before = json!({"userName": "a", "title": "x", "groups": [{"value": "g1"}]});
        let after = json!({"userName": "a", "title": "y", "groups": []});
        let changes = changed_attributes(
            &registry,
            user,
            before.as_object().unwrap(),
            after.as_object().unwrap(),
        );
        let names: Vec<&str> = changes.iter().map(|(_, d)| d.name.as_str()).collect();
        assert_eq!(names, vec!["title"]);
    }

    #[test]
    fn test_check_write_requires_full_cover() {
        let registry = SchemaRegistry::new().unwrap();
        let user = registry.resource_type("User").unwrap();
        let title = registry.resolve_str(user, "title").unwrap().attribute;
        let user_name = registry.resolve_str(user, "userName").unwrap().attribute;

        let mut roles = RoleTable::new();
        roles.add_role(
            "g1",
            vec![Permission::new(
                "User",
                Operation::Write,
                AttributeRule::Allow("title".into()),
                MatchMode::Any,
            )],
        );
        let scope = crate::filter::FilterScope::new(&registry, user);
        let grant = roles
            .grants_for(&Subject::user("u1").with_groups(["g1"]), user, Operation::Write)
            .for_resource(&scope, &Map::new());

        assert!(check_write(&grant, user, &[(None, title)]).is_ok());
        let err = check_write(&grant, user, &[(None, title), (None, user_name)]).unwrap_err();
        assert!(matches!(err, ScimError::Forbidden { .. }));
    }
}
