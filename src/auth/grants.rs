//! Role graph and grant resolution.
//!
//! Group membership forms a directed graph (member → group) that may contain
//! cycles. [`RoleTable`] owns that graph as an adjacency map and walks it
//! breadth-first with a visited set, so every role reachable from a subject is
//! visited exactly once.

use super::permission::{AttributeSet, MatchMode, Operation, Permission};
use super::Subject;
use crate::filter::{FilterNode, FilterScope};
use crate::schema::{ResourceType, SchemaRegistry};

use log::{debug, trace};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};

/// Role-to-grant mapping derived from committed Group state.
#[derive(Debug, Clone, Default)]
pub struct RoleTable {
    /// Group id → permission entries
    roles: HashMap<String, Vec<Permission>>,
    /// Member id → ids of the groups that list it
    parents: HashMap<String, Vec<String>>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the table from Group resource representations.
    pub fn from_groups<'a>(groups: impl IntoIterator<Item = &'a Map<String, Value>>) -> Self {
        let mut table = Self::new();
        for group in groups {
            let Some(id) = group.get("id").and_then(Value::as_str) else {
                continue;
            };
            let permissions: Vec<Permission> = group
                .get("permissions")
                .and_then(Value::as_array)
                .map(|entries| entries.iter().filter_map(Permission::from_value).collect())
                .unwrap_or_default();
            let members = group
                .get("members")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|m| m.get("value").and_then(Value::as_str));
            for member in members {
                table.add_member(id, member);
            }
            if !permissions.is_empty() {
                table.roles.insert(id.to_string(), permissions);
            }
        }
        debug!(
            "Built role table with {} roles over {} members",
            table.roles.len(),
            table.parents.len()
        );
        table
    }

    pub fn add_role(&mut self, group_id: impl Into<String>, permissions: Vec<Permission>) {
        self.roles.entry(group_id.into()).or_default().extend(permissions);
    }

    pub fn add_member(&mut self, group_id: &str, member_id: &str) {
        let parents = self.parents.entry(member_id.to_string()).or_default();
        if !parents.iter().any(|p| p == group_id) {
            parents.push(group_id.to_string());
        }
    }

    /// Every group the subject belongs to, directly or through nesting.
    pub fn groups_of(&self, subject: &Subject) -> Vec<String> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut order = Vec::new();

        let direct = subject.direct_groups.iter().cloned();
        let derived = subject
            .id
            .as_ref()
            .and_then(|id| self.parents.get(id))
            .into_iter()
            .flatten()
            .cloned();
        for group in direct.chain(derived) {
            if visited.insert(group.clone()) {
                queue.push_back(group);
            }
        }

        while let Some(group) = queue.pop_front() {
            if let Some(parents) = self.parents.get(&group) {
                for parent in parents {
                    if visited.insert(parent.clone()) {
                        queue.push_back(parent.clone());
                    }
                }
            }
            order.push(group);
        }
        order
    }

    /// Resolve the subject's grant for one operation on one kind.
    ///
    /// Entries naming the exact kind, in any of the subject's roles, suppress
    /// every wildcard entry. The remaining entries are unioned across roles,
    /// and `NONE` entries are subtracted from the union. No applicable entry
    /// at all yields an empty grant.
    ///
    /// Suppression is subject-wide rather than per role: a wildcard entry in
    /// a role with no exact-kind entry is still dropped when some other role
    /// of the subject names the kind.
    pub fn grants_for(
        &self,
        subject: &Subject,
        resource_type: &ResourceType,
        operation: Operation,
    ) -> AccessGrant {
        if subject.is_system() {
            return AccessGrant::unrestricted();
        }

        let candidates: Vec<(String, &Permission)> = self
            .groups_of(subject)
            .into_iter()
            .filter_map(|group| self.roles.get(&group).map(|perms| (group, perms)))
            .flat_map(|(group, perms)| {
                perms
                    .iter()
                    .filter(|p| p.operation == operation)
                    .map(move |p| (group.clone(), p))
            })
            .collect();
        let exact = candidates
            .iter()
            .any(|(_, p)| p.applies_to_kind(&resource_type.name));

        let mut grant = AccessGrant::default();
        let applicable = candidates.iter().filter(|(_, p)| {
            if exact {
                p.applies_to_kind(&resource_type.name)
            } else {
                p.is_wildcard()
            }
        });
        for (group, permission) in applicable {
            let attributes = permission.attributes.bind(&resource_type.schema);
            trace!(
                "Role '{}' contributes {:?} {} grant on {}",
                group, permission.match_mode, operation, resource_type.name
            );
            match permission.match_mode {
                MatchMode::None => grant.deny.push(attributes),
                MatchMode::Any => grant.rules.push(GrantRule {
                    attributes,
                    filter: None,
                }),
                MatchMode::All => grant.rules.push(GrantRule {
                    attributes,
                    filter: permission.filter.clone(),
                }),
            }
        }
        grant
    }
}

#[derive(Debug, Clone)]
struct GrantRule {
    attributes: AttributeSet,
    /// Resources this rule is limited to; `None` means every resource
    filter: Option<FilterNode>,
}

/// A subject's resolved grant for one (kind, operation) pair.
#[derive(Debug, Clone, Default)]
pub struct AccessGrant {
    rules: Vec<GrantRule>,
    deny: Vec<AttributeSet>,
}

impl AccessGrant {
    pub fn unrestricted() -> Self {
        Self {
            rules: vec![GrantRule {
                attributes: AttributeSet::all(),
                filter: None,
            }],
            deny: Vec::new(),
        }
    }

    /// No permission entry applies at all.
    pub fn is_denied(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether some rule is limited to matching resources.
    pub fn is_resource_scoped(&self) -> bool {
        self.rules.iter().any(|r| r.filter.is_some())
    }

    /// Narrow the grant to the rules that apply to one resource.
    pub fn for_resource(&self, scope: &FilterScope<'_>, resource: &Map<String, Value>) -> ResourceGrant {
        let allow = self
            .rules
            .iter()
            .filter(|rule| {
                rule.filter
                    .as_ref()
                    .is_none_or(|filter| scope.matches(filter, resource))
            })
            .map(|rule| rule.attributes.clone())
            .collect();
        ResourceGrant {
            allow,
            deny: self.deny.clone(),
        }
    }
}

/// The attribute predicate that applies to one concrete resource.
#[derive(Debug, Clone, Default)]
pub struct ResourceGrant {
    allow: Vec<AttributeSet>,
    deny: Vec<AttributeSet>,
}

impl ResourceGrant {
    pub fn unrestricted() -> Self {
        Self {
            allow: vec![AttributeSet::all()],
            deny: Vec::new(),
        }
    }

    pub fn allows(&self, extension: Option<&str>, name: &str) -> bool {
        self.allow.iter().any(|set| set.contains(extension, name))
            && !self.deny.iter().any(|set| set.contains(extension, name))
    }

    pub fn is_unrestricted(&self) -> bool {
        self.deny.is_empty() && self.allow.iter().any(AttributeSet::is_all)
    }

    /// True when no attribute of the kind is covered.
    pub fn is_empty(&self, registry: &SchemaRegistry, resource_type: &ResourceType) -> bool {
        !registry
            .attributes(resource_type)
            .into_iter()
            .any(|(extension, def)| self.allows(extension, &def.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::permission::AttributeRule;
    use crate::schema::embedded::ENTERPRISE_USER_SCHEMA;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new().unwrap()
    }

    fn read(kind: &str, allow: &str, mode: MatchMode) -> Permission {
        Permission::new(kind, Operation::Read, AttributeRule::Allow(allow.into()), mode)
    }

    fn resolve(table: &RoleTable, subject: &Subject) -> ResourceGrant {
        let registry = registry();
        let user = registry.resource_type("User").unwrap();
        let scope = FilterScope::new(&registry, user);
        table
            .grants_for(subject, user, Operation::Read)
            .for_resource(&scope, &Map::new())
    }

    #[test]
    fn test_nested_groups_with_cycle() {
        let mut table = RoleTable::new();
        table.add_member("g1", "u1");
        table.add_member("g2", "g1");
        table.add_member("g1", "g2");
        table.add_role("g2", vec![read("User", "userName", MatchMode::Any)]);

        let subject = Subject::user("u1");
        let groups = table.groups_of(&subject);
        assert_eq!(groups, vec!["g1".to_string(), "g2".to_string()]);

        let grant = resolve(&table, &subject);
        assert!(grant.allows(None, "userName"));
        assert!(!grant.allows(None, "displayName"));
    }

    #[test]
    fn test_exact_kind_overrides_wildcard_within_role() {
        let mut table = RoleTable::new();
        table.add_role(
            "g1",
            vec![
                read("*", "*", MatchMode::Any),
                read("User", "userName", MatchMode::Any),
            ],
        );
        let grant = resolve(&table, &Subject::user("u1").with_groups(["g1"]));
        assert!(grant.allows(None, "userName"));
        assert!(!grant.allows(None, "emails"));
    }

    #[test]
    fn test_exact_kind_overrides_wildcard_across_roles() {
        let mut table = RoleTable::new();
        table.add_role("g1", vec![read("User", "userName", MatchMode::Any)]);
        table.add_role("g2", vec![read("*", "emails", MatchMode::Any)]);
        let grant = resolve(&table, &Subject::user("u1").with_groups(["g1", "g2"]));
        assert!(grant.allows(None, "userName"));
        assert!(!grant.allows(None, "emails"));
    }

    #[test]
    fn test_same_kind_roles_union() {
        let mut table = RoleTable::new();
        table.add_role("g1", vec![read("User", "userName", MatchMode::Any)]);
        table.add_role("g2", vec![read("user", "emails", MatchMode::Any)]);
        table.add_role("g3", vec![read("*", "title", MatchMode::Any)]);
        let grant = resolve(&table, &Subject::user("u1").with_groups(["g1", "g2", "g3"]));
        assert!(grant.allows(None, "userName"));
        assert!(grant.allows(None, "emails"));
        assert!(!grant.allows(None, "title"));

        let wildcard_only = resolve(&table, &Subject::user("u2").with_groups(["g3"]));
        assert!(wildcard_only.allows(None, "title"));
    }

    #[test]
    fn test_none_is_deny_override() {
        let mut table = RoleTable::new();
        table.add_role("g1", vec![read("User", "userName,emails", MatchMode::Any)]);
        table.add_role("g2", vec![read("User", "userName,emails", MatchMode::None)]);
        let registry = registry();
        let user = registry.resource_type("User").unwrap();
        let grant = resolve(&table, &Subject::user("u1").with_groups(["g1", "g2"]));
        assert!(!grant.allows(None, "userName"));
        assert!(grant.is_empty(&registry, user));
    }

    #[test]
    fn test_no_entries_denies() {
        let registry = registry();
        let user = registry.resource_type("User").unwrap();
        let table = RoleTable::new();
        assert!(table.grants_for(&Subject::user("u1"), user, Operation::Read).is_denied());
        assert!(!table.grants_for(&Subject::system(), user, Operation::Read).is_denied());
    }

    #[test]
    fn test_all_mode_scoped_by_filter() {
        let registry = registry();
        let user = registry.resource_type("User").unwrap();
        let scope = FilterScope::new(&registry, user);
        let filter = crate::filter::parse_filter("userType eq \"Employee\"").unwrap();

        let mut table = RoleTable::new();
        table.add_role(
            "g1",
            vec![read("User", "*", MatchMode::All).with_filter(filter)],
        );
        let grant = table.grants_for(&Subject::user("u1").with_groups(["g1"]), user, Operation::Read);
        assert!(grant.is_resource_scoped());

        let employee = json!({"userName": "a", "userType": "employee"});
        let contractor = json!({"userName": "b", "userType": "Contractor"});
        assert!(!grant.for_resource(&scope, employee.as_object().unwrap()).is_empty(&registry, user));
        assert!(grant.for_resource(&scope, contractor.as_object().unwrap()).is_empty(&registry, user));
    }

    #[test]
    fn test_enterprise_only_role() {
        let mut table = RoleTable::new();
        table.add_role(
            "g1",
            vec![read("User", &format!("{}:*", ENTERPRISE_USER_SCHEMA), MatchMode::Any)],
        );
        let grant = resolve(&table, &Subject::user("u1").with_groups(["g1"]));
        assert!(grant.allows(Some(ENTERPRISE_USER_SCHEMA), "costCenter"));
        assert!(!grant.allows(None, "userName"));
    }

    #[test]
    fn test_table_from_groups() {
        let groups = [
            json!({
                "id": "admins",
                "displayName": "Admins",
                "members": [{"value": "u1"}],
                "permissions": [{"resourceType": "*", "operation": "write", "allowAttributes": "*"}]
            }),
            json!({"id": "staff", "displayName": "Staff", "members": [{"value": "admins"}]}),
        ];
        let table = RoleTable::from_groups(groups.iter().filter_map(Value::as_object));
        let subject = Subject::user("u1");
        assert_eq!(table.groups_of(&subject), vec!["admins".to_string(), "staff".to_string()]);

        let registry = registry();
        let group = registry.resource_type("Group").unwrap();
        assert!(!table.grants_for(&subject, group, Operation::Write).is_denied());
        assert!(table.grants_for(&subject, group, Operation::Read).is_denied());
    }
}
