//! Resource store coordinator over pluggable storage.
//!
//! [`ResourceCoordinator`] owns the SCIM side of every operation: schema
//! validation, versioning and preconditions, role-based access control,
//! uniqueness, and the group membership back-references. Persistence is
//! delegated to a [`StorageProvider`].
//!
//! # Consistency
//!
//! Every mutation runs its check-then-write section under one write gate and
//! commits the changed resource together with its back-reference repairs in
//! a single [`WriteBatch`]. Conditional checks therefore see the latest
//! committed version, and readers never observe a group whose members
//! disagree with the members' `groups` lists.
//!
//! # Example Usage
//!
//! ```rust
//! use scim_engine::auth::Subject;
//! use scim_engine::config::ScimEngineBuilder;
//! use scim_engine::projection::AttributeSelection;
//! use scim_engine::resource::{Preconditions, RequestContext};
//! use scim_engine::storage::InMemoryStorage;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = ScimEngineBuilder::new(InMemoryStorage::new()).build()?;
//! let context = RequestContext::for_subject(Subject::system());
//!
//! let created = coordinator
//!     .create("User", &json!({"userName": "bjensen"}), &AttributeSelection::new(), &context)
//!     .await?;
//! assert_eq!(created.version.to_string(), "W/\"1\"");
//!
//! let fetched = coordinator
//!     .get("User", &created.id, &Preconditions::none(), &AttributeSelection::new(), &context)
//!     .await?;
//! assert_eq!(fetched.resource.unwrap()["userName"], "bjensen");
//! # Ok(())
//! # }
//! ```

use super::references::{
    GROUP, MEMBER_KINDS, MEMBERS, MembershipDelta, StagedResource, Staging, add_back_reference,
    back_reference, display_of, member_entry, member_ids, member_kind, refresh_member_display,
    remove_back_reference, remove_member,
};
use crate::auth::{
    AccessGrant, Operation, ResourceGrant, RoleTable, changed_attributes, check_write,
};
use crate::config::EngineConfig;
use crate::error::{ScimError, ScimResult, ValidationError};
use crate::filter::{FilterScope, bind, parse_filter};
use crate::patch::{PatchContext, PatchRequest};
use crate::projection::{ALWAYS_RETURNED, AttributeSelection, project};
use crate::resource::{HttpVersion, ListQuery, Preconditions, RequestContext, Resource};
use crate::schema::value::{get_attribute, set_attribute};
use crate::schema::{
    Mutability, ResourceType, SchemaRegistry, SharedSchemaRegistry, Uniqueness, qualified_name,
};
use crate::storage::{StorageError, StorageKey, StorageProvider, WriteBatch};

use chrono::{DateTime, Utc};
use log::{debug, info, trace, warn};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Outcome of a single-resource operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceResult {
    pub id: String,
    /// Version after the operation, as a weak ETag
    pub version: HttpVersion,
    /// Projected representation; `None` when the operation returns no body
    pub resource: Option<Map<String, Value>>,
}

impl ResourceResult {
    fn new(resource: &Resource, body: Option<Map<String, Value>>) -> Self {
        Self {
            id: resource.id.clone(),
            version: resource.etag(),
            resource: body,
        }
    }
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Matches across all pages
    pub total_results: usize,
    /// 1-based index of the first returned match
    pub start_index: usize,
    pub items_per_page: usize,
    /// `None` when nothing matched, as opposed to a page past the end
    pub resources: Option<Vec<Map<String, Value>>>,
}

impl SearchResult {
    pub fn is_empty(&self) -> bool {
        self.resources.is_none()
    }

    pub fn resources(&self) -> &[Map<String, Value>] {
        self.resources.as_deref().unwrap_or_default()
    }
}

fn storage_failure<E>(error: E) -> ScimError
where
    E: std::error::Error + Send + Sync + 'static,
{
    ScimError::Storage(StorageError::backend(error))
}

fn broken_reference(reference: impl Into<String>) -> ScimError {
    ValidationError::BrokenReference {
        attribute: MEMBERS.to_string(),
        reference: reference.into(),
    }
    .into()
}

/// Coordinates CRUD, search, access control and referential integrity.
#[derive(Debug)]
pub struct ResourceCoordinator<S: StorageProvider> {
    storage: S,
    registry: SharedSchemaRegistry,
    config: EngineConfig,
    /// Role table derived from committed Groups; `None` until first use
    roles: RwLock<Option<Arc<RoleTable>>>,
    write_gate: Mutex<()>,
}

impl<S: StorageProvider> ResourceCoordinator<S> {
    pub fn new(storage: S, registry: SharedSchemaRegistry, config: EngineConfig) -> Self {
        Self {
            storage,
            registry,
            config,
            roles: RwLock::new(None),
            write_gate: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &SharedSchemaRegistry {
        &self.registry
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Create a resource; the server assigns its id and version 1.
    pub async fn create(
        &self,
        resource_type: &str,
        body: &Value,
        selection: &AttributeSelection,
        context: &RequestContext,
    ) -> ScimResult<ResourceResult> {
        info!(
            "Creating {} resource (request: '{}')",
            resource_type, context.request_id
        );
        trace!("Create payload: {}", body);

        let registry = self.registry.snapshot();
        let rt = registry.require_resource_type(resource_type)?;
        let write = self
            .authorize_kind(&registry, rt, Operation::Write, context)
            .await?;

        let mut attributes =
            registry.normalize_resource(rt, body, self.config.unknown_attribute_policy())?;
        registry.check_required(rt, &attributes)?;

        let gate = self.write_gate.lock().await;
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let proposed = Resource::new(&rt.name, &id, attributes.clone(), now);
        let grant = self.resource_grant(&registry, rt, &write, &proposed);
        check_write(
            &grant,
            rt,
            &changed_attributes(&registry, rt, &Map::new(), &attributes),
        )?;

        self.resolve_members(&registry, rt, &id, &mut attributes)
            .await?;
        self.check_unique(&registry, rt, &attributes, None).await?;

        let resource = Resource::new(&rt.name, id, attributes, now);
        let mut staging = Staging::new(resource.key());
        self.link_members(&registry, &resource, &Map::new(), &mut staging)
            .await?;

        let mut batch = WriteBatch::new();
        batch.put(resource.key(), resource.to_record()?);
        self.commit(&registry, batch, staging, now, context).await?;
        drop(gate);

        info!(
            "Created {} resource with ID '{}' (request: '{}')",
            rt.name, resource.id, context.request_id
        );
        let body = self.render(&registry, rt, &resource, selection, context).await?;
        Ok(ResourceResult::new(&resource, Some(body)))
    }

    /// Fetch one resource, honouring `ifNoneMatch`.
    pub async fn get(
        &self,
        resource_type: &str,
        id: &str,
        preconditions: &Preconditions,
        selection: &AttributeSelection,
        context: &RequestContext,
    ) -> ScimResult<ResourceResult> {
        debug!(
            "Getting {} resource with ID '{}' (request: '{}')",
            resource_type, id, context.request_id
        );

        let registry = self.registry.snapshot();
        let rt = registry.require_resource_type(resource_type)?;
        let read = self
            .authorize_kind(&registry, rt, Operation::Read, context)
            .await?;

        let resource = self
            .load(&rt.name, id)
            .await?
            .ok_or_else(|| ScimError::resource_not_found(&rt.name, id))?;

        let representation =
            resource.representation(&registry, rt, &self.config.base_location);
        let grant = read.for_resource(&FilterScope::new(&registry, rt), &representation);
        if grant.is_empty(&registry, rt) {
            debug!(
                "Read of {} denied by resource-scoped grants (request: '{}')",
                rt.name, context.request_id
            );
            return Err(ScimError::forbidden(&rt.name, Operation::Read.as_str()));
        }

        preconditions.check_read(&resource.version)?;
        let body = project(&registry, rt, &representation, selection, &grant);
        Ok(ResourceResult::new(&resource, Some(body)))
    }

    /// Overwrite every client-writable attribute from `body`.
    pub async fn replace(
        &self,
        resource_type: &str,
        id: &str,
        body: &Value,
        preconditions: &Preconditions,
        selection: &AttributeSelection,
        context: &RequestContext,
    ) -> ScimResult<ResourceResult> {
        info!(
            "Replacing {} resource with ID '{}' (request: '{}')",
            resource_type, id, context.request_id
        );
        trace!("Replace payload: {}", body);

        let registry = self.registry.snapshot();
        let rt = registry.require_resource_type(resource_type)?;
        let write = self
            .authorize_kind(&registry, rt, Operation::Write, context)
            .await?;
        let mut attributes =
            registry.normalize_resource(rt, body, self.config.unknown_attribute_policy())?;

        let gate = self.write_gate.lock().await;
        let current = self
            .load(&rt.name, id)
            .await?
            .ok_or_else(|| ScimError::resource_not_found(&rt.name, id))?;
        preconditions.check_write(&current.version)?;

        carry_over(&registry, rt, &current.attributes, &mut attributes);
        registry.check_required(rt, &attributes)?;
        registry.check_immutable(rt, &current.attributes, &attributes)?;
        self.resolve_members(&registry, rt, &current.id, &mut attributes)
            .await?;

        let grant = self.resource_grant(&registry, rt, &write, &current);
        check_write(
            &grant,
            rt,
            &changed_attributes(&registry, rt, &current.attributes, &attributes),
        )?;
        self.check_unique(&registry, rt, &attributes, Some(&current.id))
            .await?;

        let now = Utc::now();
        let mut updated = current.clone();
        updated.attributes = attributes;
        updated.touch(now);
        self.persist_update(&registry, &current, &updated, now, context)
            .await?;
        drop(gate);

        info!(
            "Replaced {} resource '{}', now at version {} (request: '{}')",
            rt.name, updated.id, updated.version, context.request_id
        );
        let body = self.render(&registry, rt, &updated, selection, context).await?;
        Ok(ResourceResult::new(&updated, Some(body)))
    }

    /// Apply patch operations in order.
    ///
    /// A request that changes nothing commits nothing and keeps the version.
    /// Without explicitly requested attributes the result carries no body.
    pub async fn patch(
        &self,
        resource_type: &str,
        id: &str,
        request: &PatchRequest,
        preconditions: &Preconditions,
        selection: &AttributeSelection,
        context: &RequestContext,
    ) -> ScimResult<ResourceResult> {
        info!(
            "Patching {} resource with ID '{}' ({} operations, request: '{}')",
            resource_type,
            id,
            request.operations.len(),
            context.request_id
        );

        let registry = self.registry.snapshot();
        let rt = registry.require_resource_type(resource_type)?;
        let write = self
            .authorize_kind(&registry, rt, Operation::Write, context)
            .await?;

        let gate = self.write_gate.lock().await;
        let current = self
            .load(&rt.name, id)
            .await?
            .ok_or_else(|| ScimError::resource_not_found(&rt.name, id))?;
        preconditions.check_write(&current.version)?;

        let patcher = PatchContext::new(&registry, rt, self.config.unknown_attribute_policy());
        let (mut attributes, mut changed) =
            patcher.apply_all(&current.attributes, &request.operations)?;
        if changed {
            registry.check_required(rt, &attributes)?;
            registry.check_immutable(rt, &current.attributes, &attributes)?;
            self.resolve_members(&registry, rt, &current.id, &mut attributes)
                .await?;
            changed = attributes != current.attributes;
        }

        if !changed {
            drop(gate);
            debug!(
                "Patch of {} '{}' changed nothing, version stays {} (request: '{}')",
                rt.name, current.id, current.version, context.request_id
            );
            return self
                .patch_result(&registry, rt, &current, selection, context)
                .await;
        }

        let grant = self.resource_grant(&registry, rt, &write, &current);
        check_write(
            &grant,
            rt,
            &changed_attributes(&registry, rt, &current.attributes, &attributes),
        )?;
        self.check_unique(&registry, rt, &attributes, Some(&current.id))
            .await?;

        let now = Utc::now();
        let mut updated = current.clone();
        updated.attributes = attributes;
        updated.touch(now);
        self.persist_update(&registry, &current, &updated, now, context)
            .await?;
        drop(gate);

        info!(
            "Patched {} resource '{}', now at version {} (request: '{}')",
            rt.name, updated.id, updated.version, context.request_id
        );
        self.patch_result(&registry, rt, &updated, selection, context)
            .await
    }

    /// Remove a resource and every reference to it.
    pub async fn delete(
        &self,
        resource_type: &str,
        id: &str,
        preconditions: &Preconditions,
        context: &RequestContext,
    ) -> ScimResult<()> {
        info!(
            "Deleting {} resource with ID '{}' (request: '{}')",
            resource_type, id, context.request_id
        );

        let registry = self.registry.snapshot();
        let rt = registry.require_resource_type(resource_type)?;
        let write = self
            .authorize_kind(&registry, rt, Operation::Write, context)
            .await?;

        let gate = self.write_gate.lock().await;
        let current = self
            .load(&rt.name, id)
            .await?
            .ok_or_else(|| ScimError::resource_not_found(&rt.name, id))?;
        preconditions.check_write(&current.version)?;

        let grant = self.resource_grant(&registry, rt, &write, &current);
        check_write(
            &grant,
            rt,
            &changed_attributes(&registry, rt, &current.attributes, &Map::new()),
        )?;

        let mut staging = Staging::new(current.key());
        self.unlink(&current, &mut staging).await?;

        let mut batch = WriteBatch::new();
        batch.delete(current.key());
        self.commit(&registry, batch, staging, Utc::now(), context)
            .await?;
        drop(gate);

        info!(
            "Deleted {} resource '{}' (request: '{}')",
            rt.name, current.id, context.request_id
        );
        Ok(())
    }

    /// Filter, page and project the resources of one kind.
    ///
    /// Resources the caller may not read are skipped, and the filter only
    /// sees attributes the caller may read.
    pub async fn search(
        &self,
        resource_type: &str,
        query: &ListQuery,
        context: &RequestContext,
    ) -> ScimResult<SearchResult> {
        debug!(
            "Searching {} resources with filter {:?} (request: '{}')",
            resource_type, query.filter, context.request_id
        );

        let registry = self.registry.snapshot();
        let rt = registry.require_resource_type(resource_type)?;
        let read = self
            .authorize_kind(&registry, rt, Operation::Read, context)
            .await?;
        let scope = FilterScope::new(&registry, rt);

        let filter = match query.filter.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                let node = parse_filter(text)?;
                bind(&node, &scope)?;
                Some(node)
            }
            _ => None,
        };

        let mut matched = Vec::new();
        for resource in self.load_all(&rt.name).await? {
            let representation =
                resource.representation(&registry, rt, &self.config.base_location);
            let grant = read.for_resource(&scope, &representation);
            if grant.is_empty(&registry, rt) {
                trace!("Skipping {} '{}': not readable", rt.name, resource.id);
                continue;
            }
            let visible = filter.as_ref().is_none_or(|node| {
                scope.matches(node, &readable_view(&registry, rt, &representation, &grant))
            });
            if visible {
                matched.push((representation, grant));
            }
        }

        let total_results = matched.len();
        let (offset, limit) = query.page(self.config.max_results);
        let selection = query.selection();
        let page: Vec<Map<String, Value>> = matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(representation, grant)| {
                project(&registry, rt, &representation, &selection, &grant)
            })
            .collect();

        debug!(
            "Search matched {} {} resources, returning {} (request: '{}')",
            total_results,
            rt.name,
            page.len(),
            context.request_id
        );
        Ok(SearchResult {
            total_results,
            start_index: offset + 1,
            items_per_page: page.len(),
            resources: (total_results > 0).then_some(page),
        })
    }

    /// Drop the cached role table; it is rebuilt from storage on next use.
    ///
    /// Needed only when Groups were changed behind the coordinator's back.
    pub async fn invalidate_roles(&self) {
        *self.roles.write().await = None;
    }

    async fn load(&self, resource_type: &str, id: &str) -> ScimResult<Option<Resource>> {
        let key = StorageKey::new(resource_type, id);
        match self.storage.get(key.clone()).await.map_err(storage_failure)? {
            Some(record) => Ok(Some(Resource::from_record(&key, record)?)),
            None => Ok(None),
        }
    }

    async fn load_all(&self, resource_type: &str) -> ScimResult<Vec<Resource>> {
        let records = self
            .storage
            .list(resource_type)
            .await
            .map_err(storage_failure)?;
        Ok(records
            .into_iter()
            .filter_map(|(key, record)| match Resource::from_record(&key, record) {
                Ok(resource) => Some(resource),
                Err(e) => {
                    warn!("Skipping unreadable record {}: {}", key, e);
                    None
                }
            })
            .collect())
    }

    async fn role_table(&self, registry: &SchemaRegistry) -> ScimResult<Arc<RoleTable>> {
        if let Some(table) = self.roles.read().await.as_ref() {
            return Ok(Arc::clone(table));
        }
        let mut slot = self.roles.write().await;
        if let Some(table) = slot.as_ref() {
            return Ok(Arc::clone(table));
        }
        let table = Arc::new(self.build_role_table(registry).await?);
        *slot = Some(Arc::clone(&table));
        Ok(table)
    }

    async fn build_role_table(&self, registry: &SchemaRegistry) -> ScimResult<RoleTable> {
        let Some(group_type) = registry.resource_type(GROUP) else {
            return Ok(RoleTable::new());
        };
        let groups: Vec<Map<String, Value>> = self
            .load_all(&group_type.name)
            .await?
            .iter()
            .map(|group| group.representation(registry, group_type, &self.config.base_location))
            .collect();
        Ok(RoleTable::from_groups(&groups))
    }

    /// Rebuild the role table from committed Groups.
    ///
    /// Runs after the commit, so a failure here cannot undo the write; the
    /// table is dropped instead and rebuilt lazily.
    async fn refresh_roles(&self, registry: &SchemaRegistry) {
        let rebuilt = self.build_role_table(registry).await;
        let mut slot = self.roles.write().await;
        match rebuilt {
            Ok(table) => *slot = Some(Arc::new(table)),
            Err(e) => {
                warn!("Failed to rebuild role table, deferring: {}", e);
                *slot = None;
            }
        }
    }

    async fn grant(
        &self,
        registry: &SchemaRegistry,
        resource_type: &ResourceType,
        operation: Operation,
        context: &RequestContext,
    ) -> ScimResult<AccessGrant> {
        if !self.config.enforce_rbac || context.subject.is_system() {
            return Ok(AccessGrant::unrestricted());
        }
        let roles = self.role_table(registry).await?;
        Ok(roles.grants_for(&context.subject, resource_type, operation))
    }

    /// The subject's grant, failing when no entry covers the kind at all.
    async fn authorize_kind(
        &self,
        registry: &SchemaRegistry,
        resource_type: &ResourceType,
        operation: Operation,
        context: &RequestContext,
    ) -> ScimResult<AccessGrant> {
        let grant = self
            .grant(registry, resource_type, operation, context)
            .await?;
        if grant.is_denied() {
            debug!(
                "No {} grant on {} for subject {:?} (request: '{}')",
                operation, resource_type.name, context.subject.id, context.request_id
            );
            return Err(ScimError::forbidden(&resource_type.name, operation.as_str()));
        }
        Ok(grant)
    }

    fn resource_grant(
        &self,
        registry: &SchemaRegistry,
        resource_type: &ResourceType,
        grant: &AccessGrant,
        resource: &Resource,
    ) -> ResourceGrant {
        if !grant.is_resource_scoped() {
            return grant.for_resource(&FilterScope::new(registry, resource_type), &Map::new());
        }
        let representation =
            resource.representation(registry, resource_type, &self.config.base_location);
        grant.for_resource(&FilterScope::new(registry, resource_type), &representation)
    }

    async fn render(
        &self,
        registry: &SchemaRegistry,
        resource_type: &ResourceType,
        resource: &Resource,
        selection: &AttributeSelection,
        context: &RequestContext,
    ) -> ScimResult<Map<String, Value>> {
        let read = self
            .grant(registry, resource_type, Operation::Read, context)
            .await?;
        let representation =
            resource.representation(registry, resource_type, &self.config.base_location);
        let grant = read.for_resource(&FilterScope::new(registry, resource_type), &representation);
        Ok(project(registry, resource_type, &representation, selection, &grant))
    }

    async fn patch_result(
        &self,
        registry: &SchemaRegistry,
        resource_type: &ResourceType,
        resource: &Resource,
        selection: &AttributeSelection,
        context: &RequestContext,
    ) -> ScimResult<ResourceResult> {
        if selection.requests_nothing() {
            return Ok(ResourceResult::new(resource, None));
        }
        let body = self
            .render(registry, resource_type, resource, selection, context)
            .await?;
        Ok(ResourceResult::new(resource, Some(body)))
    }

    /// Unique attributes must not collide, ignoring case, with another
    /// resource of the same kind.
    async fn check_unique(
        &self,
        registry: &SchemaRegistry,
        resource_type: &ResourceType,
        attributes: &Map<String, Value>,
        exclude_id: Option<&str>,
    ) -> ScimResult<()> {
        for (extension, def) in registry.attributes(resource_type) {
            if def.uniqueness == Uniqueness::None || def.is_read_only() || def.multi_valued {
                continue;
            }
            let Some(value) = get_attribute(attributes, extension, &def.name).and_then(Value::as_str)
            else {
                continue;
            };

            let mut path = vec!["attributes"];
            path.extend(extension);
            path.push(def.name.as_str());
            let holders = self
                .storage
                .find_by_attribute(&resource_type.name, &path, value)
                .await
                .map_err(storage_failure)?;
            if holders
                .iter()
                .any(|(key, _)| Some(key.resource_id()) != exclude_id)
            {
                let attribute = qualified_name(extension, &def.name);
                debug!(
                    "Uniqueness conflict on {}.{} = '{}'",
                    resource_type.name, attribute, value
                );
                return Err(ScimError::conflict(&resource_type.name, attribute));
            }
        }
        Ok(())
    }

    fn location_of(&self, registry: &SchemaRegistry, resource: &Resource) -> String {
        match registry.resource_type(&resource.resource_type) {
            Some(rt) => resource.location(rt, &self.config.base_location),
            None => format!(
                "{}/{}",
                self.config.base_location.trim_end_matches('/'),
                resource.key()
            ),
        }
    }

    async fn find_member(&self, id: &str, hint: Option<&str>) -> ScimResult<Option<Resource>> {
        for kind in hint.into_iter().chain(MEMBER_KINDS) {
            if let Some(resource) = self.load(kind, id).await? {
                return Ok(Some(resource));
            }
        }
        Ok(None)
    }

    /// Check every member reference and rewrite `members` in stored form.
    ///
    /// Duplicates collapse to the first occurrence; a group may not list
    /// itself.
    async fn resolve_members(
        &self,
        registry: &SchemaRegistry,
        resource_type: &ResourceType,
        id: &str,
        attributes: &mut Map<String, Value>,
    ) -> ScimResult<()> {
        let has_members = registry
            .core_schema(resource_type)
            .is_some_and(|schema| schema.attribute(MEMBERS).is_some());
        if !has_members {
            return Ok(());
        }
        let Some(Value::Array(items)) = attributes.get(MEMBERS) else {
            return Ok(());
        };

        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(items.len());
        for item in items {
            let reference = item
                .get("value")
                .and_then(Value::as_str)
                .ok_or_else(|| broken_reference(item.to_string()))?;
            if reference == id {
                return Err(broken_reference(reference));
            }
            if !seen.insert(reference) {
                continue;
            }
            let hint = item.get("type").and_then(Value::as_str);
            let target = self
                .find_member(reference, hint)
                .await?
                .ok_or_else(|| broken_reference(reference))?;
            resolved.push(member_entry(&target, self.location_of(registry, &target)));
        }
        attributes.insert(MEMBERS.to_string(), Value::Array(resolved));
        Ok(())
    }

    /// Load a repair target into `staging`, trying the hinted kind first.
    async fn stage<'s>(
        &self,
        staging: &'s mut Staging,
        hint: Option<&str>,
        id: &str,
    ) -> ScimResult<Option<&'s mut StagedResource>> {
        for kind in hint.into_iter().chain(MEMBER_KINDS) {
            let key = StorageKey::new(kind, id);
            if staging.is_primary(&key) {
                return Ok(None);
            }
            if !staging.contains(&key) {
                match self.load(kind, id).await? {
                    Some(resource) => staging.insert(resource),
                    None => continue,
                }
            }
            return Ok(staging.get_mut(&key));
        }
        Ok(None)
    }

    /// Bring the members' `groups` lists in line with `group`.
    async fn link_members(
        &self,
        registry: &SchemaRegistry,
        group: &Resource,
        before: &Map<String, Value>,
        staging: &mut Staging,
    ) -> ScimResult<()> {
        let delta = MembershipDelta::between(before, &group.attributes);
        let renamed = display_of(before) != group.display();
        if delta.is_empty() && !(renamed && !delta.retained.is_empty()) {
            return Ok(());
        }

        let entry = back_reference(group, self.location_of(registry, group));
        let linked = delta
            .added
            .iter()
            .chain(delta.retained.iter().filter(|_| renamed));
        for member_id in linked {
            let hint = member_kind(&group.attributes, member_id);
            match self.stage(staging, hint, member_id).await? {
                Some(member) => member.update(|a| add_back_reference(a, entry.clone())),
                None => warn!("Member '{}' of group '{}' does not resolve", member_id, group.id),
            }
        }
        for member_id in &delta.removed {
            let hint = member_kind(before, member_id);
            if let Some(member) = self.stage(staging, hint, member_id).await? {
                member.update(|a| remove_back_reference(a, &group.id));
            }
        }
        Ok(())
    }

    /// Groups listing `resource` that hold a stale `display` for it.
    async fn refresh_memberships(
        &self,
        resource: &Resource,
        before: &Map<String, Value>,
        staging: &mut Staging,
    ) -> ScimResult<()> {
        let display = resource.display();
        if display_of(before) == display {
            return Ok(());
        }
        let holders = self
            .storage
            .find_by_attribute(GROUP, &["attributes", MEMBERS, "value"], &resource.id)
            .await
            .map_err(storage_failure)?;
        for (key, _) in holders {
            if let Some(group) = self
                .stage(staging, Some(key.resource_type()), key.resource_id())
                .await?
            {
                group.update(|a| refresh_member_display(a, &resource.id, display));
            }
        }
        Ok(())
    }

    /// Remove every reference to `resource` ahead of its deletion.
    async fn unlink(&self, resource: &Resource, staging: &mut Staging) -> ScimResult<()> {
        let holders = self
            .storage
            .find_by_attribute(GROUP, &["attributes", MEMBERS, "value"], &resource.id)
            .await
            .map_err(storage_failure)?;
        for (key, _) in holders {
            if let Some(group) = self
                .stage(staging, Some(key.resource_type()), key.resource_id())
                .await?
            {
                group.update(|a| remove_member(a, &resource.id));
            }
        }

        for member_id in member_ids(&resource.attributes) {
            let hint = member_kind(&resource.attributes, &member_id);
            if let Some(member) = self.stage(staging, hint, &member_id).await? {
                member.update(|a| remove_back_reference(a, &resource.id));
            }
        }
        Ok(())
    }

    async fn persist_update(
        &self,
        registry: &SchemaRegistry,
        before: &Resource,
        after: &Resource,
        now: DateTime<Utc>,
        context: &RequestContext,
    ) -> ScimResult<()> {
        let mut staging = Staging::new(after.key());
        self.link_members(registry, after, &before.attributes, &mut staging)
            .await?;
        self.refresh_memberships(after, &before.attributes, &mut staging)
            .await?;

        let mut batch = WriteBatch::new();
        batch.put(after.key(), after.to_record()?);
        self.commit(registry, batch, staging, now, context).await
    }

    async fn commit(
        &self,
        registry: &SchemaRegistry,
        mut batch: WriteBatch,
        staging: Staging,
        now: DateTime<Utc>,
        context: &RequestContext,
    ) -> ScimResult<()> {
        staging.write_into(&mut batch, now)?;
        let touches_groups = batch
            .ops()
            .iter()
            .any(|op| op.key().resource_type() == GROUP);
        debug!(
            "Committing {} writes (request: '{}')",
            batch.len(),
            context.request_id
        );
        self.storage.commit(batch).await.map_err(storage_failure)?;

        if touches_groups && self.config.enforce_rbac {
            self.refresh_roles(registry).await;
        }
        Ok(())
    }
}

/// Keep what a replace body cannot change: read-only attributes, and
/// immutable attributes the body leaves out.
fn carry_over(
    registry: &SchemaRegistry,
    resource_type: &ResourceType,
    current: &Map<String, Value>,
    attributes: &mut Map<String, Value>,
) {
    for (extension, def) in registry.attributes(resource_type) {
        let keep = def.is_read_only()
            || (def.mutability == Mutability::Immutable
                && get_attribute(attributes, extension, &def.name).is_none());
        if !keep {
            continue;
        }
        if let Some(value) = get_attribute(current, extension, &def.name) {
            set_attribute(attributes, extension, &def.name, Some(value.clone()));
        }
    }
}

/// The representation restricted to what `grant` lets the caller read.
fn readable_view(
    registry: &SchemaRegistry,
    resource_type: &ResourceType,
    representation: &Map<String, Value>,
    grant: &ResourceGrant,
) -> Map<String, Value> {
    let mut view = Map::new();
    for key in ALWAYS_RETURNED {
        if let Some(value) = representation.get(key) {
            view.insert(key.to_string(), value.clone());
        }
    }
    for (extension, def) in registry.attributes(resource_type) {
        if def.is_never_returned() || !grant.allows(extension, &def.name) {
            continue;
        }
        if let Some(value) = get_attribute(representation, extension, &def.name) {
            set_attribute(&mut view, extension, &def.name, Some(value.clone()));
        }
    }
    view
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Subject;
    use crate::patch::PatchOperation;
    use crate::storage::InMemoryStorage;
    use serde_json::json;

    fn coordinator() -> ResourceCoordinator<InMemoryStorage> {
        let registry = SharedSchemaRegistry::new(SchemaRegistry::new().unwrap());
        ResourceCoordinator::new(InMemoryStorage::new(), registry, EngineConfig::default())
    }

    fn admin() -> RequestContext {
        RequestContext::for_subject(Subject::system())
    }

    fn all() -> AttributeSelection {
        AttributeSelection::new()
    }

    async fn user(c: &ResourceCoordinator<InMemoryStorage>, name: &str) -> String {
        c.create("User", &json!({"userName": name}), &all(), &admin())
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_create_strips_server_managed_input() {
        let c = coordinator();
        let body = json!({
            "id": "client-chosen",
            "meta": {"version": "W/\"9\""},
            "userName": "bjensen",
            "password": "secret"
        });
        let created = c.create("User", &body, &all(), &admin()).await.unwrap();
        assert_ne!(created.id, "client-chosen");
        assert_eq!(created.version.to_string(), "W/\"1\"");
        let resource = created.resource.unwrap();
        assert_eq!(resource["meta"]["version"], "W/\"1\"");
        assert!(resource.get("password").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let c = coordinator();
        user(&c, "bjensen").await;
        let err = c
            .create("User", &json!({"userName": "BJENSEN"}), &all(), &admin())
            .await
            .unwrap_err();
        assert!(matches!(err, ScimError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_anonymous_is_forbidden_before_lookup() {
        let c = coordinator();
        let err = c
            .get("User", "missing", &Preconditions::none(), &all(), &RequestContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScimError::Forbidden { .. }));

        let err = c
            .get("User", "missing", &Preconditions::none(), &all(), &admin())
            .await
            .unwrap_err();
        assert!(matches!(err, ScimError::ResourceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_group_members_get_back_references() {
        let c = coordinator();
        let alice = user(&c, "alice").await;
        let group = c
            .create(
                "Group",
                &json!({"displayName": "Admins", "members": [{"value": alice}, {"value": alice}]}),
                &all(),
                &admin(),
            )
            .await
            .unwrap();
        let body = group.resource.clone().unwrap();
        let members = &body["members"];
        assert_eq!(members.as_array().unwrap().len(), 1);
        assert_eq!(members[0]["type"], "User");
        assert_eq!(members[0]["display"], "alice");

        let fetched = c
            .get("User", &alice, &Preconditions::none(), &all(), &admin())
            .await
            .unwrap();
        assert_eq!(fetched.version.to_string(), "W/\"2\"");
        let body = fetched.resource.unwrap();
        let groups = &body["groups"];
        assert_eq!(groups[0]["value"], json!(group.id));
        assert_eq!(groups[0]["display"], "Admins");
    }

    #[tokio::test]
    async fn test_broken_and_self_references_rejected() {
        let c = coordinator();
        let err = c
            .create(
                "Group",
                &json!({"displayName": "Ghosts", "members": [{"value": "nobody"}]}),
                &all(),
                &admin(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScimError::Validation(ValidationError::BrokenReference { .. })
        ));

        let group = c
            .create("Group", &json!({"displayName": "Loop"}), &all(), &admin())
            .await
            .unwrap();
        let request = PatchRequest::new(vec![
            PatchOperation::add(Some("members"), json!([{"value": group.id}])).unwrap(),
        ])
        .unwrap();
        let err = c
            .patch("Group", &group.id, &request, &Preconditions::none(), &all(), &admin())
            .await
            .unwrap_err();
        assert_eq!(err.outcome(), crate::error::OutcomeCode::BadRequest);
    }

    #[tokio::test]
    async fn test_patch_without_selection_returns_no_body() {
        let c = coordinator();
        let id = user(&c, "bjensen").await;
        let request = PatchRequest::new(vec![
            PatchOperation::replace(Some("displayName"), json!("Babs")).unwrap(),
        ])
        .unwrap();
        let patched = c
            .patch("User", &id, &request, &Preconditions::none(), &all(), &admin())
            .await
            .unwrap();
        assert!(patched.resource.is_none());
        assert_eq!(patched.version.to_string(), "W/\"2\"");

        let again = c
            .patch(
                "User",
                &id,
                &request,
                &Preconditions::none(),
                &AttributeSelection::new().with_attributes(["displayName"]),
                &admin(),
            )
            .await
            .unwrap();
        assert_eq!(again.version.to_string(), "W/\"2\"");
        assert_eq!(again.resource.unwrap()["displayName"], "Babs");
    }

    #[tokio::test]
    async fn test_replace_keeps_back_references() {
        let c = coordinator();
        let alice = user(&c, "alice").await;
        c.create(
            "Group",
            &json!({"displayName": "Ops", "members": [{"value": alice}]}),
            &all(),
            &admin(),
        )
        .await
        .unwrap();

        let replaced = c
            .replace(
                "User",
                &alice,
                &json!({"userName": "alice", "title": "SRE", "groups": []}),
                &Preconditions::none(),
                &all(),
                &admin(),
            )
            .await
            .unwrap();
        let body = replaced.resource.unwrap();
        assert_eq!(body["title"], "SRE");
        assert_eq!(body["groups"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_hides_write_only_values_from_filters() {
        let c = coordinator();
        c.create(
            "User",
            &json!({"userName": "bjensen", "password": "hunter2"}),
            &all(),
            &admin(),
        )
        .await
        .unwrap();
        let query = ListQuery::new().with_filter(r#"password eq "hunter2""#);
        let result = c.search("User", &query, &admin()).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.total_results, 0);
    }
}
