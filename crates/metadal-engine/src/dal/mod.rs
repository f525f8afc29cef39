// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Generic CRUD over metadata-described entities.
//!
//! Every operation is scoped to one tenant and runs as a short pipeline
//! where each stage can stop the operation with a typed [`DalError`]:
//!
//! | Operation | Pipeline |
//! |-----------|----------|
//! | `create` | system fields, defaults → pre-create → `INSERT` → post-create → `created` |
//! | `read` | `SELECT` by id |
//! | `query` | `SELECT` + `COUNT` on one filter → relations |
//! | `update` | read → pre-update → `UPDATE` → triggers, post-update → `updated` |
//! | `delete` | read → pre-delete → `DELETE` or soft delete → post-delete → `deleted` |
//! | `restore` | clear the soft delete → `restored` |
//!
//! Post hooks run after the write is durable. A failing post hook is
//! reported as [`DalError::ActionFailed`]; the row stays written and no
//! event is published. Event publication itself never fails an operation.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn run(metadata: metadal_core::metadata::ServiceMetadata) -> metadal_engine::error::DalResult<()> {
//! use std::sync::Arc;
//!
//! use metadal_core::{Record, TenantId};
//! use metadal_engine::{dal::{Engine, Scope}, store::MemoryStore};
//!
//! let engine = Engine::builder(Arc::new(metadata), Arc::new(MemoryStore::new())).build()?;
//! let scope = Scope::new(TenantId::new("acme")?).with_actor("alice");
//! engine.provision_tenant(&scope.tenant).await?;
//!
//! let ticket = engine
//!     .create(&scope, "Ticket", Record::new().with("title", "Printer on fire"))
//!     .await?;
//! let id = ticket.id().unwrap_or_default();
//! engine
//!     .update(&scope, "Ticket", id, Record::new().with("status", "closed"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod relations;

use std::{fmt, future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use metadal_core::{
    EventKind, Operation, Pagination, Record, TenantId, Value,
    metadata::{CREATED_AT, EntityMetadata, HookStage, ID, ServiceMetadata, TENANT_ID, UPDATED_AT, VERSION}
};
pub use relations::{RemoteResolver, pending_marker};
use tracing::{Instrument, debug, info_span, warn};
use uuid::Uuid;

use crate::{
    config::DalConfig,
    error::{DalError, DalResult, StoreError},
    events::{DomainEvent, EventPublisher, NoopPublisher},
    hooks::{HookContext, HookEvaluator, HookRegistry},
    query::{Query, QueryCompiler, Statement},
    schema::{Migrator, TenantReport},
    store::Store
};

/// Per-request context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    /// Tenant every statement is scoped to.
    pub tenant:  TenantId,
    /// Acting user; recorded in `deleted_by` and passed to hooks.
    pub actor:   Option<String>,
    /// Store call timeout overriding the configured one.
    pub timeout: Option<Duration>
}

impl Scope {
    /// Anonymous scope for `tenant`.
    #[must_use]
    pub fn new(tenant: TenantId) -> Self {
        Self {
            tenant,
            actor: None,
            timeout: None
        }
    }

    /// Set the actor.
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Set the store call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn context(&self, entity: &EntityMetadata, stage: HookStage) -> HookContext {
        HookContext::new(self.tenant.clone(), entity.name.clone(), stage)
            .with_actor(self.actor.clone())
    }
}

impl From<TenantId> for Scope {
    fn from(tenant: TenantId) -> Self {
        Self::new(tenant)
    }
}

/// One page of a query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    /// Rows of the page, with requested relations attached.
    pub rows:  Vec<Record>,
    /// Rows matching the filter, ignoring pagination.
    pub total: u64
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    metadata:  Arc<ServiceMetadata>,
    store:     Arc<dyn Store>,
    config:    Option<DalConfig>,
    hooks:     Arc<HookRegistry>,
    publisher: Arc<dyn EventPublisher>,
    resolver:  Option<Arc<dyn RemoteResolver>>
}

impl EngineBuilder {
    /// Engine settings. Defaults to [`DalConfig::new`] with the metadata's
    /// service name.
    #[must_use]
    pub fn config(mut self, config: DalConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Registered actions, triggers and checks.
    #[must_use]
    pub fn hooks(mut self, registry: Arc<HookRegistry>) -> Self {
        self.hooks = registry;
        self
    }

    /// Event sink. Defaults to [`NoopPublisher`].
    #[must_use]
    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Resolver for relations owned by other services.
    #[must_use]
    pub fn resolver(mut self, resolver: Arc<dyn RemoteResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Validate the configuration and build.
    ///
    /// # Errors
    ///
    /// [`DalError::Config`] when the configuration is invalid.
    pub fn build(self) -> DalResult<Engine> {
        let config = self
            .config
            .unwrap_or_else(|| DalConfig::new(self.metadata.service()));
        config.validate()?;
        let migrator = Arc::new(Migrator::new(self.store.clone(), &config)?);
        Ok(Engine {
            metadata: self.metadata,
            store: self.store,
            migrator,
            hooks: HookEvaluator::new(self.hooks),
            publisher: self.publisher,
            resolver: self.resolver,
            config
        })
    }
}

/// Tenant-scoped CRUD engine, shared across concurrent requests.
pub struct Engine {
    metadata:  Arc<ServiceMetadata>,
    store:     Arc<dyn Store>,
    migrator:  Arc<Migrator>,
    hooks:     HookEvaluator,
    publisher: Arc<dyn EventPublisher>,
    resolver:  Option<Arc<dyn RemoteResolver>>,
    config:    DalConfig
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("service", &self.metadata.service())
            .field("entities", &self.metadata.entities().len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Start building an engine over `metadata` and `store`.
    #[must_use]
    pub fn builder(metadata: Arc<ServiceMetadata>, store: Arc<dyn Store>) -> EngineBuilder {
        EngineBuilder {
            metadata,
            store,
            config: None,
            hooks: Arc::new(HookRegistry::new()),
            publisher: Arc::new(NoopPublisher),
            resolver: None
        }
    }

    /// Metadata in use.
    #[must_use]
    pub fn metadata(&self) -> &ServiceMetadata {
        &self.metadata
    }

    /// Settings in use.
    #[must_use]
    pub fn config(&self) -> &DalConfig {
        &self.config
    }

    /// Store in use.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Entity by name.
    ///
    /// # Errors
    ///
    /// [`DalError::UnknownEntity`].
    pub fn entity(&self, name: &str) -> DalResult<&EntityMetadata> {
        self.metadata
            .entity(name)
            .ok_or_else(|| DalError::UnknownEntity(name.to_string()))
    }

    /// Migrator over the same store and configuration.
    ///
    /// Built once per engine, so schema work on one tenant through this
    /// engine is serialized.
    #[must_use]
    pub fn migrator(&self) -> &Arc<Migrator> {
        &self.migrator
    }

    /// Create the namespace and every table of this engine's metadata for
    /// `tenant`.
    ///
    /// # Errors
    ///
    /// See [`Migrator::provision_tenant`].
    pub async fn provision_tenant(&self, tenant: &TenantId) -> DalResult<TenantReport> {
        self.migrator.provision_tenant(tenant, &self.metadata).await
    }

    fn compiler<'a>(&'a self, entity: &'a EntityMetadata, scope: &'a Scope) -> QueryCompiler<'a> {
        QueryCompiler::new(entity, &scope.tenant, &self.config.schema_prefix)
    }

    /// Insert a new row and return it as stored.
    ///
    /// `id`, `tenant_id`, timestamps and `version` are assigned here; any
    /// caller value for them is ignored, as are keys the entity does not
    /// declare. Absent fields receive their declared default.
    ///
    /// # Errors
    ///
    /// [`DalError::InvalidValue`], [`DalError::ValidationFailed`],
    /// [`DalError::RuleRejected`], [`DalError::Store`] (including unique
    /// violations), or [`DalError::ActionFailed`] after the row is stored.
    pub async fn create(&self, scope: &Scope, entity: &str, payload: Record) -> DalResult<Record> {
        let span = info_span!("dal", operation = %Operation::Create, tenant = %scope.tenant, entity);
        async {
            let entity = self.entity(entity)?;
            let now = Utc::now();
            let mut row = admit(entity, payload)?;
            let missing: Vec<_> = entity
                .fields
                .iter()
                .filter(|f| !f.system && !row.contains(&f.name))
                .collect();
            for field in missing {
                let default = field
                    .resolve_default(now)
                    .map_err(|e| invalid_value(entity, &field.name, &e))?;
                if let Some(value) = default {
                    row.insert(field.name.clone(), value);
                }
            }
            row.insert(ID, Uuid::now_v7());
            row.insert(TENANT_ID, scope.tenant.as_str());
            row.insert(CREATED_AT, now);
            row.insert(UPDATED_AT, now);
            if entity.locking() {
                row.insert(VERSION, 1_i64);
            }

            self.hooks
                .before_write(&scope.context(entity, HookStage::PreCreate), entity, None, &row)?;

            let statement = self.compiler(entity, scope).insert(&row)?;
            let stored = self
                .call(Operation::Create, entity, scope, &statement, async {
                    self.store
                        .fetch_optional(&statement)
                        .await?
                        .ok_or_else(|| StoreError::Decode("insert returned no row".into()))
                })
                .await?;

            self.hooks
                .after_write(&scope.context(entity, HookStage::PostCreate), entity, None, &stored)
                .await?;
            self.publish(scope, entity, EventKind::Created, &stored).await;
            Ok(stored)
        }
        .instrument(span)
        .await
    }

    /// Visible row by id.
    ///
    /// # Errors
    ///
    /// [`DalError::NotFound`] when no row with `id` is visible in the tenant.
    pub async fn read(&self, scope: &Scope, entity: &str, id: Uuid) -> DalResult<Record> {
        let span = info_span!("dal", operation = %Operation::Read, tenant = %scope.tenant, entity, %id);
        async {
            let entity = self.entity(entity)?;
            self.current(Operation::Read, scope, entity, id).await
        }
        .instrument(span)
        .await
    }

    /// One page of rows plus the total match count.
    ///
    /// The page size defaults to `default_limit` and is capped at
    /// `max_limit`. When a projection is given, the local fields of
    /// requested relations are added to it.
    ///
    /// # Errors
    ///
    /// [`DalError::UnknownField`], [`DalError::UnknownRelation`],
    /// [`DalError::InvalidQuery`] or [`DalError::Store`].
    pub async fn query(&self, scope: &Scope, entity: &str, query: &Query) -> DalResult<QueryResult> {
        let span = info_span!("dal", operation = %Operation::Query, tenant = %scope.tenant, entity);
        async {
            let entity = self.entity(entity)?;
            let mut query = query.clone();
            if !query.select.is_empty() {
                for name in &query.relations {
                    let relation = relations::relation(entity, name)?;
                    if !query.select.contains(&relation.local_field) {
                        query.select.push(relation.local_field.clone());
                    }
                }
            } else {
                for name in &query.relations {
                    relations::relation(entity, name)?;
                }
            }
            let page = Pagination {
                limit:  query.limit,
                offset: query.offset.unwrap_or(0)
            }
            .bounded(self.config.default_limit, self.config.max_limit);
            query.limit = page.limit;
            query.offset = Some(page.offset);

            let compiler = self.compiler(entity, scope);
            let select = compiler.select(&query)?;
            let count = compiler.count(&query)?;
            let (mut rows, counted) = futures::try_join!(
                self.call(Operation::Query, entity, scope, &select, self.store.fetch_all(&select)),
                self.call(Operation::Query, entity, scope, &count, self.store.fetch_optional(&count))
            )?;
            let total = counted
                .as_ref()
                .and_then(|row| row.get("count"))
                .and_then(Value::as_i64)
                .map_or(0, |n| u64::try_from(n).unwrap_or(0));

            self.attach_relations(scope, entity, &mut rows, &query.relations)
                .await?;
            Ok(QueryResult {
                rows,
                total
            })
        }
        .instrument(span)
        .await
    }

    /// Parse a JSON query document and run it.
    ///
    /// # Errors
    ///
    /// [`DalError::InvalidQuery`] when the document does not parse, then as
    /// [`Self::query`].
    pub async fn query_json(
        &self,
        scope: &Scope,
        entity: &str,
        document: serde_json::Value
    ) -> DalResult<QueryResult> {
        let query: Query = serde_json::from_value(document).map_err(|e| DalError::InvalidQuery {
            entity:  entity.to_string(),
            message: e.to_string()
        })?;
        self.query(scope, entity, &query).await
    }

    /// Apply `patch` to a visible row and return the updated row.
    ///
    /// A `version` in the patch is the expected version; without one the
    /// version of the row just read is used. System and immutable fields
    /// in the patch are ignored.
    ///
    /// # Errors
    ///
    /// [`DalError::NotFound`], [`DalError::InvalidValue`],
    /// [`DalError::ValidationFailed`], [`DalError::RuleRejected`],
    /// [`DalError::OptimisticConflict`], [`DalError::Store`], or
    /// [`DalError::ActionFailed`] after the row is updated.
    pub async fn update(
        &self,
        scope: &Scope,
        entity: &str,
        id: Uuid,
        patch: Record
    ) -> DalResult<Record> {
        let span = info_span!("dal", operation = %Operation::Update, tenant = %scope.tenant, entity, %id);
        async {
            let entity = self.entity(entity)?;
            let current = self.current(Operation::Update, scope, entity, id).await?;
            let expected = entity
                .locking()
                .then(|| patch.version().or_else(|| current.version()))
                .flatten();

            let mut changes = admit(entity, patch)?;
            for field in entity.fields.iter().filter(|f| f.immutable) {
                changes.remove(&field.name);
            }
            changes.insert(UPDATED_AT, Utc::now());
            let proposed = current.merged(&changes);
            self.hooks.before_write(
                &scope.context(entity, HookStage::PreUpdate),
                entity,
                Some(&current),
                &proposed
            )?;

            let statement = self.compiler(entity, scope).update(id, &changes, expected)?;
            let updated = self
                .call(
                    Operation::Update,
                    entity,
                    scope,
                    &statement,
                    self.store.fetch_optional(&statement)
                )
                .await?
                .ok_or_else(|| missed_write(entity, id, expected))?;

            self.hooks
                .after_write(
                    &scope.context(entity, HookStage::PostUpdate),
                    entity,
                    Some(&current),
                    &updated
                )
                .await?;
            self.publish(scope, entity, EventKind::Updated, &updated).await;
            Ok(updated)
        }
        .instrument(span)
        .await
    }

    /// Delete a visible row: soft when the entity soft-deletes, physical
    /// otherwise. Returns the last snapshot of the row.
    ///
    /// # Errors
    ///
    /// [`DalError::NotFound`], [`DalError::RuleRejected`] or
    /// [`DalError::ActionFailed`] from pre-delete checks (row untouched),
    /// [`DalError::OptimisticConflict`], [`DalError::Store`], or
    /// [`DalError::ActionFailed`] from post-delete actions.
    pub async fn delete(&self, scope: &Scope, entity: &str, id: Uuid) -> DalResult<Record> {
        let span = info_span!("dal", operation = %Operation::Delete, tenant = %scope.tenant, entity, %id);
        async {
            let entity = self.entity(entity)?;
            let current = self.current(Operation::Delete, scope, entity, id).await?;
            self.hooks
                .before_delete(&scope.context(entity, HookStage::PreDelete), entity, &current)
                .await?;

            let expected = entity.locking().then(|| current.version()).flatten();
            let compiler = self.compiler(entity, scope);
            let (last, kind) = if entity.soft_delete() {
                let statement = compiler.soft_delete(id, scope.actor.as_deref(), Utc::now(), expected)?;
                let row = self
                    .call(
                        Operation::Delete,
                        entity,
                        scope,
                        &statement,
                        self.store.fetch_optional(&statement)
                    )
                    .await?
                    .ok_or_else(|| missed_write(entity, id, expected))?;
                (row, EventKind::SoftDeleted)
            } else {
                let statement = compiler.delete(id, expected);
                let affected = self
                    .call(Operation::Delete, entity, scope, &statement, self.store.execute(&statement))
                    .await?;
                if affected == 0 {
                    return Err(missed_write(entity, id, expected));
                }
                (current, EventKind::HardDeleted)
            };

            self.hooks
                .after_write(&scope.context(entity, HookStage::PostDelete), entity, None, &last)
                .await?;
            self.publish(scope, entity, kind, &last).await;
            Ok(last)
        }
        .instrument(span)
        .await
    }

    /// Bring a soft-deleted row back.
    ///
    /// # Errors
    ///
    /// [`DalError::InvalidQuery`] when the entity does not soft-delete,
    /// [`DalError::NotFound`] when no deleted row has `id`.
    pub async fn restore(&self, scope: &Scope, entity: &str, id: Uuid) -> DalResult<Record> {
        let span = info_span!("dal", operation = %Operation::Restore, tenant = %scope.tenant, entity, %id);
        async {
            let entity = self.entity(entity)?;
            let statement = self.compiler(entity, scope).restore(id, Utc::now())?;
            let restored = self
                .call(
                    Operation::Restore,
                    entity,
                    scope,
                    &statement,
                    self.store.fetch_optional(&statement)
                )
                .await?
                .ok_or_else(|| not_found(entity, id))?;
            self.publish(scope, entity, EventKind::Restored, &restored).await;
            Ok(restored)
        }
        .instrument(span)
        .await
    }

    async fn current(
        &self,
        operation: Operation,
        scope: &Scope,
        entity: &EntityMetadata,
        id: Uuid
    ) -> DalResult<Record> {
        let statement = self.compiler(entity, scope).select_by_id(id);
        self.call(operation, entity, scope, &statement, self.store.fetch_optional(&statement))
            .await?
            .ok_or_else(|| not_found(entity, id))
    }

    /// Run one store call under the scope's timeout and wrap its failure
    /// with operation context.
    async fn call<T>(
        &self,
        operation: Operation,
        entity: &EntityMetadata,
        scope: &Scope,
        statement: &Statement,
        call: impl Future<Output = Result<T, StoreError>>
    ) -> DalResult<T> {
        debug!(sql = %statement.sql, args = statement.args.len(), "executing statement");
        let result = match scope.timeout.or_else(|| self.config.statement_timeout()) {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(StoreError::Timeout(limit))),
            None => call.await
        };
        result.map_err(|source| DalError::Store {
            operation,
            entity: entity.name.clone(),
            tenant: scope.tenant.clone(),
            source
        })
    }

    async fn publish(&self, scope: &Scope, entity: &EntityMetadata, kind: EventKind, row: &Record) {
        let event = DomainEvent::new(
            self.metadata.service(),
            &scope.tenant,
            &entity.table,
            kind,
            row.clone()
        );
        if let Err(e) = self.publisher.publish(&event).await {
            warn!(subject = %event.subject, error = %e, "event publish failed");
        }
    }
}

/// Declared, non-system, mutable-or-new fields of `payload`, coerced to
/// their types. Everything else is dropped.
fn admit(entity: &EntityMetadata, payload: Record) -> DalResult<Record> {
    let mut out = Record::new();
    for (name, value) in payload.into_inner() {
        let Some(field) = entity.column(&name) else {
            debug!(entity = %entity.name, field = %name, "dropping undeclared field");
            continue;
        };
        if field.system {
            continue;
        }
        let value = field
            .admit(value)
            .map_err(|e| invalid_value(entity, &name, &e))?;
        out.insert(name, value);
    }
    Ok(out)
}

fn invalid_value(entity: &EntityMetadata, field: &str, error: &impl ToString) -> DalError {
    DalError::InvalidValue {
        entity:  entity.name.clone(),
        field:   field.to_string(),
        message: error.to_string()
    }
}

fn not_found(entity: &EntityMetadata, id: Uuid) -> DalError {
    DalError::NotFound {
        entity: entity.name.clone(),
        id
    }
}

/// A write matching nothing after a successful read lost a race.
fn missed_write(entity: &EntityMetadata, id: Uuid, expected: Option<i64>) -> DalError {
    match expected {
        Some(expected) => DalError::OptimisticConflict {
            entity: entity.name.clone(),
            id,
            expected
        },
        None => not_found(entity, id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering}
    };

    use async_trait::async_trait;
    use metadal_core::SortDirection;
    use serde_json::json;

    use super::*;
    use crate::{
        events::BroadcastPublisher,
        hooks::HookError,
        query::Condition,
        schema::SchemaOp,
        store::MemoryStore
    };

    fn metadata() -> Arc<ServiceMetadata> {
        Arc::new(
            ServiceMetadata::from_json(json!({
                "service": "helpdesk",
                "entities": [
                    {
                        "name": "Ticket",
                        "fields": [
                            { "name": "title", "type": "text", "required": true, "max_length": 80 },
                            { "name": "status", "type": "enum", "values": ["open", "closed"], "default": "open" },
                            { "name": "priority", "type": "integer", "default": 3 },
                            { "name": "code", "type": "text", "unique_per_tenant": true, "immutable": true }
                        ],
                        "dal": { "soft_delete": true, "optimistic_locking": true },
                        "hooks": {
                            "pre_update": {
                                "rules": [{
                                    "condition": "old.status == 'closed'",
                                    "action": "reject",
                                    "message": "closed tickets are read-only"
                                }]
                            },
                            "post_update": {
                                "triggers": [{ "on_field_change": "status", "action": "status_changed" }]
                            },
                            "pre_delete": { "checks": ["deletable"] }
                        }
                    },
                    {
                        "name": "Note",
                        "fields": [{ "name": "body", "type": "text", "required": true }],
                        "hooks": { "post_create": { "actions": ["explode"] } }
                    }
                ]
            }))
            .unwrap()
        )
    }

    struct Fixture {
        engine:  Engine,
        store:   Arc<MemoryStore>,
        scope:   Scope,
        changes: Arc<AtomicUsize>
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let changes = Arc::new(AtomicUsize::new(0));
        let counter = changes.clone();
        let mut registry = HookRegistry::new();
        registry
            .register_trigger_fn("status_changed", move |_, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .register_action_fn("explode", |_, _| Err(HookError::new("mailer down")))
            .register_check_fn("deletable", |_, row| {
                if row.get_or_null("title").as_str() == Some("keep") {
                    Err(HookError::new("ticket is pinned"))
                } else {
                    Ok(())
                }
            });
        let engine = Engine::builder(metadata(), store.clone())
            .hooks(Arc::new(registry))
            .build()
            .unwrap();
        let scope = Scope::new(TenantId::new("t1").unwrap()).with_actor("alice");
        engine.provision_tenant(&scope.tenant).await.unwrap();
        Fixture {
            engine,
            store,
            scope,
            changes
        }
    }

    fn ticket(title: &str) -> Record {
        Record::new().with("title", title)
    }

    #[tokio::test]
    async fn create_assigns_system_fields_and_defaults() {
        let f = fixture().await;
        let forged = Uuid::new_v4();
        let row = f
            .engine
            .create(
                &f.scope,
                "Ticket",
                ticket("printer")
                    .with("id", forged)
                    .with("tenant_id", "t2")
                    .with("version", 42)
                    .with("watchers", 7)
            )
            .await
            .unwrap();
        assert_ne!(row.id(), Some(forged));
        assert_eq!(row.get("tenant_id"), Some(&Value::from("t1")));
        assert_eq!(row.version(), Some(1));
        assert_eq!(row.get("status"), Some(&Value::from("open")));
        assert_eq!(row.get("priority"), Some(&Value::Int(3)));
        assert!(!row.contains("watchers"));
        assert_eq!(row.get("created_at"), row.get("updated_at"));
    }

    #[tokio::test]
    async fn failed_validation_stores_nothing() {
        let f = fixture().await;
        let err = f
            .engine
            .create(&f.scope, "Ticket", Record::new().with("status", "open"))
            .await
            .unwrap_err();
        assert!(matches!(err, DalError::ValidationFailed { .. }), "{err}");
        assert_eq!(err.violations()[0].field, "title");
        assert!(f.store.rows("tenant_t1", "tickets").await.unwrap().is_empty());

        let err = f
            .engine
            .create(&f.scope, "Ticket", ticket("x").with("status", "lost"))
            .await
            .unwrap_err();
        assert!(matches!(err, DalError::InvalidValue { ref field, .. } if field == "status"));
    }

    #[tokio::test]
    async fn rows_are_invisible_to_other_tenants() {
        let f = fixture().await;
        let other = Scope::new(TenantId::new("t2").unwrap());
        f.engine.provision_tenant(&other.tenant).await.unwrap();
        let row = f.engine.create(&f.scope, "Ticket", ticket("mine")).await.unwrap();
        let id = row.id().unwrap();

        assert_eq!(f.engine.read(&f.scope, "Ticket", id).await.unwrap(), row);
        let err = f.engine.read(&other, "Ticket", id).await.unwrap_err();
        assert!(err.is_not_found());
        let err = f
            .engine
            .update(&other, "Ticket", id, ticket("stolen"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(f.engine.query(&other, "Ticket", &Query::new()).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn update_bumps_version_and_rejects_stale_writes() {
        let f = fixture().await;
        let row = f.engine.create(&f.scope, "Ticket", ticket("a").with("code", "T-1")).await.unwrap();
        let id = row.id().unwrap();

        let updated = f
            .engine
            .update(&f.scope, "Ticket", id, ticket("b").with("code", "T-2"))
            .await
            .unwrap();
        assert_eq!(updated.version(), Some(2));
        assert_eq!(updated.get("title"), Some(&Value::from("b")));
        assert_eq!(updated.get("code"), Some(&Value::from("T-1")));
        assert_eq!(updated.get("created_at"), row.get("created_at"));

        let err = f
            .engine
            .update(&f.scope, "Ticket", id, ticket("c").with("version", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, DalError::OptimisticConflict { expected: 1, .. }), "{err}");
        let stored = f.engine.read(&f.scope, "Ticket", id).await.unwrap();
        assert_eq!(stored.get("title"), Some(&Value::from("b")));
    }

    #[tokio::test]
    async fn rules_and_triggers_run_around_update() {
        let f = fixture().await;
        let id = f.engine.create(&f.scope, "Ticket", ticket("a")).await.unwrap().id().unwrap();

        f.engine
            .update(&f.scope, "Ticket", id, Record::new().with("priority", 5))
            .await
            .unwrap();
        assert_eq!(f.changes.load(Ordering::SeqCst), 0);

        f.engine
            .update(&f.scope, "Ticket", id, Record::new().with("status", "closed"))
            .await
            .unwrap();
        assert_eq!(f.changes.load(Ordering::SeqCst), 1);

        let err = f
            .engine
            .update(&f.scope, "Ticket", id, Record::new().with("status", "open"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "closed tickets are read-only");
        assert_eq!(f.changes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn soft_delete_hides_and_restore_returns() {
        let f = fixture().await;
        let id = f.engine.create(&f.scope, "Ticket", ticket("a")).await.unwrap().id().unwrap();

        let deleted = f.engine.delete(&f.scope, "Ticket", id).await.unwrap();
        assert!(!deleted.get_or_null("deleted_at").is_null());
        assert_eq!(deleted.get("deleted_by"), Some(&Value::from("alice")));
        assert_eq!(deleted.version(), Some(2));

        assert!(f.engine.read(&f.scope, "Ticket", id).await.unwrap_err().is_not_found());
        assert_eq!(f.engine.query(&f.scope, "Ticket", &Query::new()).await.unwrap().total, 0);
        assert!(f.engine.delete(&f.scope, "Ticket", id).await.unwrap_err().is_not_found());
        assert_eq!(f.store.rows("tenant_t1", "tickets").await.unwrap().len(), 1);

        let restored = f.engine.restore(&f.scope, "Ticket", id).await.unwrap();
        assert!(restored.get_or_null("deleted_at").is_null());
        assert_eq!(f.engine.read(&f.scope, "Ticket", id).await.unwrap().version(), Some(3));
        assert!(f.engine.restore(&f.scope, "Ticket", id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn check_blocks_delete() {
        let f = fixture().await;
        let id = f.engine.create(&f.scope, "Ticket", ticket("keep")).await.unwrap().id().unwrap();
        let err = f.engine.delete(&f.scope, "Ticket", id).await.unwrap_err();
        assert!(matches!(err, DalError::ActionFailed { ref name, .. } if name == "deletable"));
        assert!(f.engine.read(&f.scope, "Ticket", id).await.is_ok());
    }

    #[tokio::test]
    async fn hard_delete_returns_last_snapshot() {
        let f = fixture().await;
        let publisher = Arc::new(BroadcastPublisher::new(8));
        let engine = Engine::builder(metadata(), f.store.clone())
            .publisher(publisher.clone())
            .build()
            .unwrap();
        let mut events = publisher.subscribe();

        let note = engine
            .create(&f.scope, "Note", Record::new().with("body", "hi"))
            .await
            .unwrap();
        let id = note.id().unwrap();
        let last = engine.delete(&f.scope, "Note", id).await.unwrap();
        assert_eq!(last, note);
        assert!(f.store.rows("tenant_t1", "notes").await.unwrap().is_empty());
        assert!(engine.delete(&f.scope, "Note", id).await.unwrap_err().is_not_found());

        let created = events.recv().await.unwrap();
        assert_eq!(created.subject, "helpdesk.t1.notes.created");
        let deleted = events.recv().await.unwrap();
        assert_eq!(deleted.subject, "helpdesk.t1.notes.deleted");
        assert_eq!(deleted.kind, EventKind::HardDeleted);
        assert_eq!(deleted.payload.id(), Some(id));
    }

    #[tokio::test]
    async fn post_create_failure_keeps_row_and_skips_event() {
        let f = fixture().await;
        let publisher = Arc::new(BroadcastPublisher::new(8));
        let registry = {
            let mut r = HookRegistry::new();
            r.register_action_fn("explode", |_, _| Err(HookError::new("mailer down")));
            Arc::new(r)
        };
        let engine = Engine::builder(metadata(), f.store.clone())
            .hooks(registry)
            .publisher(publisher.clone())
            .build()
            .unwrap();
        let mut events = publisher.subscribe();

        let err = engine
            .create(&f.scope, "Note", Record::new().with("body", "hi"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, DalError::ActionFailed { ref name, stage: HookStage::PostCreate, .. } if name == "explode")
        );
        assert_eq!(f.store.rows("tenant_t1", "notes").await.unwrap().len(), 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn query_pages_with_total() {
        let f = fixture().await;
        for i in 0..5 {
            f.engine
                .create(&f.scope, "Ticket", ticket(&format!("t{i}")).with("priority", i))
                .await
                .unwrap();
        }
        let result = f
            .engine
            .query(
                &f.scope,
                "Ticket",
                &Query::new()
                    .select(["title"])
                    .filter(Condition::leaf("priority", crate::query::Operator::Gte, 1))
                    .order_by("priority", SortDirection::Desc)
                    .limit(2)
                    .offset(1)
            )
            .await
            .unwrap();
        assert_eq!(result.total, 4);
        let titles: Vec<_> = result.rows.iter().map(|r| r.get_or_null("title").clone()).collect();
        assert_eq!(titles, vec![Value::from("t3"), Value::from("t2")]);
        assert_eq!(result.rows[0].len(), 1);

        let err = f
            .engine
            .query(&f.scope, "Ticket", &Query::new().filter(Condition::eq("owner", "bob")))
            .await
            .unwrap_err();
        assert!(matches!(err, DalError::UnknownField { ref field, .. } if field == "owner"));
    }

    #[tokio::test]
    async fn query_applies_configured_page_bounds() {
        let store = Arc::new(MemoryStore::new());
        let config = DalConfig {
            default_limit: 2,
            max_limit: 3,
            ..DalConfig::new("helpdesk")
        };
        let engine = Engine::builder(metadata(), store).config(config).build().unwrap();
        let scope = Scope::new(TenantId::new("t1").unwrap());
        engine.provision_tenant(&scope.tenant).await.unwrap();
        for i in 0..5 {
            engine.create(&scope, "Ticket", ticket(&format!("t{i}"))).await.unwrap();
        }
        let page = engine.query(&scope, "Ticket", &Query::new()).await.unwrap();
        assert_eq!((page.rows.len(), page.total), (2, 5));
        let page = engine
            .query_json(&scope, "Ticket", json!({ "limit": 50 }))
            .await
            .unwrap();
        assert_eq!(page.rows.len(), 3);
        let err = engine
            .query_json(&scope, "Ticket", json!({ "limit": "many" }))
            .await
            .unwrap_err();
        assert!(matches!(err, DalError::InvalidQuery { .. }));
    }

    #[tokio::test]
    async fn unique_violation_is_a_store_error() {
        let f = fixture().await;
        f.engine.create(&f.scope, "Ticket", ticket("a").with("code", "X")).await.unwrap();
        let err = f
            .engine
            .create(&f.scope, "Ticket", ticket("b").with("code", "X"))
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                DalError::Store { operation: Operation::Create, source: StoreError::UniqueViolation(_), .. }
            ),
            "{err}"
        );
    }

    #[tokio::test]
    async fn unknown_entity() {
        let f = fixture().await;
        let err = f.engine.read(&f.scope, "Invoice", Uuid::nil()).await.unwrap_err();
        assert!(matches!(err, DalError::UnknownEntity(name) if name == "Invoice"));
    }

    /// Store that never answers reads.
    struct Stalled {
        inner: MemoryStore,
        calls: Mutex<usize>
    }

    #[async_trait]
    impl Store for Stalled {
        async fn fetch_all(&self, statement: &Statement) -> Result<Vec<Record>, StoreError> {
            *self.calls.lock().unwrap() += 1;
            if matches!(statement.plan, crate::query::Plan::Select(_)) {
                std::future::pending::<()>().await;
            }
            self.inner.fetch_all(statement).await
        }

        async fn execute(&self, statement: &Statement) -> Result<u64, StoreError> {
            self.inner.execute(statement).await
        }

        async fn apply_schema(&self, op: &SchemaOp) -> Result<(), StoreError> {
            self.inner.apply_schema(op).await
        }

        async fn list_namespaces(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
            self.inner.list_namespaces(prefix).await
        }
    }

    #[tokio::test]
    async fn store_calls_are_bounded_by_the_scope_timeout() {
        let store = Arc::new(Stalled {
            inner: MemoryStore::new(),
            calls: Mutex::new(0)
        });
        let engine = Engine::builder(metadata(), store.clone()).build().unwrap();
        let scope = Scope::new(TenantId::new("t1").unwrap()).with_timeout(Duration::from_millis(20));
        let err = engine.read(&scope, "Ticket", Uuid::nil()).await.unwrap_err();
        assert!(
            matches!(err, DalError::Store { source: StoreError::Timeout(_), .. }),
            "{err}"
        );
        assert!(err.is_retryable());
        assert_eq!(*store.calls.lock().unwrap(), 1);
    }

    /// Store that records how many schema operations run at once.
    #[derive(Default)]
    struct Overlap {
        inner:     MemoryStore,
        in_flight: AtomicUsize,
        peak:      AtomicUsize
    }

    #[async_trait]
    impl Store for Overlap {
        async fn fetch_all(&self, statement: &Statement) -> Result<Vec<Record>, StoreError> {
            self.inner.fetch_all(statement).await
        }

        async fn execute(&self, statement: &Statement) -> Result<u64, StoreError> {
            self.inner.execute(statement).await
        }

        async fn apply_schema(&self, op: &SchemaOp) -> Result<(), StoreError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            let result = self.inner.apply_schema(op).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn list_namespaces(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
            self.inner.list_namespaces(prefix).await
        }
    }

    #[tokio::test]
    async fn schema_work_on_one_tenant_is_serialized() {
        let store = Arc::new(Overlap::default());
        let engine = Engine::builder(metadata(), store.clone()).build().unwrap();
        let tenant = TenantId::new("t1").unwrap();
        let migrations = crate::schema::plan_create(engine.metadata().entities());

        let (first, second, applied) = tokio::join!(
            engine.provision_tenant(&tenant),
            engine.provision_tenant(&tenant),
            engine.migrator().apply(&tenant, &migrations)
        );
        assert!(first.unwrap().is_success());
        assert!(second.unwrap().is_success());
        assert_eq!(applied.tenant, tenant);
        assert_eq!(store.peak.load(Ordering::SeqCst), 1);
    }
}
