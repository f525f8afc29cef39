// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Per-tenant migration audit log.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metadal_core::{
    Operation, Record, SortDirection, TenantId,
    metadata::{EntityMetadata, FieldMetadata, FieldType, ServiceMetadata}
};
use uuid::Uuid;

use super::{MigrationKind, SchemaOp, create_entity};
use crate::{
    error::{DalError, DalResult, StoreError},
    query::{Query, QueryCompiler},
    store::Store
};

/// Entity describing the audit table.
pub const HISTORY_ENTITY: &str = "MigrationHistory";

/// Audit table present in every tenant namespace.
pub const HISTORY_TABLE: &str = "migration_history";

/// One attempted migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Service whose metadata drove the change.
    pub service:    String,
    /// Change kind.
    pub kind:       MigrationKind,
    /// Human-readable description, e.g. `add-column tickets.code`.
    pub target:     String,
    /// Statements run, or the failing statement.
    pub detail:     String,
    /// Whether every statement succeeded.
    pub success:    bool,
    /// Store error of a failed attempt.
    pub error:      Option<String>,
    /// When the attempt finished.
    pub applied_at: DateTime<Utc>
}

/// Sink for migration attempts.
#[async_trait]
pub trait MigrationLog: Send + Sync {
    /// Create the log storage for a tenant, if missing.
    async fn ensure(&self, tenant: &TenantId) -> DalResult<()>;

    /// Append one attempt.
    async fn record(&self, tenant: &TenantId, entry: &HistoryEntry) -> DalResult<()>;
}

/// Log writing to [`HISTORY_TABLE`] through the regular statement compiler.
pub struct StoreMigrationLog {
    store:    Arc<dyn Store>,
    metadata: ServiceMetadata,
    prefix:   String
}

impl std::fmt::Debug for StoreMigrationLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreMigrationLog")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// Metadata of the audit table.
///
/// # Errors
///
/// Never in practice; the description is static and validated like any
/// other entity.
pub fn history_metadata() -> DalResult<ServiceMetadata> {
    let text = |name: &str| FieldMetadata::new(name, FieldType::Text);
    let entity = EntityMetadata::new(HISTORY_ENTITY)
        .with_table(HISTORY_TABLE)
        .with_field(text("service").required())
        .with_field(text("kind").required())
        .with_field(text("target").required())
        .with_field(text("detail"))
        .with_field(FieldMetadata::new("success", FieldType::Boolean).required())
        .with_field(text("error"))
        .with_field(FieldMetadata::new("applied_at", FieldType::Timestamp).required());
    Ok(ServiceMetadata::new("metadal", vec![entity])?)
}

impl StoreMigrationLog {
    /// Log over `store` for namespaces named `{prefix}{tenant}`.
    ///
    /// # Errors
    ///
    /// See [`history_metadata`].
    pub fn new(store: Arc<dyn Store>, prefix: impl Into<String>) -> DalResult<Self> {
        Ok(Self {
            store,
            metadata: history_metadata()?,
            prefix: prefix.into()
        })
    }

    fn entity(&self) -> DalResult<&EntityMetadata> {
        self.metadata
            .entity(HISTORY_ENTITY)
            .ok_or_else(|| DalError::UnknownEntity(HISTORY_ENTITY.to_string()))
    }

    fn store_error(tenant: &TenantId, source: StoreError) -> DalError {
        DalError::Store {
            operation: Operation::Migrate,
            entity: HISTORY_TABLE.to_string(),
            tenant: tenant.clone(),
            source
        }
    }

    /// Every recorded attempt for a tenant, oldest first.
    ///
    /// # Errors
    ///
    /// [`DalError::Store`] when the table is unreadable.
    pub async fn entries(&self, tenant: &TenantId) -> DalResult<Vec<Record>> {
        let entity = self.entity()?;
        let compiler = QueryCompiler::new(entity, tenant, &self.prefix);
        let statement = compiler.select(&Query::new().order_by("applied_at", SortDirection::Asc))?;
        self.store
            .fetch_all(&statement)
            .await
            .map_err(|e| Self::store_error(tenant, e))
    }
}

#[async_trait]
impl MigrationLog for StoreMigrationLog {
    async fn ensure(&self, tenant: &TenantId) -> DalResult<()> {
        let entity = self.entity()?;
        let schema = tenant.namespace(&self.prefix);
        let ops = std::iter::once(SchemaOp::CreateSchema {
            schema: schema.clone()
        })
        .chain(create_entity(&schema, entity));
        for op in ops {
            self.store
                .apply_schema(&op)
                .await
                .map_err(|e| Self::store_error(tenant, e))?;
        }
        Ok(())
    }

    async fn record(&self, tenant: &TenantId, entry: &HistoryEntry) -> DalResult<()> {
        let entity = self.entity()?;
        let row = Record::new()
            .with("id", Uuid::now_v7())
            .with("created_at", entry.applied_at)
            .with("updated_at", entry.applied_at)
            .with("service", entry.service.as_str())
            .with("kind", entry.kind.as_str())
            .with("target", entry.target.as_str())
            .with("detail", entry.detail.as_str())
            .with("success", entry.success)
            .with("error", entry.error.clone())
            .with("applied_at", entry.applied_at);
        let statement = QueryCompiler::new(entity, tenant, &self.prefix).insert(&row)?;
        self.store
            .execute(&statement)
            .await
            .map_err(|e| Self::store_error(tenant, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use metadal_core::Value;

    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn ensure_then_record() {
        let store = Arc::new(MemoryStore::new());
        let log = StoreMigrationLog::new(store.clone(), "tenant_").unwrap();
        let tenant = TenantId::new("t1").unwrap();
        log.ensure(&tenant).await.unwrap();
        log.ensure(&tenant).await.unwrap();

        log.record(
            &tenant,
            &HistoryEntry {
                service:    "helpdesk".into(),
                kind:       MigrationKind::AddColumn,
                target:     "add-column tickets.code".into(),
                detail:     "ALTER TABLE ...".into(),
                success:    false,
                error:      Some("boom".into()),
                applied_at: Utc::now()
            }
        )
        .await
        .unwrap();

        let entries = log.entries(&tenant).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].get("kind"), Some(&Value::from("add-column")));
        assert_eq!(entries[0].get("success"), Some(&Value::Bool(false)));
        assert_eq!(entries[0].get("tenant_id"), Some(&Value::from("t1")));
        assert_eq!(entries[0].get("error"), Some(&Value::from("boom")));
    }
}
