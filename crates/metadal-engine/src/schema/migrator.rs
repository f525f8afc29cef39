// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Tenant provisioning and migration application.
//!
//! Work on one tenant is serialized through an in-process async lock keyed
//! by tenant id; different tenants proceed in parallel. A failing statement
//! stops the remaining migrations of that tenant only, and every attempt is
//! written to the tenant's migration history.

use std::{collections::HashMap, fmt, sync::Arc};

use chrono::Utc;
use futures::future::join_all;
use metadal_core::{Operation, TenantId, metadata::ServiceMetadata};
use tokio::sync::Mutex;
use tracing::{Instrument, error, info, info_span};

use super::{
    HistoryEntry, Migration, MigrationLog, SchemaOp, StoreMigrationLog, diff, plan_create
};
use crate::{
    config::DalConfig,
    error::{DalError, DalResult, StoreError},
    store::Store
};

/// Where a tenant's run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFailure {
    /// Description of the failed migration.
    pub migration: String,
    /// Statement the store rejected.
    pub statement: String,
    /// Store error text.
    pub message:   String
}

/// Outcome of applying a migration list to one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantReport {
    /// Tenant migrated.
    pub tenant:  TenantId,
    /// Migrations applied before any failure.
    pub applied: usize,
    /// Migrations in the list.
    pub total:   usize,
    /// First failure, if any.
    pub error:   Option<MigrationFailure>
}

impl TenantReport {
    /// Every migration applied.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Applies schema changes tenant by tenant.
///
/// Tenant locks live as long as the migrator; share one instance to
/// serialize work on a tenant.
pub struct Migrator {
    store:   Arc<dyn Store>,
    log:     Arc<dyn MigrationLog>,
    prefix:  String,
    service: String,
    locks:   Mutex<HashMap<TenantId, Arc<Mutex<()>>>>
}

impl fmt::Debug for Migrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migrator")
            .field("prefix", &self.prefix)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl Migrator {
    /// Migrator recording history in each tenant's [`HISTORY_TABLE`](super::HISTORY_TABLE).
    ///
    /// # Errors
    ///
    /// Propagates a failure to build the history metadata.
    pub fn new(store: Arc<dyn Store>, config: &DalConfig) -> DalResult<Self> {
        let log = StoreMigrationLog::new(store.clone(), config.schema_prefix.clone())?;
        Ok(Self {
            store,
            log: Arc::new(log),
            prefix: config.schema_prefix.clone(),
            service: config.service.clone(),
            locks: Mutex::new(HashMap::new())
        })
    }

    /// Replace the history sink.
    #[must_use]
    pub fn with_log(mut self, log: Arc<dyn MigrationLog>) -> Self {
        self.log = log;
        self
    }

    async fn tenant_lock(&self, tenant: &TenantId) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(tenant.clone())
            .or_default()
            .clone()
    }

    fn store_error(&self, tenant: &TenantId, source: StoreError) -> DalError {
        DalError::Store {
            operation: Operation::Migrate,
            entity: tenant.namespace(&self.prefix),
            tenant: tenant.clone(),
            source
        }
    }

    /// Create the namespace, history table and every entity table of
    /// `metadata` for a new tenant.
    ///
    /// # Errors
    ///
    /// [`DalError::Store`] when the namespace or history table cannot be
    /// created. Entity table failures are reported in the returned
    /// [`TenantReport`].
    pub async fn provision_tenant(
        &self,
        tenant: &TenantId,
        metadata: &ServiceMetadata
    ) -> DalResult<TenantReport> {
        let span = info_span!("provision", tenant = %tenant, service = %metadata.service());
        async {
            let lock = self.tenant_lock(tenant).await;
            let _guard = lock.lock().await;
            self.store
                .apply_schema(&SchemaOp::CreateSchema {
                    schema: tenant.namespace(&self.prefix)
                })
                .await
                .map_err(|e| self.store_error(tenant, e))?;
            self.log.ensure(tenant).await?;
            let migrations = plan_create(metadata.entities());
            Ok(self.run(tenant, &migrations).await)
        }
        .instrument(span)
        .await
    }

    /// Apply `migrations` in order to one tenant.
    pub async fn apply(&self, tenant: &TenantId, migrations: &[Migration]) -> TenantReport {
        let span = info_span!("migrate", tenant = %tenant, migrations = migrations.len());
        async {
            let lock = self.tenant_lock(tenant).await;
            let _guard = lock.lock().await;
            self.run(tenant, migrations).await
        }
        .instrument(span)
        .await
    }

    /// Apply `migrations` to every tenant concurrently.
    pub async fn apply_all(&self, tenants: &[TenantId], migrations: &[Migration]) -> Vec<TenantReport> {
        join_all(tenants.iter().map(|tenant| self.apply(tenant, migrations))).await
    }

    /// Diff two metadata versions and apply the result to every tenant.
    ///
    /// # Errors
    ///
    /// [`DalError::Catalog`] when tenants cannot be listed.
    pub async fn migrate(
        &self,
        old: &ServiceMetadata,
        new: &ServiceMetadata
    ) -> DalResult<Vec<TenantReport>> {
        let migrations = diff(old, new);
        let tenants = self.list_tenants().await?;
        info!(
            migrations = migrations.len(),
            tenants = tenants.len(),
            "applying metadata diff"
        );
        Ok(self.apply_all(&tenants, &migrations).await)
    }

    /// Tenants with a namespace in the store.
    ///
    /// # Errors
    ///
    /// [`DalError::Catalog`] when the store cannot list namespaces.
    pub async fn list_tenants(&self) -> DalResult<Vec<TenantId>> {
        let namespaces = self
            .store
            .list_namespaces(&self.prefix)
            .await
            .map_err(|source| DalError::Catalog {
                prefix: self.prefix.clone(),
                source
            })?;
        Ok(namespaces
            .iter()
            .filter_map(|ns| TenantId::from_namespace(ns, &self.prefix))
            .collect())
    }

    /// Remove a tenant namespace with everything in it.
    ///
    /// # Errors
    ///
    /// [`DalError::Store`] when the store refuses.
    pub async fn drop_tenant(&self, tenant: &TenantId) -> DalResult<()> {
        let lock = self.tenant_lock(tenant).await;
        let _guard = lock.lock().await;
        self.store
            .apply_schema(&SchemaOp::DropSchema {
                schema: tenant.namespace(&self.prefix)
            })
            .await
            .map_err(|e| self.store_error(tenant, e))?;
        info!(tenant = %tenant, "tenant dropped");
        Ok(())
    }

    async fn run(&self, tenant: &TenantId, migrations: &[Migration]) -> TenantReport {
        let schema = tenant.namespace(&self.prefix);
        let mut report = TenantReport {
            tenant:  tenant.clone(),
            applied: 0,
            total:   migrations.len(),
            error:   None
        };
        for migration in migrations {
            let ops = migration.ops(&schema);
            let mut failure = None;
            for op in &ops {
                if let Err(e) = self.store.apply_schema(op).await {
                    failure = Some(MigrationFailure {
                        migration: migration.to_string(),
                        statement: op.to_sql(),
                        message:   e.to_string()
                    });
                    break;
                }
            }
            let entry = HistoryEntry {
                service:    self.service.clone(),
                kind:       migration.kind(),
                target:     migration.to_string(),
                detail:     match &failure {
                    Some(f) => f.statement.clone(),
                    None => ops.iter().map(SchemaOp::to_sql).collect::<Vec<_>>().join(";\n")
                },
                success:    failure.is_none(),
                error:      failure.as_ref().map(|f| f.message.clone()),
                applied_at: Utc::now()
            };
            if let Err(e) = self.log.record(tenant, &entry).await {
                error!(tenant = %tenant, migration = %migration, error = %e, "failed to record migration history");
            }
            if let Some(failure) = failure {
                error!(
                    tenant = %tenant,
                    migration = %failure.migration,
                    statement = %failure.statement,
                    error = %failure.message,
                    "migration failed, skipping the rest for this tenant"
                );
                report.error = Some(failure);
                return report;
            }
            info!(tenant = %tenant, migration = %migration, "migration applied");
            report.applied += 1;
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use metadal_core::Value;
    use serde_json::json;

    use super::*;
    use crate::{schema::MigrationKind, store::MemoryStore};

    fn service(fields: serde_json::Value) -> ServiceMetadata {
        ServiceMetadata::from_json(json!({
            "service": "svc",
            "entities": [{ "name": "Item", "fields": fields }]
        }))
        .unwrap()
    }

    fn setup() -> (Arc<MemoryStore>, Migrator) {
        let store = Arc::new(MemoryStore::new());
        let migrator = Migrator::new(store.clone(), &DalConfig::new("svc")).unwrap();
        (store, migrator)
    }

    #[tokio::test]
    async fn provision_creates_namespace_history_and_tables() {
        let (store, migrator) = setup();
        let tenant = TenantId::new("t1").unwrap();
        let v1 = service(json!([{ "name": "a", "type": "text", "indexed": true }]));
        let report = migrator.provision_tenant(&tenant, &v1).await.unwrap();
        assert!(report.is_success());
        assert_eq!((report.applied, report.total), (1, 1));

        let columns = store.columns("tenant_t1", "items").await.unwrap();
        assert!(columns.contains(&"a".to_string()));
        let history = store.rows("tenant_t1", "migration_history").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(
            history[0].get("kind"),
            Some(&Value::from(MigrationKind::CreateTable.as_str()))
        );
        assert_eq!(migrator.list_tenants().await.unwrap(), [tenant]);
    }

    #[tokio::test]
    async fn failure_is_scoped_to_its_tenant() {
        let (store, migrator) = setup();
        let healthy = TenantId::new("t1").unwrap();
        let broken = TenantId::new("t2").unwrap();
        let v1 = service(json!([{ "name": "a", "type": "text" }, { "name": "b", "type": "text" }]));
        let v2 = service(json!([{ "name": "b", "type": "text" }, { "name": "c", "type": "text" }]));
        migrator.provision_tenant(&healthy, &v1).await.unwrap();
        let empty = ServiceMetadata::new("svc", Vec::new()).unwrap();
        migrator.provision_tenant(&broken, &empty).await.unwrap();

        let reports = migrator.migrate(&v1, &v2).await.unwrap();
        assert_eq!(reports.len(), 2);
        let ok = reports.iter().find(|r| r.tenant == healthy).unwrap();
        assert!(ok.is_success());
        assert_eq!(ok.applied, 2);
        let failed = reports.iter().find(|r| r.tenant == broken).unwrap();
        assert_eq!(failed.applied, 0);
        let failure = failed.error.as_ref().unwrap();
        assert!(failure.statement.contains("\"tenant_t2\".\"items\""), "{}", failure.statement);

        let columns = store.columns("tenant_t1", "items").await.unwrap();
        assert!(columns.contains(&"c".to_string()));
        assert!(!columns.contains(&"a".to_string()));

        let history = store.rows("tenant_t2", "migration_history").await.unwrap();
        let last = history.last().unwrap();
        assert_eq!(last.get("success"), Some(&Value::Bool(false)));
        assert!(!last.get_or_null("error").is_null());
    }

    #[tokio::test]
    async fn drop_tenant_removes_namespace() {
        let (store, migrator) = setup();
        let tenant = TenantId::new("gone").unwrap();
        migrator
            .provision_tenant(&tenant, &service(json!([])))
            .await
            .unwrap();
        migrator.drop_tenant(&tenant).await.unwrap();
        assert!(store.namespaces().await.is_empty());
        assert!(migrator.list_tenants().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropping_a_tenant_keeps_its_lock() {
        let (_, migrator) = setup();
        let tenant = TenantId::new("gone").unwrap();
        let before = migrator.tenant_lock(&tenant).await;
        migrator
            .provision_tenant(&tenant, &service(json!([])))
            .await
            .unwrap();
        migrator.drop_tenant(&tenant).await.unwrap();
        assert!(Arc::ptr_eq(&before, &migrator.tenant_lock(&tenant).await));
    }
}
