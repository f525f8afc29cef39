// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Schema provisioning and migration.
//!
//! DDL is derived from the same metadata the query compiler reads, so the
//! tables a tenant gets are exactly the ones the engine writes to.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `types` | Logical type → storage type mapping |
//! | `ddl` | Column, index and [`SchemaOp`] definitions |
//! | `diff` | Metadata version diff into [`Migration`]s |
//! | `history` | Per-tenant audit of applied migrations |
//! | `migrator` | Provisioning and per-tenant application |
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn run(v1: metadal_core::metadata::ServiceMetadata, v2: metadal_core::metadata::ServiceMetadata)
//! # -> metadal_engine::error::DalResult<()> {
//! use std::sync::Arc;
//!
//! use metadal_core::TenantId;
//! use metadal_engine::{config::DalConfig, schema::Migrator, store::MemoryStore};
//!
//! let migrator = Migrator::new(Arc::new(MemoryStore::new()), &DalConfig::new("helpdesk"))?;
//! migrator.provision_tenant(&TenantId::new("acme")?, &v1).await?;
//! for report in migrator.migrate(&v1, &v2).await? {
//!     if let Some(failure) = report.error {
//!         eprintln!("{}: {}", report.tenant, failure.message);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod ddl;
mod diff;
mod history;
mod migrator;
pub mod types;

pub use ddl::{
    ColumnDef, ColumnDefault, IndexDef, IndexFilter, SchemaOp, column_defs, create_entity,
    index_defs
};
pub use diff::{Change, Migration, MigrationKind, diff, diff_entities, plan_create};
pub use history::{
    HISTORY_ENTITY, HISTORY_TABLE, HistoryEntry, MigrationLog, StoreMigrationLog,
    history_metadata
};
pub use migrator::{MigrationFailure, Migrator, TenantReport};
pub use types::{PostgresTypeMapper, SqlType, TypeMapper, cast_type};
