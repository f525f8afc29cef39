// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

//! # metadal
//!
//! One crate, all features. Re-exports:
//! - the metadata model, dynamic values and tenant ids from `metadal-core`
//! - the query compiler, CRUD engine, hooks, schema migrator, stores and
//!   publishers from `metadal-engine`
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use metadal::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), DalError> {
//! let metadata = ServiceMetadata::from_json(serde_json::json!({
//!     "service": "helpdesk",
//!     "entities": [{
//!         "name": "Ticket",
//!         "fields": [{ "name": "title", "type": "text", "required": true }],
//!         "policy": { "soft_delete": true, "optimistic_locking": true }
//!     }]
//! }))?;
//!
//! let engine = Engine::builder(Arc::new(metadata), Arc::new(MemoryStore::new())).build()?;
//! let scope = Scope::new(TenantId::new("acme")?);
//! engine.provision_tenant(&scope.tenant).await?;
//!
//! let ticket = engine
//!     .create(&scope, "Ticket", Record::new().with("title", "Printer on fire"))
//!     .await?;
//! assert_eq!(ticket.version(), Some(1));
//!
//! let page = engine.query(&scope, "Ticket", &Query::new()).await?;
//! assert_eq!(page.total, 1);
//! # Ok(())
//! # }
//! ```

pub use metadal_core::{
    CoerceError, EventKind, MetadataError, Operation, Pagination, Record, SortDirection, TenantId,
    Value, ident, metadata, tenant, value
};
pub use metadal_engine::{
    DalConfig, DalError, DalResult, Engine, EngineBuilder, QueryResult, Scope, config, dal, error,
    events, hooks, query, schema, store
};

/// Everything needed to describe, provision and use a service.
pub mod prelude {
    pub use metadal_engine::prelude::*;
}
