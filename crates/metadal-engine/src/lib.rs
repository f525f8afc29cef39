// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Runtime for metadal: metadata in, tenant-scoped persistence out.
//!
//! # Components
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`query`] | JSON query documents compiled to parameterized SQL plans |
//! | [`dal`] | Generic create/read/query/update/delete/restore engine |
//! | [`hooks`] | Validations, business rules, triggers, actions and checks |
//! | [`schema`] | DDL generation, metadata diffing and per-tenant migration |
//! | [`store`] | Storage seam with in-memory and PostgreSQL implementations |
//! | [`events`] | Domain events published after committed writes |
//! | [`config`] | Engine settings |
//! | [`error`] | Failure taxonomy |
//!
//! # Features
//!
//! | Feature | Adds |
//! |---------|------|
//! | `postgres` | `PgStore` and `PgNotifyPublisher` over `sqlx::PgPool` |
//!
//! # Tenancy
//!
//! Each tenant owns a namespace `{schema_prefix}{tenant}` holding one table
//! per entity. Every compiled statement also filters on `tenant_id`, so a
//! statement executed against the wrong namespace still cannot return
//! another tenant's rows.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod dal;
pub mod error;
pub mod events;
pub mod hooks;
pub mod prelude;
pub mod query;
pub mod schema;
pub mod store;

pub use config::DalConfig;
pub use dal::{Engine, EngineBuilder, QueryResult, Scope};
pub use error::{DalError, DalResult};
