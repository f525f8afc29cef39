// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Prelude module for convenient imports.
//!
//! ```rust
//! use metadal_engine::prelude::*;
//! ```

pub use metadal_core::prelude::*;

#[cfg(feature = "postgres")]
pub use crate::store::PgStore;
pub use crate::{
    config::DalConfig,
    dal::{Engine, QueryResult, RemoteResolver, Scope},
    error::{DalError, DalResult, HookError, StoreError},
    events::{BroadcastPublisher, DomainEvent, EventPublisher, NoopPublisher},
    hooks::{Action, Check, HookContext, HookRegistry, Trigger},
    query::{Condition, Operator, Query},
    schema::{Migration, Migrator, TenantReport, diff},
    store::{MemoryStore, Store}
};
