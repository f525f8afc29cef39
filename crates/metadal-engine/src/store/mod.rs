// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Storage seam.
//!
//! The engine and migrator talk to storage only through [`Store`]. Two
//! implementations ship with the crate:
//!
//! | Store | Feature | Executes |
//! |-------|---------|----------|
//! | [`MemoryStore`] | always | the statement [`Plan`](crate::query::Plan) |
//! | `PgStore` | `postgres` | the statement SQL through `sqlx` |

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

use async_trait::async_trait;
pub use memory::MemoryStore;
use metadal_core::Record;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

pub use crate::error::StoreError;
use crate::{query::Statement, schema::SchemaOp};

/// Statement executor shared by all concurrent operations.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run a statement and collect every returned row.
    async fn fetch_all(&self, statement: &Statement) -> Result<Vec<Record>, StoreError>;

    /// Run a statement and return its first row, if any.
    async fn fetch_optional(&self, statement: &Statement) -> Result<Option<Record>, StoreError> {
        Ok(self.fetch_all(statement).await?.into_iter().next())
    }

    /// Run a statement and return the number of affected rows.
    async fn execute(&self, statement: &Statement) -> Result<u64, StoreError>;

    /// Apply one schema definition operation.
    async fn apply_schema(&self, op: &SchemaOp) -> Result<(), StoreError>;

    /// Namespaces whose name starts with `prefix`, sorted.
    async fn list_namespaces(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}
