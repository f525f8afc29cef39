// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Core types for metadal.
//!
//! This crate holds everything the engine treats as read-only input: the
//! metadata model of a service, the dynamic record representation and the
//! tenant identity. It has no I/O beyond loading a metadata document.
//!
//! # Overview
//!
//! | Item | Purpose |
//! |------|---------|
//! | [`metadata::ServiceMetadata`] | Validated, immutable description of a service |
//! | [`Value`] / [`Record`] | Dynamically typed entity snapshot |
//! | [`TenantId`] | Allow-listed tenant identifier |
//! | [`Pagination`] / [`SortDirection`] | Query shaping primitives |
//! | [`EventKind`] / [`Operation`] | Lifecycle vocabulary shared with the engine |
//!
//! # Usage
//!
//! ```rust
//! use metadal_core::prelude::*;
//!
//! let service = ServiceMetadata::from_json(serde_json::json!({
//!     "service": "helpdesk",
//!     "entities": [{
//!         "name": "Ticket",
//!         "fields": [{ "name": "title", "type": "text", "required": true }],
//!         "policy": { "soft_delete": true }
//!     }]
//! }))
//! .unwrap();
//!
//! let ticket = service.entity("Ticket").unwrap();
//! assert_eq!(ticket.table, "tickets");
//! assert!(ticket.column("deleted_at").is_some());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod ident;
pub mod metadata;
pub mod prelude;
pub mod tenant;
pub mod value;

pub use error::MetadataError;
pub use tenant::TenantId;
pub use value::{CoerceError, Record, Value};

/// Pagination parameters for query operations.
///
/// A `limit` of `None` means unbounded. The engine applies its configured
/// default and cap before compiling.
///
/// # Example
///
/// ```rust
/// use metadal_core::Pagination;
///
/// let page = Pagination { limit: Some(5000), offset: 20 }.bounded(100, 1000);
/// assert_eq!(page.limit, Some(1000));
/// assert_eq!(page.offset, 20);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pagination {
    /// Maximum number of rows to return.
    pub limit: Option<u64>,

    /// Number of rows to skip.
    pub offset: u64
}

impl Pagination {
    /// Clamp the limit to `max`, substituting `default` when absent or zero.
    #[must_use]
    pub fn bounded(self, default: u64, max: u64) -> Self {
        let limit = match self.limit {
            None | Some(0) => default,
            Some(n) => n
        };
        Self {
            limit:  Some(limit.min(max)),
            offset: self.offset
        }
    }
}

/// Sort direction for ordered queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending order (A-Z, 0-9, oldest first).
    #[default]
    #[serde(alias = "ASC")]
    Asc,

    /// Descending order (Z-A, 9-0, newest first).
    #[serde(alias = "DESC")]
    Desc
}

impl SortDirection {
    /// Convert to SQL keyword.
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC"
        }
    }
}

/// Kind of lifecycle event emitted after a committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Entity was created.
    Created,

    /// Entity was updated.
    Updated,

    /// Entity was soft-deleted.
    SoftDeleted,

    /// Entity was hard-deleted (permanently removed).
    HardDeleted,

    /// Entity was restored from soft-delete.
    Restored
}

impl EventKind {
    /// Last segment of the publish subject.
    ///
    /// Both delete flavours publish as `deleted`.
    pub const fn subject_suffix(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::SoftDeleted | Self::HardDeleted => "deleted",
            Self::Restored => "restored"
        }
    }
}

/// Engine operation kind, used for logging and error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Insert a new entity.
    Create,
    /// Read one entity by id.
    Read,
    /// Filtered, paginated listing.
    Query,
    /// Update an existing entity.
    Update,
    /// Delete (physically or softly) an entity.
    Delete,
    /// Clear a soft delete.
    Restore,
    /// Apply schema definition statements.
    Migrate
}

impl Operation {
    /// Lowercase name for logs and error messages.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Query => "query",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Restore => "restore",
            Self::Migrate => "migrate"
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(limit: Option<u64>, offset: u64) -> Pagination {
        Pagination {
            limit,
            offset
        }
    }

    #[test]
    fn pagination_default_is_unbounded() {
        let p = Pagination::default();
        assert_eq!(p.limit, None);
        assert_eq!(p.offset, 0);
    }

    #[test]
    fn pagination_bounded() {
        assert_eq!(page(None, 0).bounded(100, 1000).limit, Some(100));
        assert_eq!(page(Some(0), 5).bounded(100, 1000).limit, Some(100));
        assert_eq!(page(Some(5000), 0).bounded(100, 1000).limit, Some(1000));
        assert_eq!(page(Some(20), 7).bounded(100, 1000), page(Some(20), 7));
    }

    #[test]
    fn sort_direction_sql() {
        assert_eq!(SortDirection::Asc.as_sql(), "ASC");
        assert_eq!(SortDirection::Desc.as_sql(), "DESC");
        assert_eq!(SortDirection::default(), SortDirection::Asc);
    }

    #[test]
    fn sort_direction_deserialize() {
        let d: SortDirection = serde_json::from_str("\"DESC\"").unwrap();
        assert_eq!(d, SortDirection::Desc);
    }

    #[test]
    fn event_kind_subject_suffix() {
        assert_eq!(EventKind::Created.subject_suffix(), "created");
        assert_eq!(EventKind::SoftDeleted.subject_suffix(), "deleted");
        assert_eq!(EventKind::HardDeleted.subject_suffix(), "deleted");
        assert_eq!(EventKind::Restored.subject_suffix(), "restored");
    }

    #[test]
    fn operation_display() {
        assert_eq!(Operation::Restore.to_string(), "restore");
        assert_eq!(Operation::Migrate.to_string(), "migrate");
    }
}
