// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Error taxonomy.
//!
//! | Class | Variants | Retry |
//! |-------|----------|-------|
//! | Caller input | `UnknownEntity`, `UnknownField`, `UnknownRelation`, `InvalidQuery`, `InvalidValue`, `ValidationFailed`, `RuleRejected` | never |
//! | Concurrency | `OptimisticConflict` | by caller, after re-reading |
//! | Negative result | `NotFound` | no |
//! | Hooks | `ActionFailed` | no; the write (if any) stays committed |
//! | Infrastructure | `Store`, `Catalog` | caller decides |
//!
//! The engine never retries anything itself.

use std::time::Duration;

use metadal_core::{MetadataError, Operation, TenantId, metadata::HookStage};
use thiserror::Error;
use uuid::Uuid;

/// Result alias for engine operations.
pub type DalResult<T> = Result<T, DalError>;

/// One failed validation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Field checked.
    pub field:   String,
    /// Rule name, e.g. `required`.
    pub rule:    &'static str,
    /// Human-readable message.
    pub message: String
}

/// Failure surfaced by the engine, compiler or migrator.
#[derive(Debug, Error)]
pub enum DalError {
    /// No entity with this name in the metadata.
    #[error("unknown entity `{0}`")]
    UnknownEntity(String),

    /// A projection, filter, ordering or payload names a missing field.
    #[error("entity `{entity}` has no field `{field}`")]
    UnknownField {
        /// Entity queried.
        entity: String,
        /// Unrecognized field.
        field:  String
    },

    /// A requested relation is not declared.
    #[error("entity `{entity}` has no relation `{relation}`")]
    UnknownRelation {
        /// Entity queried.
        entity:   String,
        /// Unrecognized relation.
        relation: String
    },

    /// Structurally invalid query (operator arity, empty `in`, ...).
    #[error("invalid query on `{entity}`: {message}")]
    InvalidQuery {
        /// Entity queried.
        entity:  String,
        /// What is wrong.
        message: String
    },

    /// A value does not fit the field it is bound to.
    #[error("invalid value for `{entity}.{field}`: {message}")]
    InvalidValue {
        /// Entity written or queried.
        entity:  String,
        /// Field.
        field:   String,
        /// Coercion failure.
        message: String
    },

    /// One or more validation rules failed.
    #[error("validation failed for `{entity}`: {}", join_messages(.violations))]
    ValidationFailed {
        /// Entity written.
        entity:     String,
        /// Every failing rule of the slot.
        violations: Vec<Violation>
    },

    /// A business rule (or `prevent_if`) rejected the operation.
    #[error("{message}")]
    RuleRejected {
        /// Entity written.
        entity:  String,
        /// Rule condition text.
        rule:    String,
        /// Message from metadata.
        message: String
    },

    /// No visible row with this id in the tenant.
    #[error("`{entity}` {id} not found")]
    NotFound {
        /// Entity read.
        entity: String,
        /// Requested id.
        id:     Uuid
    },

    /// The row changed since it was read.
    #[error("`{entity}` {id} was modified concurrently (expected version {expected})")]
    OptimisticConflict {
        /// Entity written.
        entity:   String,
        /// Row id.
        id:       Uuid,
        /// Version the write was based on.
        expected: i64
    },

    /// A registered action, trigger or check returned an error.
    #[error("{stage} hook `{name}` failed on `{entity}`: {message}")]
    ActionFailed {
        /// Entity being processed.
        entity:  String,
        /// Stage the hook ran in.
        stage:   HookStage,
        /// Registered name.
        name:    String,
        /// Error text from the callback.
        message: String
    },

    /// Lower-level store failure, with operation context.
    #[error("{operation} on `{entity}` for tenant `{tenant}` failed: {source}")]
    Store {
        /// Operation in progress.
        operation: Operation,
        /// Entity (or table) involved.
        entity:    String,
        /// Tenant scope.
        tenant:    TenantId,
        /// Underlying error.
        #[source]
        source:    StoreError
    },

    /// Tenant namespaces could not be listed.
    #[error("listing namespaces with prefix `{prefix}` failed: {source}")]
    Catalog {
        /// Namespace prefix searched.
        prefix: String,
        /// Underlying error.
        #[source]
        source: StoreError
    },

    /// Metadata could not be loaded or a tenant id is invalid.
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// Configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError)
}

fn join_messages(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl DalError {
    /// Check for [`DalError::NotFound`].
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check for [`DalError::OptimisticConflict`].
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::OptimisticConflict { .. })
    }

    /// Whether the caller caused this error and retrying unchanged is pointless.
    pub const fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownEntity(_)
                | Self::UnknownField { .. }
                | Self::UnknownRelation { .. }
                | Self::InvalidQuery { .. }
                | Self::InvalidValue { .. }
                | Self::ValidationFailed { .. }
                | Self::RuleRejected { .. }
        )
    }

    /// Whether a caller retry may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::OptimisticConflict { .. } => true,
            Self::Store { source, .. } | Self::Catalog { source, .. } => source.is_transient(),
            _ => false
        }
    }

    /// Violations of a [`DalError::ValidationFailed`], empty otherwise.
    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::ValidationFailed { violations, .. } => violations,
            _ => &[]
        }
    }
}

/// Failure reported by a [`Store`](crate::store::Store).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The statement did not finish in time.
    #[error("statement timed out after {0:?}")]
    Timeout(Duration),

    /// Schema object missing (namespace, table or column).
    #[error("missing schema object: {0}")]
    MissingObject(String),

    /// Unique index violated.
    #[error("unique constraint `{0}` violated")]
    UniqueViolation(String),

    /// Not-null or check constraint violated.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// Connection or pool failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// The store refused the statement.
    #[error("query failed: {0}")]
    Query(String),

    /// A row could not be decoded into a record.
    #[error("decode error: {0}")]
    Decode(String)
}

impl StoreError {
    /// Timeouts and connection errors may clear up on retry.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Connection(_))
    }
}

/// Error returned by an application-registered action, trigger, check or
/// remote resolver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    /// Error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<&str> for HookError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for HookError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

/// Event publication failed. Never fails the operation that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// No subscriber or broker unreachable.
    #[error("event channel unavailable: {0}")]
    Unavailable(String),

    /// Payload could not be encoded.
    #[error("failed to encode event: {0}")]
    Encode(String)
}

/// Configuration loading or validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Config file unreadable.
    #[error("failed to read config `{path}`: {message}")]
    Io {
        /// Path read.
        path:    String,
        /// Underlying error.
        message: String
    },

    /// Config text malformed.
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// A value is out of range or inconsistent.
    #[error("invalid config `{key}`: {message}")]
    Invalid {
        /// Offending key.
        key:     &'static str,
        /// Why it is rejected.
        message: String
    }
}
