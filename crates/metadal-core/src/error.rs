// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Metadata loading and validation errors.

use thiserror::Error;

/// Error raised while loading or validating a metadata document.
///
/// Every variant names the entity (and field, where relevant) so a broken
/// document can be fixed without a debugger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    /// The document is not valid JSON or does not match the schema.
    #[error("failed to parse metadata: {0}")]
    Parse(String),

    /// The document could not be read from disk.
    #[error("failed to read metadata file `{path}`: {message}")]
    Io {
        /// Path that was read.
        path:    String,
        /// Underlying I/O error text.
        message: String
    },

    /// A name fails the identifier allow-list.
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),

    /// A tenant id fails the tenant allow-list.
    #[error("invalid tenant id `{0}`")]
    InvalidTenant(String),

    /// Two entities share a name.
    #[error("entity `{0}` is declared more than once")]
    DuplicateEntity(String),

    /// Two entities map to the same table.
    #[error("table `{0}` is used by more than one entity")]
    DuplicateTable(String),

    /// A field name repeats within an entity.
    #[error("entity `{entity}` declares field `{field}` more than once")]
    DuplicateField {
        /// Entity name.
        entity: String,
        /// Repeated field.
        field:  String
    },

    /// A declared field shadows a policy-managed system column.
    #[error("entity `{entity}` declares reserved system field `{field}`")]
    ReservedField {
        /// Entity name.
        entity: String,
        /// Reserved field.
        field:  String
    },

    /// Primary key declaration is not the `id` uuid column.
    #[error("entity `{entity}` has an invalid primary key: {message}")]
    InvalidPrimary {
        /// Entity name.
        entity:  String,
        /// What is wrong.
        message: String
    },

    /// A relation, index, rule or validation names a missing field.
    #[error("entity `{entity}`: {context} references unknown field `{field}`")]
    UnknownField {
        /// Entity name.
        entity:  String,
        /// Referencing construct, e.g. "relation `author`".
        context: String,
        /// Missing field.
        field:   String
    },

    /// An enum field declares no values.
    #[error("entity `{entity}`: enum field `{field}` declares no values")]
    EmptyEnum {
        /// Entity name.
        entity: String,
        /// Enum field.
        field:  String
    },

    /// A field default cannot be coerced to the field type.
    #[error("entity `{entity}`: default of field `{field}` is invalid: {message}")]
    InvalidDefault {
        /// Entity name.
        entity:  String,
        /// Field with the bad default.
        field:   String,
        /// Coercion failure.
        message: String
    }
}

impl MetadataError {
    pub(crate) fn unknown_field(
        entity: &str,
        context: impl Into<String>,
        field: &str
    ) -> Self {
        Self::UnknownField {
            entity:  entity.to_string(),
            context: context.into(),
            field:   field.to_string()
        }
    }
}

impl From<serde_json::Error> for MetadataError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_field_display() {
        let err = MetadataError::unknown_field("Ticket", "relation `author`", "author_id");
        assert_eq!(
            err.to_string(),
            "entity `Ticket`: relation `author` references unknown field `author_id`"
        );
    }

    #[test]
    fn parse_from_serde() {
        let err: MetadataError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, MetadataError::Parse(_)));
    }
}
