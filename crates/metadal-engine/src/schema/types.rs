// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Logical type to storage type mapping.
//!
//! | Logical | PostgreSQL | Placeholder cast |
//! |---------|------------|------------------|
//! | `uuid` | `UUID` | `UUID` |
//! | `text` | `TEXT` / `VARCHAR(n)` | `TEXT` |
//! | `boolean` | `BOOLEAN` | `BOOLEAN` |
//! | `timestamp` | `TIMESTAMPTZ` | `TIMESTAMPTZ` |
//! | `integer` | `INTEGER` | `BIGINT` |
//! | `decimal` | `NUMERIC(p,s)` / `NUMERIC` | `NUMERIC` |
//! | `json` | `JSONB` | `JSONB` |
//! | `enum` | `VARCHAR(50)` + `CHECK` | `TEXT` |

use metadal_core::{
    ident,
    metadata::{FieldMetadata, FieldType}
};

/// Width of the column backing an enum field without `max_length`.
pub const ENUM_WIDTH: usize = 50;

/// Mapped SQL column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlType {
    /// SQL type name, e.g. `UUID` or `VARCHAR(200)`.
    pub name:     String,
    /// Whether the column accepts NULL.
    pub nullable: bool
}

impl SqlType {
    /// Non-nullable type.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name:     name.into(),
            nullable: false
        }
    }

    /// Nullable type.
    #[must_use]
    pub fn nullable(name: impl Into<String>) -> Self {
        Self {
            name:     name.into(),
            nullable: true
        }
    }
}

/// Dialect-specific mapping from field metadata to column types.
pub trait TypeMapper {
    /// Storage type of a field.
    fn map_type(&self, field: &FieldMetadata) -> SqlType;

    /// Column-level check constraint, without the `CHECK` keyword.
    fn check_constraint(&self, field: &FieldMetadata) -> Option<String>;
}

/// PostgreSQL type mapper.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresTypeMapper;

impl TypeMapper for PostgresTypeMapper {
    fn map_type(&self, field: &FieldMetadata) -> SqlType {
        let name = match field.field_type {
            FieldType::Uuid => "UUID".to_string(),
            FieldType::Text => match field.max_length {
                Some(n) => format!("VARCHAR({n})"),
                None => "TEXT".to_string()
            },
            FieldType::Boolean => "BOOLEAN".to_string(),
            FieldType::Timestamp => "TIMESTAMPTZ".to_string(),
            FieldType::Integer => "INTEGER".to_string(),
            FieldType::Decimal => match (field.precision, field.scale) {
                (Some(p), Some(s)) => format!("NUMERIC({p},{s})"),
                (Some(p), None) => format!("NUMERIC({p})"),
                _ => "NUMERIC".to_string()
            },
            FieldType::Json => "JSONB".to_string(),
            FieldType::Enum => {
                let longest = field.values.iter().map(|v| v.chars().count()).max();
                let width = field
                    .max_length
                    .unwrap_or(ENUM_WIDTH)
                    .max(longest.unwrap_or(0));
                format!("VARCHAR({width})")
            }
        };
        SqlType {
            name,
            nullable: !(field.required || field.primary)
        }
    }

    fn check_constraint(&self, field: &FieldMetadata) -> Option<String> {
        if field.field_type != FieldType::Enum || field.values.is_empty() {
            return None;
        }
        let values = field
            .values
            .iter()
            .map(|v| format!("'{}'", v.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!("{} IN ({values})", ident::quote(&field.name)))
    }
}

/// Cast applied to placeholders bound for a column of this type.
#[must_use]
pub const fn cast_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Uuid => "UUID",
        FieldType::Text | FieldType::Enum => "TEXT",
        FieldType::Boolean => "BOOLEAN",
        FieldType::Timestamp => "TIMESTAMPTZ",
        FieldType::Integer => "BIGINT",
        FieldType::Decimal => "NUMERIC",
        FieldType::Json => "JSONB"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(field: FieldMetadata) -> SqlType {
        PostgresTypeMapper.map_type(&field)
    }

    #[test]
    fn text_and_varchar() {
        assert_eq!(map(FieldMetadata::new("a", FieldType::Text)).name, "TEXT");
        assert_eq!(
            map(FieldMetadata::new("a", FieldType::Text).max_length(200)).name,
            "VARCHAR(200)"
        );
    }

    #[test]
    fn nullability_follows_required() {
        assert!(map(FieldMetadata::new("a", FieldType::Integer)).nullable);
        assert!(!map(FieldMetadata::new("a", FieldType::Integer).required()).nullable);
    }

    #[test]
    fn decimal_precision() {
        let mut f = FieldMetadata::new("price", FieldType::Decimal);
        assert_eq!(map(f.clone()).name, "NUMERIC");
        f.precision = Some(10);
        f.scale = Some(2);
        assert_eq!(map(f).name, "NUMERIC(10,2)");
    }

    #[test]
    fn enum_check_escapes_quotes() {
        let f = FieldMetadata::new("status", FieldType::Enum).values(["open", "won't fix"]);
        assert_eq!(map(f.clone()).name, "VARCHAR(50)");
        assert_eq!(
            PostgresTypeMapper.check_constraint(&f).unwrap(),
            "\"status\" IN ('open', 'won''t fix')"
        );
        assert!(
            PostgresTypeMapper
                .check_constraint(&FieldMetadata::new("a", FieldType::Text))
                .is_none()
        );
    }

    #[test]
    fn casts() {
        assert_eq!(cast_type(FieldType::Enum), "TEXT");
        assert_eq!(cast_type(FieldType::Integer), "BIGINT");
        assert_eq!(cast_type(FieldType::Json), "JSONB");
    }
}
