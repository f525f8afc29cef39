// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Field metadata and logical types.
//!
//! # Logical types
//!
//! | Type | Accepted aliases | Coerces from |
//! |------|------------------|--------------|
//! | `uuid` | | uuid, hyphenated text |
//! | `text` | `string` | text, number, boolean, uuid |
//! | `boolean` | `bool` | boolean, `"true"`/`"false"` |
//! | `timestamp` | `datetime`, `timestamptz` | timestamp, RFC 3339 text |
//! | `integer` | `int`, `bigint` | integer, integral float, numeric text |
//! | `decimal` | `numeric`, `float` | number, numeric text |
//! | `json` | `jsonb` | anything |
//! | `enum` | | text |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::value::{CoerceError, Value, parse_timestamp};

/// Logical type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// UUID.
    Uuid,
    /// Free text.
    #[serde(alias = "string")]
    Text,
    /// Boolean.
    #[serde(alias = "bool")]
    Boolean,
    /// UTC timestamp.
    #[serde(alias = "datetime", alias = "timestamptz")]
    Timestamp,
    /// 64-bit integer.
    #[serde(alias = "int", alias = "bigint")]
    Integer,
    /// Decimal number.
    #[serde(alias = "numeric", alias = "float")]
    Decimal,
    /// JSON document.
    #[serde(alias = "jsonb")]
    Json,
    /// Text restricted to a declared value set.
    Enum
}

impl FieldType {
    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Uuid => "uuid",
            Self::Text => "text",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::Json => "json",
            Self::Enum => "enum"
        }
    }

    /// Whether values of this type are strings for length checks.
    #[must_use]
    pub const fn is_textual(&self) -> bool {
        matches!(self, Self::Text | Self::Enum)
    }

    /// Narrow `value` to this type.
    ///
    /// Null passes through unchanged.
    ///
    /// # Errors
    ///
    /// [`CoerceError`] when the value has no sensible conversion.
    pub fn coerce(&self, value: Value) -> Result<Value, CoerceError> {
        let fail = |v: &Value| CoerceError::new(self.as_str(), v);
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (Self::Json, v) => Ok(match v {
                Value::Json(j) => Value::Json(j),
                other => Value::Json(other.to_json())
            }),
            (Self::Uuid, v) => v.as_uuid().map(Value::Uuid).ok_or_else(|| fail(&v)),
            (Self::Text | Self::Enum, v @ Value::Text(_)) => Ok(v),
            (
                Self::Text | Self::Enum,
                v @ (Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::Uuid(_))
            ) => v.to_text().map(Value::Text).ok_or_else(|| fail(&v)),
            (Self::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
            (Self::Boolean, Value::Text(s)) => match s.parse::<bool>() {
                Ok(b) => Ok(Value::Bool(b)),
                Err(_) => Err(fail(&Value::Text(s)))
            },
            (Self::Timestamp, Value::Timestamp(t)) => Ok(Value::Timestamp(t)),
            (Self::Timestamp, Value::Text(s)) => parse_timestamp(&s)
                .map(Value::Timestamp)
                .ok_or_else(|| fail(&Value::Text(s))),
            (Self::Integer, Value::Text(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| fail(&Value::Text(s))),
            (Self::Integer, v) => v.as_i64().map(Value::Int).ok_or_else(|| fail(&v)),
            (Self::Decimal, Value::Text(s)) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| fail(&Value::Text(s))),
            (Self::Decimal, v) => v.as_f64().map(Value::Float).ok_or_else(|| fail(&v)),
            (_, v) => Err(fail(&v))
        }
    }
}

/// Index access method for a single-field or declared index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexKind {
    /// B-tree index (default). Best for equality and range queries.
    #[default]
    BTree,

    /// Hash index. Only for equality comparisons.
    Hash,

    /// GIN (Generalized Inverted Index). For array/JSONB containment.
    Gin,

    /// GiST (Generalized Search Tree). For geometric/full-text search.
    Gist,

    /// BRIN (Block Range Index). For large sequential data.
    Brin
}

impl IndexKind {
    /// Parse index kind from string.
    ///
    /// Returns `None` for unrecognized values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "btree" | "b-tree" => Some(Self::BTree),
            "hash" => Some(Self::Hash),
            "gin" => Some(Self::Gin),
            "gist" => Some(Self::Gist),
            "brin" => Some(Self::Brin),
            _ => None
        }
    }

    /// SQL `USING` clause; empty for btree.
    #[must_use]
    pub fn as_sql_using(&self) -> &'static str {
        match self {
            Self::BTree => "",
            Self::Hash => " USING hash",
            Self::Gin => " USING gin",
            Self::Gist => " USING gist",
            Self::Brin => " USING brin"
        }
    }
}

impl<'de> Deserialize<'de> for IndexKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown index type `{raw}`")))
    }
}

/// `indexed` accepts `true`/`false` or an index method name.
fn deserialize_indexed<'de, D>(deserializer: D) -> Result<Option<IndexKind>, D::Error>
where
    D: Deserializer<'de>
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Indexed {
        Flag(bool),
        Kind(String)
    }

    match Option::<Indexed>::deserialize(deserializer)? {
        None | Some(Indexed::Flag(false)) => Ok(None),
        Some(Indexed::Flag(true)) => Ok(Some(IndexKind::BTree)),
        Some(Indexed::Kind(raw)) => IndexKind::parse(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown index type `{raw}`")))
    }
}

/// One declared (or system) column of an entity.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldMetadata {
    /// Column name.
    pub name: String,

    /// Logical type.
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Marks the primary key. Only the `id` column may carry it.
    #[serde(default)]
    pub primary: bool,

    /// Value must be present and non-null on write; maps to `NOT NULL`.
    #[serde(default)]
    pub required: bool,

    /// Maximum length for text fields; maps to `VARCHAR(n)`.
    #[serde(default)]
    pub max_length: Option<usize>,

    /// Allowed values for enum fields.
    #[serde(default, alias = "enum_values")]
    pub values: Vec<String>,

    /// Default applied on create when the field is absent.
    ///
    /// The string `"now()"` means the current timestamp.
    #[serde(default)]
    pub default: Option<serde_json::Value>,

    /// Single-field index, with its access method.
    #[serde(default, deserialize_with = "deserialize_indexed")]
    pub indexed: Option<IndexKind>,

    /// Unique within a tenant; maps to a unique `(tenant_id, field)` index.
    #[serde(default)]
    pub unique_per_tenant: bool,

    /// Value is fixed at create time and ignored on update.
    #[serde(default)]
    pub immutable: bool,

    /// Decimal precision.
    #[serde(default)]
    pub precision: Option<u32>,

    /// Decimal scale.
    #[serde(default)]
    pub scale: Option<u32>,

    /// Set for policy-derived system columns.
    #[serde(skip)]
    pub system: bool
}

impl FieldMetadata {
    /// Optional field of the given type.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            primary: false,
            required: false,
            max_length: None,
            values: Vec::new(),
            default: None,
            indexed: None,
            unique_per_tenant: false,
            immutable: false,
            precision: None,
            scale: None,
            system: false
        }
    }

    /// Mark as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark as indexed with the default method.
    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.indexed = Some(IndexKind::BTree);
        self
    }

    /// Set the maximum length.
    #[must_use]
    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    /// Set enum values.
    #[must_use]
    pub fn values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>
    {
        self.values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Set the default.
    #[must_use]
    pub fn default_value(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    pub(crate) fn system(mut self) -> Self {
        self.system = true;
        self
    }

    /// Default value resolved against `now`, if one is declared.
    ///
    /// # Errors
    ///
    /// [`CoerceError`] when the declared default does not fit the type.
    pub fn resolve_default(&self, now: DateTime<Utc>) -> Result<Option<Value>, CoerceError> {
        let Some(default) = &self.default else {
            return Ok(None);
        };
        if let Some(s) = default.as_str()
            && s.eq_ignore_ascii_case("now()")
        {
            return Ok(Some(Value::Timestamp(now)));
        }
        self.field_type
            .coerce(Value::from_json(default.clone()))
            .map(Some)
    }

    /// Coerce a value bound for this column and check its declared limits.
    ///
    /// # Errors
    ///
    /// [`CoerceError`] on type mismatch, text longer than `max_length`, or an
    /// enum value outside the declared set.
    pub fn admit(&self, value: Value) -> Result<Value, CoerceError> {
        let value = self.field_type.coerce(value)?;
        if let Value::Text(s) = &value {
            if let Some(max) = self.max_length
                && s.chars().count() > max
            {
                return Err(CoerceError {
                    expected: "text within max_length",
                    found:    format!("{} characters", s.chars().count())
                });
            }
            if self.field_type == FieldType::Enum && !self.values.iter().any(|v| v == s) {
                return Err(CoerceError {
                    expected: "declared enum value",
                    found:    format!("`{s}`")
                });
            }
        }
        Ok(value)
    }
}
