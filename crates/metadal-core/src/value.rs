// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Dynamically typed entity values.
//!
//! Records have no compile-time shape. A [`Record`] maps field names to
//! [`Value`]s and (de)serializes as a plain JSON object:
//!
//! | Variant | JSON form |
//! |---------|-----------|
//! | `Null` | `null` |
//! | `Bool` | `true` / `false` |
//! | `Int` / `Float` | number |
//! | `Text` | string |
//! | `Uuid` | hyphenated string |
//! | `Timestamp` | RFC 3339 string |
//! | `Json` | any JSON |
//!
//! Deserialization is untyped: strings stay [`Value::Text`] until
//! [`FieldType::coerce`](crate::metadata::FieldType::coerce) narrows them at
//! the metadata boundary.

use std::{cmp::Ordering, collections::BTreeMap};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

/// A value could not be converted to the logical type a field requires.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected {expected}, got {found}")]
pub struct CoerceError {
    /// Logical type that was required.
    pub expected: &'static str,
    /// Description of the offending value.
    pub found:    String
}

impl CoerceError {
    /// Build an error for `value` not being convertible to `expected`.
    #[must_use]
    pub fn new(expected: &'static str, value: &Value) -> Self {
        let found = match value.to_text() {
            Some(text) => format!("{} `{}`", value.type_name(), text),
            None => value.type_name().to_string()
        };
        Self {
            expected,
            found
        }
    }
}

/// Dynamically typed scalar (or JSON document) stored in a record.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Explicit null.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Text.
    Text(String),
    /// UUID.
    Uuid(Uuid),
    /// UTC timestamp.
    Timestamp(DateTime<Utc>),
    /// Arbitrary JSON, used for `json` fields and attached relations.
    Json(serde_json::Value)
}

impl Value {
    /// Check for [`Value::Null`].
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short type name for diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Uuid(_) => "uuid",
            Self::Timestamp(_) => "timestamp",
            Self::Json(_) => "json"
        }
    }

    /// Borrow as text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None
        }
    }

    /// Integer view; integral floats are accepted.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None
        }
    }

    /// Float view of any number.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            _ => None
        }
    }

    /// Boolean view.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None
        }
    }

    /// UUID view; hyphenated text is parsed.
    #[must_use]
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(u) => Some(*u),
            Self::Text(s) => Uuid::parse_str(s).ok(),
            _ => None
        }
    }

    /// Timestamp view; RFC 3339 text is parsed.
    #[must_use]
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(t) => Some(*t),
            Self::Text(s) => parse_timestamp(s),
            _ => None
        }
    }

    /// Convert untyped JSON into a value.
    ///
    /// Arrays and objects become [`Value::Json`]; strings stay text.
    #[must_use]
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map_or(Self::Null, Self::Float)
            },
            serde_json::Value::String(s) => Self::Text(s),
            other => Self::Json(other)
        }
    }

    /// Convert into JSON.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(n) => serde_json::Value::from(*n),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Uuid(u) => serde_json::Value::String(u.to_string()),
            Self::Timestamp(t) => serde_json::Value::String(format_timestamp(t)),
            Self::Json(j) => j.clone()
        }
    }

    /// Canonical text form, `None` for null.
    ///
    /// This is the form parameters are bound in and the form business-rule
    /// literals are compared against.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(b) => Some(b.to_string()),
            Self::Int(n) => Some(n.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::Text(s) => Some(s.clone()),
            Self::Uuid(u) => Some(u.to_string()),
            Self::Timestamp(t) => Some(format_timestamp(t)),
            Self::Json(j) => Some(j.to_string())
        }
    }

    /// SQL-style comparison.
    ///
    /// Numbers compare across `Int`/`Float`; uuid and timestamp compare with
    /// their text forms. Anything involving null, or mismatched kinds,
    /// yields `None`.
    #[must_use]
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => None,
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Uuid(a), _) => Some(a.cmp(&other.as_uuid()?)),
            (_, Self::Uuid(b)) => Some(self.as_uuid()?.cmp(b)),
            (Self::Timestamp(a), _) => Some(a.cmp(&other.as_timestamp()?)),
            (_, Self::Timestamp(b)) => Some(self.as_timestamp()?.cmp(b)),
            (Self::Json(a), Self::Json(b)) => (a == b).then_some(Ordering::Equal),
            _ => None
        }
    }
}

/// Parse an RFC 3339 timestamp into UTC.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(n) => serializer.serialize_i64(*n),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::Text(s) => serializer.serialize_str(s),
            Self::Uuid(u) => serializer.serialize_str(&u.to_string()),
            Self::Timestamp(t) => serializer.serialize_str(&format_timestamp(t)),
            Self::Json(j) => j.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from_json)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Generic entity snapshot: field name to value.
///
/// Callers always receive independent copies; mutating a record never
/// touches the stored row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    /// Empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    /// Field value, when present.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Field value, with absence reported as null.
    #[must_use]
    pub fn get_or_null(&self, field: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.0.get(field).unwrap_or(&NULL)
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    /// Remove a field.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Whether the field key is present (null counts as present).
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Iterate fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Field names in name order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The `id` system field.
    #[must_use]
    pub fn id(&self) -> Option<Uuid> {
        self.get("id").and_then(Value::as_uuid)
    }

    /// The `version` system field.
    #[must_use]
    pub fn version(&self) -> Option<i64> {
        self.get("version").and_then(Value::as_i64)
    }

    /// Copy of `self` with every field of `patch` applied on top.
    #[must_use]
    pub fn merged(&self, patch: &Record) -> Record {
        let mut out = self.clone();
        for (k, v) in patch.iter() {
            out.0.insert(k.clone(), v.clone());
        }
        out
    }

    /// Convert into a JSON object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect()
        )
    }

    /// Build a record from a JSON object.
    ///
    /// # Errors
    ///
    /// [`CoerceError`] when `json` is not an object.
    pub fn from_json(json: serde_json::Value) -> Result<Self, CoerceError> {
        match json {
            serde_json::Value::Object(map) => Ok(map
                .into_iter()
                .map(|(k, v)| (k, Value::from_json(v)))
                .collect()),
            other => Err(CoerceError::new("object", &Value::from_json(other)))
        }
    }

    /// Unwrap the inner map.
    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

impl TryFrom<serde_json::Value> for Record {
    type Error = CoerceError;

    fn try_from(json: serde_json::Value) -> Result<Self, Self::Error> {
        Self::from_json(json)
    }
}

impl From<BTreeMap<String, Value>> for Record {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = (&'a String, &'a Value);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn from_json_keeps_strings_untyped() {
        let id = Uuid::new_v4();
        assert_eq!(
            Value::from_json(json!(id.to_string())),
            Value::Text(id.to_string())
        );
        assert_eq!(Value::from_json(json!(3)), Value::Int(3));
        assert_eq!(Value::from_json(json!(1.5)), Value::Float(1.5));
        assert_eq!(Value::from_json(json!([1])), Value::Json(json!([1])));
    }

    #[test]
    fn compare_mixed_numbers() {
        assert_eq!(Value::Int(2).compare(&Value::Float(2.0)), Some(Ordering::Equal));
        assert_eq!(Value::Float(1.5).compare(&Value::Int(2)), Some(Ordering::Less));
    }

    #[test]
    fn compare_null_is_unknown() {
        assert_eq!(Value::Null.compare(&Value::Null), None);
        assert_eq!(Value::Int(1).compare(&Value::Null), None);
    }

    #[test]
    fn compare_uuid_with_text() {
        let id = Uuid::new_v4();
        assert_eq!(
            Value::Uuid(id).compare(&Value::Text(id.to_string())),
            Some(Ordering::Equal)
        );
        assert_eq!(Value::Uuid(id).compare(&Value::Text("nope".into())), None);
    }

    #[test]
    fn to_text_forms() {
        assert_eq!(Value::Null.to_text(), None);
        assert_eq!(Value::Bool(true).to_text().as_deref(), Some("true"));
        assert_eq!(Value::Json(json!({"a": 1})).to_text().as_deref(), Some(r#"{"a":1}"#));
    }

    #[test]
    fn record_serializes_as_object() {
        let id = Uuid::nil();
        let record = Record::new()
            .with("id", id)
            .with("title", "x")
            .with("closed", false)
            .with("note", Value::Null);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            json!({
                "id": "00000000-0000-0000-0000-000000000000",
                "title": "x",
                "closed": false,
                "note": null
            })
        );
        assert_eq!(record.id(), Some(id));
    }

    #[test]
    fn record_from_non_object_fails() {
        assert!(Record::from_json(json!([1, 2])).is_err());
    }

    #[test]
    fn merged_overrides() {
        let base = Record::new().with("a", 1).with("b", 2);
        let merged = base.merged(&Record::new().with("b", 3).with("c", 4));
        assert_eq!(merged.get("a"), Some(&Value::Int(1)));
        assert_eq!(merged.get("b"), Some(&Value::Int(3)));
        assert_eq!(merged.get("c"), Some(&Value::Int(4)));
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn get_or_null_reports_absent() {
        let record = Record::new();
        assert!(record.get_or_null("missing").is_null());
        assert!(!record.contains("missing"));
    }
}
