// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Declared (composite) index definitions.

use serde::Deserialize;

use super::field::IndexKind;

/// Index declared on an entity, over one or more fields.
///
/// # Example
///
/// ```json
/// { "name": "status_priority", "fields": ["status", "priority"], "unique": false }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IndexSpec {
    /// Index name, unique within the entity.
    pub name: String,

    /// Indexed fields in order.
    #[serde(alias = "columns")]
    pub fields: Vec<String>,

    /// Whether this is a UNIQUE index.
    #[serde(default)]
    pub unique: bool,

    /// Access method.
    #[serde(default, rename = "type")]
    pub kind: IndexKind
}

impl IndexSpec {
    /// Non-unique btree index.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>
    {
        Self {
            name:   name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            unique: false,
            kind:   IndexKind::BTree
        }
    }

    /// Mark as unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Storage name of the index for `table`: `{table}_{name}`.
    #[must_use]
    pub fn storage_name(&self, table: &str) -> String {
        format!("{}_{}", table, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_name_prefixes_table() {
        let idx = IndexSpec::new("by_status", ["status"]);
        assert_eq!(idx.storage_name("tickets"), "tickets_by_status");
    }

    #[test]
    fn deserialize_with_type() {
        let idx: IndexSpec = serde_json::from_value(serde_json::json!({
            "name": "search",
            "columns": ["payload"],
            "type": "gin",
            "unique": false
        }))
        .unwrap();
        assert_eq!(idx.kind, IndexKind::Gin);
        assert_eq!(idx.fields, vec!["payload".to_string()]);
    }
}
