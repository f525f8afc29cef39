// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Metadata model.
//!
//! A [`ServiceMetadata`] is the single source of truth for everything the
//! engine does: which tables exist, which columns a query may reference,
//! which hooks run. It is loaded once, validated, and then shared read-only
//! (usually behind an `Arc`).
//!
//! # Document shape
//!
//! ```json
//! {
//!   "service": "helpdesk",
//!   "entities": [{
//!     "name": "Ticket",
//!     "fields": [
//!       { "name": "title",  "type": "text", "required": true, "max_length": 200 },
//!       { "name": "status", "type": "enum", "values": ["open", "closed"], "indexed": true }
//!     ],
//!     "indexes":   [{ "name": "by_status_title", "fields": ["status", "title"] }],
//!     "relations": [{ "name": "comments", "type": "has_many", "target": "Comment",
//!                     "local_field": "id", "target_field": "ticket_id" }],
//!     "policy":    { "soft_delete": true, "optimistic_locking": true },
//!     "hooks":     { "pre_create": { "validations": [{ "field": "title", "rule": "required" }] } }
//!   }]
//! }
//! ```

mod condition;
mod entity;
mod field;
mod hooks;
mod index;
mod relation;

use std::{collections::HashSet, path::Path};

use serde::Deserialize;

pub use condition::{Clause, Comparison, ConditionError, RuleCondition, Snapshot};
pub use entity::{
    CREATED_AT, DELETED_AT, DELETED_BY, EntityMetadata, ID, LockPolicy, SYSTEM_COLUMNS, TENANT_ID,
    UPDATED_AT, VERSION, default_table_name, system_columns
};
pub use field::{FieldMetadata, FieldType, IndexKind};
pub use hooks::{
    BusinessRule, EMAIL_PATTERN, FieldTrigger, HookSet, HookSlot, HookStage, Pattern,
    PreventRule, RuleAction, ValidationKind, ValidationRule
};
pub use index::IndexSpec;
pub use relation::{RelationKind, RelationSpec};

use crate::MetadataError;

#[derive(Deserialize)]
struct ServiceDocument {
    service:  String,
    #[serde(default, alias = "nodes")]
    entities: Vec<EntityMetadata>
}

/// Validated metadata of one service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceMetadata {
    service:  String,
    entities: Vec<EntityMetadata>
}

impl ServiceMetadata {
    /// Validate a set of entities.
    ///
    /// # Errors
    ///
    /// The first [`MetadataError`] found.
    pub fn new(
        service: impl Into<String>,
        entities: Vec<EntityMetadata>
    ) -> Result<Self, MetadataError> {
        let service = service.into();
        if service.trim().is_empty() {
            return Err(MetadataError::Parse("service name is empty".into()));
        }

        let mut entities = entities;
        let mut names = HashSet::new();
        let mut tables = HashSet::new();
        for entity in &mut entities {
            entity.finalize()?;
            if !names.insert(entity.name.clone()) {
                return Err(MetadataError::DuplicateEntity(entity.name.clone()));
            }
            if !tables.insert(entity.table.clone()) {
                return Err(MetadataError::DuplicateTable(entity.table.clone()));
            }
        }

        let this = Self {
            service,
            entities
        };
        this.check_relation_targets()?;
        Ok(this)
    }

    /// Load from a JSON value.
    ///
    /// # Errors
    ///
    /// [`MetadataError::Parse`] for shape errors, or any validation error.
    pub fn from_json(value: serde_json::Value) -> Result<Self, MetadataError> {
        let doc: ServiceDocument = serde_json::from_value(value)?;
        Self::new(doc.service, doc.entities)
    }

    /// Load from JSON text.
    ///
    /// # Errors
    ///
    /// See [`Self::from_json`].
    pub fn from_json_str(text: &str) -> Result<Self, MetadataError> {
        let doc: ServiceDocument = serde_json::from_str(text)?;
        Self::new(doc.service, doc.entities)
    }

    /// Load from a JSON file.
    ///
    /// # Errors
    ///
    /// [`MetadataError::Io`] when the file cannot be read, otherwise see
    /// [`Self::from_json`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, MetadataError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| MetadataError::Io {
            path:    path.display().to_string(),
            message: e.to_string()
        })?;
        Self::from_json_str(&text)
    }

    /// Service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Entities in declaration order.
    #[must_use]
    pub fn entities(&self) -> &[EntityMetadata] {
        &self.entities
    }

    /// Entity by name.
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&EntityMetadata> {
        self.entities.iter().find(|e| e.name == name)
    }

    fn check_relation_targets(&self) -> Result<(), MetadataError> {
        for entity in &self.entities {
            for relation in &entity.relations {
                if relation.is_remote(&self.service) {
                    continue;
                }
                let context = format!("relation `{}`", relation.name);
                let Some(target) = self.entity(&relation.target) else {
                    return Err(MetadataError::unknown_field(
                        &entity.name,
                        context,
                        &relation.target
                    ));
                };
                if target.column(&relation.target_field).is_none() {
                    return Err(MetadataError::unknown_field(
                        &target.name,
                        context,
                        &relation.target_field
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc() -> serde_json::Value {
        json!({
            "service": "helpdesk",
            "nodes": [
                {
                    "name": "Ticket",
                    "properties": [
                        { "name": "title", "type": "string", "required": true },
                        { "name": "status", "type": "enum", "values": ["open", "closed"] }
                    ],
                    "relations": [{
                        "name": "comments", "type": "has_many", "target_node": "Comment",
                        "local_field": "id", "target_field": "ticket_id"
                    }]
                },
                {
                    "name": "Comment",
                    "properties": [{ "name": "ticket_id", "type": "uuid", "indexed": true }]
                }
            ]
        })
    }

    #[test]
    fn loads_document() {
        let service = ServiceMetadata::from_json(doc()).unwrap();
        assert_eq!(service.service(), "helpdesk");
        assert_eq!(service.entities().len(), 2);
        assert_eq!(service.entity("Comment").unwrap().table, "comments");
    }

    #[test]
    fn loads_from_text() {
        let service = ServiceMetadata::from_json_str(&doc().to_string()).unwrap();
        assert!(service.entity("Ticket").is_some());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ServiceMetadata::from_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, MetadataError::Io { .. }));
    }

    #[test]
    fn rejects_duplicate_entities() {
        let err = ServiceMetadata::new(
            "svc",
            vec![EntityMetadata::new("Ticket"), EntityMetadata::new("Ticket")]
        )
        .unwrap_err();
        assert_eq!(err, MetadataError::DuplicateEntity("Ticket".into()));
    }

    #[test]
    fn rejects_duplicate_tables() {
        let err = ServiceMetadata::new(
            "svc",
            vec![
                EntityMetadata::new("Ticket"),
                EntityMetadata::new("Issue").with_table("tickets"),
            ]
        )
        .unwrap_err();
        assert_eq!(err, MetadataError::DuplicateTable("tickets".into()));
    }

    #[test]
    fn rejects_missing_local_target() {
        let mut value = doc();
        value["nodes"][1]["properties"] = json!([]);
        let err = ServiceMetadata::from_json(value).unwrap_err();
        assert!(matches!(err, MetadataError::UnknownField { .. }));
    }

    #[test]
    fn remote_targets_are_not_checked() {
        let service = ServiceMetadata::new(
            "helpdesk",
            vec![
                EntityMetadata::new("Ticket")
                    .with_field(FieldMetadata::new("owner_id", FieldType::Uuid))
                    .with_relation(
                        serde_json::from_value(json!({
                            "name": "owner", "type": "belongs_to", "target": "User",
                            "target_service": "identity", "local_field": "owner_id"
                        }))
                        .unwrap()
                    ),
            ]
        );
        assert!(service.is_ok());
    }
}
