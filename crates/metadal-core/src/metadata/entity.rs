// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Entity metadata.
//!
//! # System columns
//!
//! System columns are never declared; they follow from [`LockPolicy`]:
//!
//! | Column | Type | Present when |
//! |--------|------|--------------|
//! | `id` | uuid, primary | always |
//! | `tenant_id` | text | always |
//! | `created_at` | timestamp | always |
//! | `updated_at` | timestamp | always |
//! | `deleted_at` | timestamp | soft delete |
//! | `deleted_by` | text | soft delete |
//! | `version` | integer | optimistic locking |
//!
//! A declared `id` field is accepted when it is a uuid and folds into the
//! system column. All other system names are reserved.

use std::collections::HashSet;

use chrono::Utc;
use convert_case::{Case, Casing};
use serde::Deserialize;

use super::{
    field::{FieldMetadata, FieldType},
    hooks::{HookSet, HookStage},
    index::IndexSpec,
    relation::RelationSpec
};
use crate::{MetadataError, ident};

/// Primary key column.
pub const ID: &str = "id";
/// Tenant scope column.
pub const TENANT_ID: &str = "tenant_id";
/// Insert timestamp column.
pub const CREATED_AT: &str = "created_at";
/// Last-write timestamp column.
pub const UPDATED_AT: &str = "updated_at";
/// Soft-delete timestamp column.
pub const DELETED_AT: &str = "deleted_at";
/// Soft-delete actor column.
pub const DELETED_BY: &str = "deleted_by";
/// Optimistic-lock version column.
pub const VERSION: &str = "version";

/// Every name the policy may claim.
pub const SYSTEM_COLUMNS: [&str; 7] =
    [ID, TENANT_ID, CREATED_AT, UPDATED_AT, DELETED_AT, DELETED_BY, VERSION];

/// Persistence policy of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct LockPolicy {
    /// Delete sets `deleted_at` instead of removing the row.
    pub soft_delete: bool,

    /// Updates and deletes compare and bump `version`.
    #[serde(alias = "optimistic_lock")]
    pub optimistic_locking: bool
}

impl LockPolicy {
    /// Policy with both features on.
    #[must_use]
    pub const fn full() -> Self {
        Self {
            soft_delete:        true,
            optimistic_locking: true
        }
    }
}

/// Metadata for one entity (one table per tenant).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EntityMetadata {
    /// Entity name, e.g. `Ticket`.
    pub name: String,

    /// Storage table. Defaults to the snake-case plural of [`Self::name`].
    #[serde(default)]
    pub table: String,

    /// Declared fields in order.
    #[serde(default, alias = "properties")]
    pub fields: Vec<FieldMetadata>,

    /// Declared indexes.
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,

    /// Declared relations.
    #[serde(default)]
    pub relations: Vec<RelationSpec>,

    /// Soft-delete and locking policy.
    #[serde(default, alias = "dal")]
    pub policy: LockPolicy,

    /// Lifecycle hooks.
    #[serde(default)]
    pub hooks: HookSet,

    #[serde(skip)]
    columns: Vec<FieldMetadata>
}

impl EntityMetadata {
    /// Entity with no fields; validated by [`ServiceMetadata::new`](super::ServiceMetadata::new).
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name:      name.into(),
            table:     String::new(),
            fields:    Vec::new(),
            indexes:   Vec::new(),
            relations: Vec::new(),
            policy:    LockPolicy::default(),
            hooks:     HookSet::default(),
            columns:   Vec::new()
        }
    }

    /// Set the table name.
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Append a field.
    #[must_use]
    pub fn with_field(mut self, field: FieldMetadata) -> Self {
        self.fields.push(field);
        self
    }

    /// Append an index.
    #[must_use]
    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    /// Append a relation.
    #[must_use]
    pub fn with_relation(mut self, relation: RelationSpec) -> Self {
        self.relations.push(relation);
        self
    }

    /// Set the policy.
    #[must_use]
    pub fn with_policy(mut self, policy: LockPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: HookSet) -> Self {
        self.hooks = hooks;
        self
    }

    /// System columns followed by declared fields.
    #[must_use]
    pub fn columns(&self) -> &[FieldMetadata] {
        &self.columns
    }

    /// Any column (system or declared) by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&FieldMetadata> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Declared field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldMetadata> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Relation by name.
    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&RelationSpec> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Whether `name` is a system column of this entity.
    #[must_use]
    pub fn is_system(&self, name: &str) -> bool {
        self.column(name).is_some_and(|c| c.system)
    }

    /// Soft delete enabled.
    #[must_use]
    pub const fn soft_delete(&self) -> bool {
        self.policy.soft_delete
    }

    /// Optimistic locking enabled.
    #[must_use]
    pub const fn locking(&self) -> bool {
        self.policy.optimistic_locking
    }

    /// Validate and derive the column list. Idempotent.
    pub(crate) fn finalize(&mut self) -> Result<(), MetadataError> {
        ident::check(&self.name)?;
        if self.table.is_empty() {
            self.table = default_table_name(&self.name);
        }
        ident::check(&self.table)?;

        let entity = self.name.clone();
        let mut seen = HashSet::new();
        let mut declared = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            ident::check(&field.name)?;
            if !seen.insert(field.name.as_str()) {
                return Err(MetadataError::DuplicateField {
                    entity,
                    field: field.name.clone()
                });
            }
            if field.name == ID {
                if field.field_type != FieldType::Uuid {
                    return Err(MetadataError::InvalidPrimary {
                        entity,
                        message: "`id` must be a uuid".into()
                    });
                }
                continue;
            }
            if field.primary {
                return Err(MetadataError::InvalidPrimary {
                    entity,
                    message: format!("only `id` may be primary, found `{}`", field.name)
                });
            }
            if SYSTEM_COLUMNS.contains(&field.name.as_str()) {
                return Err(MetadataError::ReservedField {
                    entity,
                    field: field.name.clone()
                });
            }
            if field.field_type == FieldType::Enum && field.values.is_empty() {
                return Err(MetadataError::EmptyEnum {
                    entity,
                    field: field.name.clone()
                });
            }
            if let Err(e) = field.resolve_default(Utc::now()) {
                return Err(MetadataError::InvalidDefault {
                    entity,
                    field: field.name.clone(),
                    message: e.to_string()
                });
            }
            declared.push(FieldMetadata {
                system: false,
                ..field.clone()
            });
        }

        let mut columns = system_columns(self.policy);
        columns.extend(declared);
        self.columns = columns;

        self.check_references()
    }

    fn check_references(&self) -> Result<(), MetadataError> {
        let entity = &self.name;
        let known = |name: &str| self.column(name).is_some();

        let mut index_names = HashSet::new();
        for index in &self.indexes {
            ident::check(&index.name)?;
            ident::check(&index.storage_name(&self.table))?;
            if !index_names.insert(index.name.as_str()) {
                return Err(MetadataError::InvalidIdentifier(index.name.clone()));
            }
            if index.fields.is_empty() {
                return Err(MetadataError::unknown_field(
                    entity,
                    format!("index `{}`", index.name),
                    ""
                ));
            }
            if let Some(missing) = index.fields.iter().find(|f| !known(f)) {
                return Err(MetadataError::unknown_field(
                    entity,
                    format!("index `{}`", index.name),
                    missing
                ));
            }
        }

        let mut relation_names = HashSet::new();
        for relation in &self.relations {
            ident::check(&relation.name)?;
            ident::check(&relation.target_field)?;
            if !relation_names.insert(relation.name.as_str()) || self.column(&relation.name).is_some() {
                return Err(MetadataError::InvalidIdentifier(relation.name.clone()));
            }
            if !known(&relation.local_field) {
                return Err(MetadataError::unknown_field(
                    entity,
                    format!("relation `{}`", relation.name),
                    &relation.local_field
                ));
            }
        }

        for stage in HookStage::ALL {
            let slot = self.hooks.slot(stage);
            for rule in &slot.validations {
                if !known(&rule.field) {
                    return Err(MetadataError::unknown_field(
                        entity,
                        format!("{stage} validation"),
                        &rule.field
                    ));
                }
            }
            for trigger in &slot.triggers {
                if !known(&trigger.field) {
                    return Err(MetadataError::unknown_field(
                        entity,
                        format!("{stage} trigger `{}`", trigger.action),
                        &trigger.field
                    ));
                }
            }
            for condition in slot.conditions() {
                if let Some(clause) = condition.clauses().iter().find(|c| !known(&c.field)) {
                    return Err(MetadataError::unknown_field(
                        entity,
                        format!("{stage} condition `{condition}`"),
                        &clause.field
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Policy-derived system columns in storage order.
#[must_use]
pub fn system_columns(policy: LockPolicy) -> Vec<FieldMetadata> {
    let mut id = FieldMetadata::new(ID, FieldType::Uuid).required().system();
    id.primary = true;
    let mut columns = vec![
        id,
        FieldMetadata::new(TENANT_ID, FieldType::Text).required().system(),
        FieldMetadata::new(CREATED_AT, FieldType::Timestamp).required().system(),
        FieldMetadata::new(UPDATED_AT, FieldType::Timestamp).required().system(),
    ];
    if policy.soft_delete {
        columns.push(FieldMetadata::new(DELETED_AT, FieldType::Timestamp).system());
        columns.push(FieldMetadata::new(DELETED_BY, FieldType::Text).system());
    }
    if policy.optimistic_locking {
        columns.push(
            FieldMetadata::new(VERSION, FieldType::Integer)
                .required()
                .default_value(serde_json::json!(1))
                .system()
        );
    }
    columns
}

/// `TicketComment` → `ticket_comments`.
#[must_use]
pub fn default_table_name(entity: &str) -> String {
    pluralize(&entity.to_case(Case::Snake))
}

/// Simple pluralization for table names.
fn pluralize(s: &str) -> String {
    if s.ends_with('s') || s.ends_with("sh") || s.ends_with("ch") || s.ends_with('x') {
        format!("{}es", s)
    } else if s.ends_with('y') && !s.ends_with("ay") && !s.ends_with("ey") && !s.ends_with("oy") {
        format!("{}ies", &s[..s.len() - 1])
    } else {
        format!("{}s", s)
    }
}
