// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Relation declarations.
//!
//! Relations are typed id correlations resolved by lookup at read time.
//! No foreign key is ever created for them.

use serde::Deserialize;

/// Cardinality of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Local field holds the target's key; resolves to one object.
    #[serde(alias = "belongs-to", alias = "many_to_one")]
    BelongsTo,

    /// Targets carry the local key; resolves to an array.
    #[serde(alias = "has-many", alias = "one_to_many")]
    HasMany,

    /// Target carries the local key; resolves to one object.
    #[serde(alias = "has-one", alias = "one_to_one")]
    HasOne
}

impl RelationKind {
    /// Whether the relation resolves to a list.
    #[must_use]
    pub const fn is_many(&self) -> bool {
        matches!(self, Self::HasMany)
    }
}

fn default_target_field() -> String {
    "id".to_string()
}

/// Declared relation from one entity to another.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelationSpec {
    /// Name the resolved value is attached under.
    pub name: String,

    /// Cardinality.
    #[serde(rename = "type")]
    pub kind: RelationKind,

    /// Target entity name.
    #[serde(alias = "target_node")]
    pub target: String,

    /// Owning service of the target; `None` means this service.
    #[serde(default)]
    pub target_service: Option<String>,

    /// Field on this entity whose values are looked up.
    pub local_field: String,

    /// Field on the target matched against the local values.
    #[serde(default = "default_target_field")]
    pub target_field: String
}

impl RelationSpec {
    /// Whether the target lives in a service other than `service`.
    #[must_use]
    pub fn is_remote(&self, service: &str) -> bool {
        self.target_service
            .as_deref()
            .is_some_and(|s| !s.is_empty() && s != service)
    }
}
