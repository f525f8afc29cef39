// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Relation resolution by batched id lookup.
//!
//! Local targets are fetched with one `target_field IN (...)` statement per
//! relation and page. Targets owned by another service go to a
//! [`RemoteResolver`]; without one (or when it fails) each row is marked
//! with `{relation}_pending = true` and the relation itself is null.

use std::cmp::Ordering;

use async_trait::async_trait;
use metadal_core::{
    Operation, Record, Value,
    metadata::{EntityMetadata, RelationSpec}
};
use tracing::{debug, warn};

use super::{Engine, Scope};
use crate::{
    error::{DalError, DalResult, HookError},
    query::QueryCompiler
};

/// Resolves relations whose target lives in another service.
#[async_trait]
pub trait RemoteResolver: Send + Sync {
    /// Target rows whose `relation.target_field` is one of `keys`.
    async fn resolve(
        &self,
        scope: &Scope,
        relation: &RelationSpec,
        keys: &[Value]
    ) -> Result<Vec<Record>, HookError>;
}

/// Name of the marker set on rows whose relation was left unresolved.
#[must_use]
pub fn pending_marker(relation: &str) -> String {
    format!("{relation}_pending")
}

impl Engine {
    pub(super) async fn attach_relations(
        &self,
        scope: &Scope,
        entity: &EntityMetadata,
        rows: &mut [Record],
        names: &[String]
    ) -> DalResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        for name in names {
            let relation = relation(entity, name)?;
            let keys = distinct_keys(rows, &relation.local_field);
            if relation.is_remote(self.metadata.service()) {
                self.attach_remote(scope, relation, rows, &keys).await;
                continue;
            }
            let targets = if keys.is_empty() {
                Vec::new()
            } else {
                self.fetch_targets(scope, relation, &keys).await?
            };
            debug!(relation = %name, keys = keys.len(), targets = targets.len(), "relation resolved");
            for row in rows.iter_mut() {
                let value = attached(relation, row, &targets);
                row.insert(relation.name.clone(), value);
            }
        }
        Ok(())
    }

    async fn fetch_targets(
        &self,
        scope: &Scope,
        relation: &RelationSpec,
        keys: &[Value]
    ) -> DalResult<Vec<Record>> {
        let target = self.entity(&relation.target)?;
        let compiler = QueryCompiler::new(target, &scope.tenant, &self.config.schema_prefix);
        let statement = compiler.select_where_in(&relation.target_field, keys)?;
        self.call(
            Operation::Query,
            target,
            scope,
            &statement,
            self.store.fetch_all(&statement)
        )
        .await
    }

    async fn attach_remote(
        &self,
        scope: &Scope,
        relation: &RelationSpec,
        rows: &mut [Record],
        keys: &[Value]
    ) {
        let resolved = match (&self.resolver, keys.is_empty()) {
            (_, true) => Some(Vec::new()),
            (Some(resolver), false) => match resolver.resolve(scope, relation, keys).await {
                Ok(targets) => Some(targets),
                Err(e) => {
                    warn!(
                        relation = %relation.name,
                        service = relation.target_service.as_deref().unwrap_or_default(),
                        error = %e,
                        "remote relation lookup failed"
                    );
                    None
                }
            },
            (None, false) => None
        };
        for row in rows.iter_mut() {
            match &resolved {
                Some(targets) => {
                    let value = attached(relation, row, targets);
                    row.insert(relation.name.clone(), value);
                }
                None => {
                    row.insert(relation.name.clone(), Value::Null);
                    row.insert(pending_marker(&relation.name), true);
                }
            }
        }
    }
}

pub(super) fn relation<'a>(entity: &'a EntityMetadata, name: &str) -> DalResult<&'a RelationSpec> {
    entity.relation(name).ok_or_else(|| DalError::UnknownRelation {
        entity:   entity.name.clone(),
        relation: name.to_string()
    })
}

fn distinct_keys(rows: &[Record], field: &str) -> Vec<Value> {
    let mut keys: Vec<Value> = Vec::new();
    for value in rows.iter().map(|row| row.get_or_null(field)) {
        if !value.is_null() && !keys.contains(value) {
            keys.push(value.clone());
        }
    }
    keys
}

fn attached(relation: &RelationSpec, row: &Record, targets: &[Record]) -> Value {
    let local = row.get_or_null(&relation.local_field);
    let mut matches = targets.iter().filter(|target| {
        !local.is_null()
            && target.get_or_null(&relation.target_field).compare(local) == Some(Ordering::Equal)
    });
    if relation.kind.is_many() {
        Value::Json(serde_json::Value::Array(matches.map(Record::to_json).collect()))
    } else {
        matches.next().map_or(Value::Null, |target| Value::Json(target.to_json()))
    }
}
