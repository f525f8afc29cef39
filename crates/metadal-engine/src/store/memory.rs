// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! In-process store.
//!
//! Executes statement plans against namespaced tables held behind a
//! `tokio::sync::RwLock`. It keeps the observable behavior the engine relies
//! on: NOT NULL columns, unique and partial unique indexes, column defaults,
//! `IF [NOT] EXISTS` schema operations and SQL null semantics in filters.

use std::{cmp::Ordering, collections::BTreeMap};

use async_trait::async_trait;
use metadal_core::{Record, SortDirection, Value, metadata::DELETED_AT};
use tokio::sync::RwLock;

use super::{Store, StoreError};
use crate::{
    query::{Assignment, ColumnRef, DeletePlan, InsertPlan, Plan, SelectPlan, Statement, Target, UpdatePlan},
    schema::{ColumnDef, IndexDef, IndexFilter, SchemaOp}
};

#[derive(Debug, Default)]
struct Table {
    columns: Vec<ColumnDef>,
    indexes: Vec<IndexDef>,
    rows:    Vec<Record>
}

impl Table {
    fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn require_column(&self, target: &Target, name: &str) -> Result<&ColumnDef, StoreError> {
        self.column(name).ok_or_else(|| {
            StoreError::MissingObject(format!("column {}.{}.{name}", target.schema, target.table))
        })
    }

    fn project(&self, row: &Record, columns: &[ColumnRef]) -> Record {
        columns
            .iter()
            .map(|c| (c.name.clone(), row.get_or_null(&c.name).clone()))
            .collect()
    }

    fn check_not_null(&self, row: &Record) -> Result<(), StoreError> {
        match self
            .columns
            .iter()
            .find(|c| !c.nullable() && row.get_or_null(&c.name).is_null())
        {
            Some(c) => Err(StoreError::Constraint(format!(
                "null value in column `{}` violates not-null constraint",
                c.name
            ))),
            None => Ok(())
        }
    }

    /// Reject `row` if it collides with another stored row on the primary
    /// key or a unique index. `skip` is the position of the row being
    /// replaced.
    fn check_unique(&self, row: &Record, skip: Option<usize>) -> Result<(), StoreError> {
        let others: Vec<&Record> = self
            .rows
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != skip)
            .map(|(_, r)| r)
            .collect();
        match unique_violation(&self.columns, &self.indexes, row, &others) {
            Some(name) => Err(StoreError::UniqueViolation(name)),
            None => Ok(())
        }
    }
}

/// Name of the first primary key or unique index `row` violates against
/// `others`.
fn unique_violation(
    columns: &[ColumnDef],
    indexes: &[IndexDef],
    row: &Record,
    others: &[&Record]
) -> Option<String> {
    for pk in columns.iter().filter(|c| c.primary) {
        let key = row.get_or_null(&pk.name);
        if !key.is_null() && others.iter().any(|r| r.get_or_null(&pk.name) == key) {
            return Some(format!("{}_pkey", pk.name));
        }
    }
    for index in indexes.iter().filter(|i| i.unique) {
        if !index_covers(index, row) {
            continue;
        }
        let key: Vec<&Value> = index.columns.iter().map(|c| row.get_or_null(c)).collect();
        if key.iter().any(|v| v.is_null()) {
            continue;
        }
        let clash = others.iter().filter(|r| index_covers(index, r)).any(|r| {
            index
                .columns
                .iter()
                .zip(&key)
                .all(|(c, v)| r.get_or_null(c) == *v)
        });
        if clash {
            return Some(index.name.clone());
        }
    }
    None
}

fn index_covers(index: &IndexDef, row: &Record) -> bool {
    match index.filter {
        Some(IndexFilter::NotDeleted) => row.get_or_null(DELETED_AT).is_null(),
        None => true
    }
}

#[derive(Debug, Default)]
struct Namespace {
    tables: BTreeMap<String, Table>
}

impl Namespace {
    fn index_owner(&self, index: &str) -> Option<String> {
        self.tables
            .iter()
            .find(|(_, t)| t.indexes.iter().any(|i| i.name == index))
            .map(|(name, _)| name.clone())
    }
}

type Namespaces = BTreeMap<String, Namespace>;

/// Store keeping every namespace in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    namespaces: RwLock<Namespaces>
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored row of a table, deleted or not.
    pub async fn rows(&self, schema: &str, table: &str) -> Option<Vec<Record>> {
        let namespaces = self.namespaces.read().await;
        Some(namespaces.get(schema)?.tables.get(table)?.rows.clone())
    }

    /// Column names of a table in order.
    pub async fn columns(&self, schema: &str, table: &str) -> Option<Vec<String>> {
        let namespaces = self.namespaces.read().await;
        let table = namespaces.get(schema)?.tables.get(table)?;
        Some(table.columns.iter().map(|c| c.name.clone()).collect())
    }

    /// Index names of a table in order.
    pub async fn indexes(&self, schema: &str, table: &str) -> Option<Vec<String>> {
        let namespaces = self.namespaces.read().await;
        let table = namespaces.get(schema)?.tables.get(table)?;
        Some(table.indexes.iter().map(|i| i.name.clone()).collect())
    }

    /// Every namespace name.
    pub async fn namespaces(&self) -> Vec<String> {
        self.namespaces.read().await.keys().cloned().collect()
    }

    async fn run(&self, statement: &Statement) -> Result<(u64, Vec<Record>), StoreError> {
        let args = &statement.args;
        if let Plan::Select(plan) = &statement.plan {
            let namespaces = self.namespaces.read().await;
            let rows = select(table(&namespaces, &plan.target)?, plan, args)?;
            return Ok((rows.len() as u64, rows));
        }
        let mut namespaces = self.namespaces.write().await;
        match &statement.plan {
            Plan::Insert(plan) => {
                let row = insert(table_mut(&mut namespaces, &plan.target)?, plan, args)?;
                Ok((1, vec![row]))
            }
            Plan::Update(plan) => {
                let rows = update(table_mut(&mut namespaces, &plan.target)?, plan, args)?;
                Ok((rows.len() as u64, rows))
            }
            Plan::Delete(plan) => {
                let removed = delete(table_mut(&mut namespaces, &plan.target)?, plan, args);
                Ok((removed, Vec::new()))
            }
            Plan::Select(_) => Ok((0, Vec::new()))
        }
    }
}

fn missing_table(target: &Target) -> StoreError {
    StoreError::MissingObject(format!("relation {}.{}", target.schema, target.table))
}

fn missing_schema(schema: &str) -> StoreError {
    StoreError::MissingObject(format!("schema {schema}"))
}

fn table<'a>(namespaces: &'a Namespaces, target: &Target) -> Result<&'a Table, StoreError> {
    namespaces
        .get(&target.schema)
        .and_then(|ns| ns.tables.get(&target.table))
        .ok_or_else(|| missing_table(target))
}

fn table_mut<'a>(namespaces: &'a mut Namespaces, target: &Target) -> Result<&'a mut Table, StoreError> {
    namespaces
        .get_mut(&target.schema)
        .and_then(|ns| ns.tables.get_mut(&target.table))
        .ok_or_else(|| missing_table(target))
}

fn order_rows(a: &Record, b: &Record, order: &[(String, SortDirection)]) -> Ordering {
    for (column, direction) in order {
        let (x, y) = (a.get_or_null(column), b.get_or_null(column));
        // Nulls sort last ascending and first descending.
        let ord = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => x.compare(y).unwrap_or(Ordering::Equal)
        };
        let ord = match direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse()
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn select(table: &Table, plan: &SelectPlan, args: &[Value]) -> Result<Vec<Record>, StoreError> {
    for column in &plan.columns {
        table.require_column(&plan.target, &column.name)?;
    }
    let mut rows: Vec<&Record> = table
        .rows
        .iter()
        .filter(|r| plan.filter.matches(r, args))
        .collect();
    if plan.count {
        return Ok(vec![Record::new().with("count", rows.len() as i64)]);
    }
    rows.sort_by(|a, b| order_rows(a, b, &plan.order));
    let offset = usize::try_from(plan.offset).unwrap_or(usize::MAX);
    let limit = plan
        .limit
        .map_or(usize::MAX, |n| usize::try_from(n).unwrap_or(usize::MAX));
    Ok(rows
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|r| table.project(r, &plan.columns))
        .collect())
}

fn insert(table: &mut Table, plan: &InsertPlan, args: &[Value]) -> Result<Record, StoreError> {
    for (column, _) in &plan.values {
        table.require_column(&plan.target, column)?;
    }
    let mut row = Record::new();
    for column in &table.columns {
        let value = match plan.values.iter().find(|(c, _)| *c == column.name) {
            Some((_, arg)) => args.get(*arg).cloned().unwrap_or(Value::Null),
            None => column
                .default
                .as_ref()
                .map_or(Value::Null, |d| d.evaluate())
        };
        row.insert(column.name.clone(), value);
    }
    table.check_not_null(&row)?;
    table.check_unique(&row, None)?;
    let returned = table.project(&row, &plan.returning);
    table.rows.push(row);
    Ok(returned)
}

fn update(table: &mut Table, plan: &UpdatePlan, args: &[Value]) -> Result<Vec<Record>, StoreError> {
    for assignment in &plan.assignments {
        let (Assignment::Set {
            column, ..
        }
        | Assignment::Increment {
            column
        }) = assignment;
        table.require_column(&plan.target, column)?;
    }
    let mut changed = Vec::new();
    for (i, row) in table.rows.iter().enumerate() {
        if !plan.filter.matches(row, args) {
            continue;
        }
        let mut next = row.clone();
        for assignment in &plan.assignments {
            match assignment {
                Assignment::Set {
                    column,
                    arg
                } => {
                    next.insert(column.clone(), args.get(*arg).cloned().unwrap_or(Value::Null));
                }
                Assignment::Increment {
                    column
                } => {
                    let bumped = match row.get_or_null(column) {
                        Value::Int(n) => Value::Int(n + 1),
                        _ => Value::Null
                    };
                    next.insert(column.clone(), bumped);
                }
            }
        }
        table.check_not_null(&next)?;
        table.check_unique(&next, Some(i))?;
        changed.push((i, next));
    }
    let mut returned = Vec::with_capacity(changed.len());
    for (i, row) in changed {
        returned.push(table.project(&row, &plan.returning));
        table.rows[i] = row;
    }
    Ok(returned)
}

fn delete(table: &mut Table, plan: &DeletePlan, args: &[Value]) -> u64 {
    let before = table.rows.len();
    table.rows.retain(|r| !plan.filter.matches(r, args));
    (before - table.rows.len()) as u64
}

fn namespace<'a>(namespaces: &'a mut Namespaces, schema: &str) -> Result<&'a mut Namespace, StoreError> {
    namespaces
        .get_mut(schema)
        .ok_or_else(|| missing_schema(schema))
}

fn existing<'a>(
    namespaces: &'a mut Namespaces,
    schema: &str,
    table: &str
) -> Result<&'a mut Table, StoreError> {
    let target = Target {
        schema: schema.to_string(),
        table:  table.to_string()
    };
    table_mut(namespaces, &target)
}

fn apply(namespaces: &mut Namespaces, op: &SchemaOp) -> Result<(), StoreError> {
    match op {
        SchemaOp::CreateSchema {
            schema
        } => {
            namespaces.entry(schema.clone()).or_default();
        }
        SchemaOp::DropSchema {
            schema
        } => {
            namespaces.remove(schema);
        }
        SchemaOp::CreateTable {
            schema,
            table,
            columns
        } => {
            namespace(namespaces, schema)?
                .tables
                .entry(table.clone())
                .or_insert_with(|| Table {
                    columns: columns.clone(),
                    ..Table::default()
                });
        }
        SchemaOp::DropTable {
            schema,
            table
        } => {
            if let Some(ns) = namespaces.get_mut(schema) {
                ns.tables.remove(table);
            }
        }
        SchemaOp::AddColumn {
            schema,
            table,
            column
        } => {
            let t = existing(namespaces, schema, table)?;
            if t.column(&column.name).is_some() {
                return Ok(());
            }
            if !column.nullable() && column.default.is_none() && !t.rows.is_empty() {
                return Err(StoreError::Constraint(format!(
                    "column `{}` contains null values",
                    column.name
                )));
            }
            for row in &mut t.rows {
                let value = column.default.as_ref().map_or(Value::Null, |d| d.evaluate());
                row.insert(column.name.clone(), value);
            }
            t.columns.push(column.clone());
        }
        SchemaOp::DropColumn {
            schema,
            table,
            column
        } => {
            let t = existing(namespaces, schema, table)?;
            t.columns.retain(|c| c.name != *column);
            t.indexes.retain(|i| !i.columns.contains(column));
            for row in &mut t.rows {
                row.remove(column);
            }
        }
        SchemaOp::AlterColumn {
            schema,
            table,
            column
        } => {
            let target = Target {
                schema: schema.clone(),
                table:  table.clone()
            };
            let t = existing(namespaces, schema, table)?;
            t.require_column(&target, &column.name)?;
            let mut converted = Vec::with_capacity(t.rows.len());
            for row in &t.rows {
                let value = row.get_or_null(&column.name).clone();
                let value = column.field_type.coerce(value).map_err(|e| {
                    StoreError::Query(format!("cannot convert column `{}`: {e}", column.name))
                })?;
                converted.push(value);
            }
            for (row, value) in t.rows.iter_mut().zip(converted) {
                row.insert(column.name.clone(), value);
            }
            if let Some(def) = t.columns.iter_mut().find(|c| c.name == column.name) {
                def.field_type = column.field_type;
                def.sql_type.name = column.sql_type.name.clone();
                def.check = column.check.clone();
            }
        }
        SchemaOp::CreateIndex {
            schema,
            table,
            index
        } => {
            if namespace(namespaces, schema)?
                .index_owner(&index.name)
                .is_some()
            {
                return Ok(());
            }
            let target = Target {
                schema: schema.clone(),
                table:  table.clone()
            };
            let t = existing(namespaces, schema, table)?;
            for column in &index.columns {
                t.require_column(&target, column)?;
            }
            let candidate = std::slice::from_ref(index);
            for (i, row) in t.rows.iter().enumerate() {
                let earlier: Vec<&Record> = t.rows[..i].iter().collect();
                if let Some(name) = unique_violation(&[], candidate, row, &earlier) {
                    return Err(StoreError::UniqueViolation(name));
                }
            }
            t.indexes.push(index.clone());
        }
        SchemaOp::DropIndex {
            schema,
            index
        } => {
            if let Some(ns) = namespaces.get_mut(schema)
                && let Some(owner) = ns.index_owner(index)
                && let Some(t) = ns.tables.get_mut(&owner)
            {
                t.indexes.retain(|i| i.name != *index);
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Store for MemoryStore {
    async fn fetch_all(&self, statement: &Statement) -> Result<Vec<Record>, StoreError> {
        Ok(self.run(statement).await?.1)
    }

    async fn execute(&self, statement: &Statement) -> Result<u64, StoreError> {
        Ok(self.run(statement).await?.0)
    }

    async fn apply_schema(&self, op: &SchemaOp) -> Result<(), StoreError> {
        let mut namespaces = self.namespaces.write().await;
        apply(&mut namespaces, op)
    }

    async fn list_namespaces(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let namespaces = self.namespaces.read().await;
        Ok(namespaces
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use metadal_core::{TenantId, metadata::ServiceMetadata};
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::{
        query::{Condition, Query, QueryCompiler},
        schema::create_entity
    };

    fn service() -> ServiceMetadata {
        ServiceMetadata::from_json(json!({
            "service": "svc",
            "entities": [{
                "name": "Ticket",
                "fields": [
                    { "name": "title", "type": "text", "required": true },
                    { "name": "code", "type": "text", "unique_per_tenant": true },
                    { "name": "priority", "type": "integer", "default": 3 }
                ],
                "policy": { "soft_delete": true, "optimistic_locking": true }
            }]
        }))
        .unwrap()
    }

    async fn provisioned(service: &ServiceMetadata, tenant: &TenantId) -> MemoryStore {
        let store = MemoryStore::new();
        let schema = tenant.namespace("tenant_");
        store
            .apply_schema(&SchemaOp::CreateSchema {
                schema: schema.clone()
            })
            .await
            .unwrap();
        for op in create_entity(&schema, service.entity("Ticket").unwrap()) {
            store.apply_schema(&op).await.unwrap();
        }
        store
    }

    fn ticket(title: &str, code: &str) -> Record {
        let now = Utc::now();
        Record::new()
            .with("id", Uuid::new_v4())
            .with("title", title)
            .with("code", code)
            .with("created_at", now)
            .with("updated_at", now)
            .with("version", 1)
    }

    #[tokio::test]
    async fn insert_applies_defaults_and_select_filters() {
        let service = service();
        let tenant = TenantId::new("t1").unwrap();
        let store = provisioned(&service, &tenant).await;
        let entity = service.entity("Ticket").unwrap();
        let compiler = QueryCompiler::new(entity, &tenant, "tenant_");

        let mut row = ticket("a", "A-1");
        row.remove("version");
        let stored = store
            .fetch_optional(&compiler.insert(&row).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.get("priority"), Some(&Value::Int(3)));
        assert_eq!(stored.get("version"), Some(&Value::Int(1)));
        assert_eq!(stored.get("tenant_id"), Some(&Value::from("t1")));

        store.execute(&compiler.insert(&ticket("b", "B-1")).unwrap()).await.unwrap();
        let query = Query::new().filter(Condition::eq("title", "b"));
        let rows = store.fetch_all(&compiler.select(&query).unwrap()).await.unwrap();
        assert_eq!(rows.len(), 1);
        let count = store.fetch_all(&compiler.count(&Query::new()).unwrap()).await.unwrap();
        assert_eq!(count[0].get("count"), Some(&Value::Int(2)));
    }

    #[tokio::test]
    async fn not_null_and_unique_are_enforced() {
        let service = service();
        let tenant = TenantId::new("t1").unwrap();
        let store = provisioned(&service, &tenant).await;
        let compiler = QueryCompiler::new(service.entity("Ticket").unwrap(), &tenant, "tenant_");

        let mut untitled = ticket("x", "X-1");
        untitled.remove("title");
        let err = store.execute(&compiler.insert(&untitled).unwrap()).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));

        store.execute(&compiler.insert(&ticket("a", "SAME")).unwrap()).await.unwrap();
        let err = store
            .execute(&compiler.insert(&ticket("b", "SAME")).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::UniqueViolation("uniq_tickets_code_tenant".into()));
    }

    #[tokio::test]
    async fn update_respects_version_and_soft_delete_hides_rows() {
        let service = service();
        let tenant = TenantId::new("t1").unwrap();
        let store = provisioned(&service, &tenant).await;
        let compiler = QueryCompiler::new(service.entity("Ticket").unwrap(), &tenant, "tenant_");
        let row = ticket("a", "A");
        let id = row.id().unwrap();
        store.execute(&compiler.insert(&row).unwrap()).await.unwrap();

        let patch = Record::new().with("title", "b").with("updated_at", Utc::now());
        let stale = compiler.update(id, &patch, Some(7)).unwrap();
        assert_eq!(store.execute(&stale).await.unwrap(), 0);
        let fresh = compiler.update(id, &patch, Some(1)).unwrap();
        let updated = store.fetch_all(&fresh).await.unwrap();
        assert_eq!(updated[0].get("version"), Some(&Value::Int(2)));

        let soft = compiler.soft_delete(id, Some("alice"), Utc::now(), Some(2)).unwrap();
        assert_eq!(store.execute(&soft).await.unwrap(), 1);
        assert!(store.fetch_optional(&compiler.select_by_id(id)).await.unwrap().is_none());
        let raw = store.rows("tenant_t1", "tickets").await.unwrap();
        assert!(!raw[0].get_or_null("deleted_at").is_null());
        assert_eq!(raw[0].get("deleted_by"), Some(&Value::from("alice")));
    }

    #[tokio::test]
    async fn ordering_puts_nulls_last_ascending() {
        let service = service();
        let tenant = TenantId::new("t1").unwrap();
        let store = provisioned(&service, &tenant).await;
        let compiler = QueryCompiler::new(service.entity("Ticket").unwrap(), &tenant, "tenant_");
        for (title, code) in [("b", "2"), ("a", "1")] {
            store.execute(&compiler.insert(&ticket(title, code)).unwrap()).await.unwrap();
        }
        let mut nameless = ticket("c", "3");
        nameless.insert("code", Value::Null);
        store.execute(&compiler.insert(&nameless).unwrap()).await.unwrap();

        let asc = Query::new().order_by("code", SortDirection::Asc);
        let rows = store.fetch_all(&compiler.select(&asc).unwrap()).await.unwrap();
        let titles: Vec<_> = rows.iter().map(|r| r.get_or_null("title").clone()).collect();
        assert_eq!(titles, [Value::from("a"), Value::from("b"), Value::from("c")]);

        let desc = Query::new().order_by("code", SortDirection::Desc).limit(1);
        let rows = store.fetch_all(&compiler.select(&desc).unwrap()).await.unwrap();
        assert_eq!(rows[0].get("title"), Some(&Value::from("c")));
    }

    #[tokio::test]
    async fn schema_ops_are_idempotent_and_checked() {
        let service = service();
        let tenant = TenantId::new("t1").unwrap();
        let store = provisioned(&service, &tenant).await;
        for op in create_entity("tenant_t1", service.entity("Ticket").unwrap()) {
            store.apply_schema(&op).await.unwrap();
        }
        assert_eq!(store.indexes("tenant_t1", "tickets").await.unwrap().len(), 3);

        let missing = SchemaOp::DropColumn {
            schema: "tenant_t1".into(),
            table:  "nothing".into(),
            column: "a".into()
        };
        assert!(matches!(
            store.apply_schema(&missing).await,
            Err(StoreError::MissingObject(_))
        ));

        store
            .apply_schema(&SchemaOp::DropColumn {
                schema: "tenant_t1".into(),
                table:  "tickets".into(),
                column: "code".into()
            })
            .await
            .unwrap();
        let indexes = store.indexes("tenant_t1", "tickets").await.unwrap();
        assert!(!indexes.iter().any(|i| i.contains("code")));
        assert_eq!(store.list_namespaces("tenant_").await.unwrap(), ["tenant_t1"]);
    }

    #[tokio::test]
    async fn missing_namespace_is_reported() {
        let service = service();
        let tenant = TenantId::new("ghost").unwrap();
        let store = MemoryStore::new();
        let compiler = QueryCompiler::new(service.entity("Ticket").unwrap(), &tenant, "tenant_");
        let err = store.fetch_all(&compiler.select(&Query::new()).unwrap()).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingObject(_)));
    }
}
