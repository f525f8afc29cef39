// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Compilation of queries and writes for one entity in one tenant.
//!
//! Every statement starts its filter with `"tenant_id" = $1::TEXT`, followed
//! by `"deleted_at" IS NULL` when the entity soft-deletes. Caller input never
//! reaches the SQL text: identifiers come from metadata, values become
//! arguments.

use chrono::{DateTime, Utc};
use metadal_core::{
    Record, TenantId, Value,
    metadata::{
        CREATED_AT, DELETED_AT, DELETED_BY, EntityMetadata, FieldMetadata, FieldType, ID,
        TENANT_ID, UPDATED_AT, VERSION
    }
};
use uuid::Uuid;

use super::{
    Condition, Filter, Operator, Query,
    plan::{
        Assignment, ColumnRef, CompareOp, DeletePlan, InsertPlan, Plan, Predicate, SelectPlan,
        Statement, Target, UpdatePlan
    }
};
use crate::{
    error::{DalError, DalResult},
    schema::types::cast_type
};

/// Columns a generic update never assigns.
const FIXED_COLUMNS: [&str; 4] = [ID, TENANT_ID, CREATED_AT, VERSION];

/// Positional argument list with per-placeholder casts.
#[derive(Default)]
struct Args {
    values: Vec<Value>,
    casts:  Vec<&'static str>
}

impl Args {
    fn push(&mut self, value: Value, field_type: FieldType) -> usize {
        self.push_cast(value, cast_type(field_type))
    }

    fn push_cast(&mut self, value: Value, cast: &'static str) -> usize {
        self.values.push(value);
        self.casts.push(cast);
        self.values.len() - 1
    }

    fn finish(self, plan: Plan) -> Statement {
        Statement {
            sql: plan.to_sql(&self.casts),
            args: self.values,
            plan
        }
    }
}

/// Statement builder bound to an entity, a tenant and a namespace.
#[derive(Debug, Clone)]
pub struct QueryCompiler<'a> {
    entity: &'a EntityMetadata,
    tenant: &'a TenantId,
    target: Target
}

impl<'a> QueryCompiler<'a> {
    /// Compiler for `entity` in the namespace `{schema_prefix}{tenant}`.
    #[must_use]
    pub fn new(entity: &'a EntityMetadata, tenant: &'a TenantId, schema_prefix: &str) -> Self {
        Self {
            entity,
            tenant,
            target: Target {
                schema: tenant.namespace(schema_prefix),
                table:  entity.table.clone()
            }
        }
    }

    /// Table the compiler writes to.
    #[must_use]
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Paginated row query.
    ///
    /// # Errors
    ///
    /// [`DalError::UnknownField`] for any unknown projection, filter or
    /// ordering field; [`DalError::InvalidQuery`] or
    /// [`DalError::InvalidValue`] for malformed filters.
    pub fn select(&self, query: &Query) -> DalResult<Statement> {
        let columns = self.projection(&query.select)?;
        let mut order = Vec::with_capacity(query.order_by.len());
        for clause in &query.order_by {
            self.column(&clause.field)?;
            order.push((clause.field.clone(), clause.direction));
        }
        let mut args = Args::default();
        let filter = self.filter(&query.filter, &mut args)?;
        Ok(args.finish(Plan::Select(SelectPlan {
            target: self.target.clone(),
            columns,
            filter,
            order,
            limit: query.limit.filter(|n| *n > 0),
            offset: query.offset.unwrap_or(0),
            count: false
        })))
    }

    /// `COUNT(*)` over the same filter as [`Self::select`], bound
    /// identically.
    ///
    /// # Errors
    ///
    /// Same as [`Self::select`].
    pub fn count(&self, query: &Query) -> DalResult<Statement> {
        let mut args = Args::default();
        let filter = self.filter(&query.filter, &mut args)?;
        Ok(args.finish(Plan::Select(SelectPlan {
            target: self.target.clone(),
            columns: Vec::new(),
            filter,
            order: Vec::new(),
            limit: None,
            offset: 0,
            count: true
        })))
    }

    /// Visible row by id.
    #[must_use]
    pub fn select_by_id(&self, id: Uuid) -> Statement {
        let mut args = Args::default();
        let mut filter = self.scope(&mut args);
        filter.push(self.id_predicate(id, &mut args));
        args.finish(self.select_all(Predicate::All(filter)))
    }

    /// Visible rows whose `field` is one of `values`, for relation lookup.
    ///
    /// # Errors
    ///
    /// [`DalError::UnknownField`], [`DalError::InvalidQuery`] when `values`
    /// is empty, or [`DalError::InvalidValue`].
    pub fn select_where_in(&self, field: &str, values: &[Value]) -> DalResult<Statement> {
        let column = self.column(field)?;
        if values.is_empty() {
            return Err(self.invalid(format!("lookup on `{field}` needs at least one value")));
        }
        let mut args = Args::default();
        let mut filter = self.scope(&mut args);
        let mut list = Vec::with_capacity(values.len());
        for value in values {
            let value = self.coerce(column, value.clone())?;
            list.push(args.push(value, column.field_type));
        }
        filter.push(Predicate::InList {
            column:  field.to_string(),
            args:    list,
            negated: false
        });
        Ok(args.finish(self.select_all(Predicate::All(filter))))
    }

    /// `INSERT ... RETURNING *`.
    ///
    /// Keys unknown to the entity are dropped. `tenant_id` is always the
    /// compiler's tenant, whatever the record says.
    ///
    /// # Errors
    ///
    /// [`DalError::InvalidValue`] when a value does not fit its column.
    pub fn insert(&self, record: &Record) -> DalResult<Statement> {
        let mut args = Args::default();
        let mut values = Vec::new();
        for column in self.entity.columns() {
            let value = if column.name == TENANT_ID {
                Value::Text(self.tenant.as_str().to_string())
            } else {
                match record.get(&column.name) {
                    Some(value) => self.coerce(column, value.clone())?,
                    None => continue
                }
            };
            values.push((column.name.clone(), args.push(value, column.field_type)));
        }
        Ok(args.finish(Plan::Insert(InsertPlan {
            target: self.target.clone(),
            values,
            returning: self.all_columns()
        })))
    }

    /// `UPDATE ... RETURNING *` of a visible row.
    ///
    /// `id`, `tenant_id`, `created_at`, `version` and immutable fields are
    /// never assigned; unknown keys are dropped. With optimistic locking the
    /// statement bumps `version` and, given `expected_version`, only matches
    /// that version.
    ///
    /// # Errors
    ///
    /// [`DalError::InvalidValue`], or [`DalError::InvalidQuery`] when nothing
    /// would be assigned.
    pub fn update(
        &self,
        id: Uuid,
        patch: &Record,
        expected_version: Option<i64>
    ) -> DalResult<Statement> {
        let mut args = Args::default();
        let filter = self.write_filter(id, expected_version, &mut args);
        let mut assignments = Vec::new();
        for column in self.entity.columns() {
            if FIXED_COLUMNS.contains(&column.name.as_str()) || column.immutable {
                continue;
            }
            let Some(value) = patch.get(&column.name) else {
                continue;
            };
            let value = self.coerce(column, value.clone())?;
            assignments.push(Assignment::Set {
                column: column.name.clone(),
                arg:    args.push(value, column.field_type)
            });
        }
        if assignments.is_empty() && !self.entity.locking() {
            return Err(self.invalid("update assigns no columns".to_string()));
        }
        self.bump_version(&mut assignments);
        Ok(args.finish(Plan::Update(UpdatePlan {
            target: self.target.clone(),
            assignments,
            filter,
            returning: self.all_columns()
        })))
    }

    /// Physical `DELETE` of a visible row.
    #[must_use]
    pub fn delete(&self, id: Uuid, expected_version: Option<i64>) -> Statement {
        let mut args = Args::default();
        let filter = self.write_filter(id, expected_version, &mut args);
        args.finish(Plan::Delete(DeletePlan {
            target: self.target.clone(),
            filter
        }))
    }

    /// Mark a visible row deleted.
    ///
    /// # Errors
    ///
    /// [`DalError::InvalidQuery`] when the entity does not soft-delete.
    pub fn soft_delete(
        &self,
        id: Uuid,
        actor: Option<&str>,
        now: DateTime<Utc>,
        expected_version: Option<i64>
    ) -> DalResult<Statement> {
        self.require_soft_delete()?;
        let mut args = Args::default();
        let filter = self.write_filter(id, expected_version, &mut args);
        let actor = actor.map_or(Value::Null, |a| Value::Text(a.to_string()));
        let mut assignments = vec![
            self.assign(DELETED_AT, Value::Timestamp(now), FieldType::Timestamp, &mut args),
            self.assign(DELETED_BY, actor, FieldType::Text, &mut args),
            self.assign(UPDATED_AT, Value::Timestamp(now), FieldType::Timestamp, &mut args),
        ];
        self.bump_version(&mut assignments);
        Ok(args.finish(Plan::Update(UpdatePlan {
            target: self.target.clone(),
            assignments,
            filter,
            returning: self.all_columns()
        })))
    }

    /// Clear the deletion marker of a soft-deleted row.
    ///
    /// # Errors
    ///
    /// [`DalError::InvalidQuery`] when the entity does not soft-delete.
    pub fn restore(&self, id: Uuid, now: DateTime<Utc>) -> DalResult<Statement> {
        self.require_soft_delete()?;
        let mut args = Args::default();
        let tenant = self.tenant_predicate(&mut args);
        let id = self.id_predicate(id, &mut args);
        let filter = Predicate::All(vec![
            tenant,
            Predicate::IsNull {
                column:  DELETED_AT.to_string(),
                negated: true
            },
            id,
        ]);
        let mut assignments = vec![
            self.assign(DELETED_AT, Value::Null, FieldType::Timestamp, &mut args),
            self.assign(DELETED_BY, Value::Null, FieldType::Text, &mut args),
            self.assign(UPDATED_AT, Value::Timestamp(now), FieldType::Timestamp, &mut args),
        ];
        self.bump_version(&mut assignments);
        Ok(args.finish(Plan::Update(UpdatePlan {
            target: self.target.clone(),
            assignments,
            filter,
            returning: self.all_columns()
        })))
    }

    fn select_all(&self, filter: Predicate) -> Plan {
        Plan::Select(SelectPlan {
            target: self.target.clone(),
            columns: self.all_columns(),
            filter,
            order: Vec::new(),
            limit: None,
            offset: 0,
            count: false
        })
    }

    fn all_columns(&self) -> Vec<ColumnRef> {
        self.entity.columns().iter().map(column_ref).collect()
    }

    fn projection(&self, select: &[String]) -> DalResult<Vec<ColumnRef>> {
        if select.is_empty() {
            return Ok(self.all_columns());
        }
        let mut columns: Vec<ColumnRef> = Vec::with_capacity(select.len());
        for name in select {
            let column = self.column(name)?;
            if !columns.iter().any(|c| c.name == column.name) {
                columns.push(column_ref(column));
            }
        }
        Ok(columns)
    }

    fn column(&self, name: &str) -> DalResult<&'a FieldMetadata> {
        self.entity
            .column(name)
            .ok_or_else(|| DalError::UnknownField {
                entity: self.entity.name.clone(),
                field:  name.to_string()
            })
    }

    fn coerce(&self, column: &FieldMetadata, value: Value) -> DalResult<Value> {
        column
            .field_type
            .coerce(value)
            .map_err(|e| DalError::InvalidValue {
                entity:  self.entity.name.clone(),
                field:   column.name.clone(),
                message: e.to_string()
            })
    }

    fn invalid(&self, message: String) -> DalError {
        DalError::InvalidQuery {
            entity: self.entity.name.clone(),
            message
        }
    }

    fn require_soft_delete(&self) -> DalResult<()> {
        if self.entity.soft_delete() {
            Ok(())
        } else {
            Err(self.invalid("entity does not use soft delete".to_string()))
        }
    }

    fn tenant_predicate(&self, args: &mut Args) -> Predicate {
        Predicate::Compare {
            column: TENANT_ID.to_string(),
            op:     CompareOp::Eq,
            arg:    args.push(Value::Text(self.tenant.as_str().to_string()), FieldType::Text)
        }
    }

    fn id_predicate(&self, id: Uuid, args: &mut Args) -> Predicate {
        Predicate::Compare {
            column: ID.to_string(),
            op:     CompareOp::Eq,
            arg:    args.push(Value::Uuid(id), FieldType::Uuid)
        }
    }

    /// Tenant predicate, then the not-deleted predicate when soft-deleting.
    fn scope(&self, args: &mut Args) -> Vec<Predicate> {
        let mut predicates = vec![self.tenant_predicate(args)];
        if self.entity.soft_delete() {
            predicates.push(Predicate::IsNull {
                column:  DELETED_AT.to_string(),
                negated: false
            });
        }
        predicates
    }

    fn write_filter(&self, id: Uuid, expected_version: Option<i64>, args: &mut Args) -> Predicate {
        let mut filter = self.scope(args);
        filter.push(self.id_predicate(id, args));
        if self.entity.locking()
            && let Some(version) = expected_version
        {
            filter.push(Predicate::Compare {
                column: VERSION.to_string(),
                op:     CompareOp::Eq,
                arg:    args.push(Value::Int(version), FieldType::Integer)
            });
        }
        Predicate::All(filter)
    }

    fn assign(
        &self,
        column: &str,
        value: Value,
        field_type: FieldType,
        args: &mut Args
    ) -> Assignment {
        Assignment::Set {
            column: column.to_string(),
            arg:    args.push(value, field_type)
        }
    }

    fn bump_version(&self, assignments: &mut Vec<Assignment>) {
        if self.entity.locking() {
            assignments.push(Assignment::Increment {
                column: VERSION.to_string()
            });
        }
    }

    fn filter(&self, conditions: &[Condition], args: &mut Args) -> DalResult<Predicate> {
        let mut predicates = self.scope(args);
        for condition in conditions {
            if let Some(predicate) = self.condition(condition, args)? {
                absorb(&mut predicates, predicate, true);
            }
        }
        Ok(Predicate::All(predicates))
    }

    fn condition(&self, condition: &Condition, args: &mut Args) -> DalResult<Option<Predicate>> {
        match condition {
            Condition::Leaf(filter) => self.leaf(filter, args).map(Some),
            Condition::And {
                and
            } => self.group(and, args, true),
            Condition::Or {
                or
            } => self.group(or, args, false)
        }
    }

    fn group(
        &self,
        children: &[Condition],
        args: &mut Args,
        conjunction: bool
    ) -> DalResult<Option<Predicate>> {
        let mut predicates = Vec::with_capacity(children.len());
        for child in children {
            if let Some(predicate) = self.condition(child, args)? {
                absorb(&mut predicates, predicate, conjunction);
            }
        }
        Ok(match predicates.len() {
            0 => None,
            1 => predicates.pop(),
            _ if conjunction => Some(Predicate::All(predicates)),
            _ => Some(Predicate::Any(predicates))
        })
    }

    fn leaf(&self, filter: &Filter, args: &mut Args) -> DalResult<Predicate> {
        let column = self.column(&filter.field)?;
        let name = column.name.clone();
        let bind = |args: &mut Args, raw: &serde_json::Value| -> DalResult<usize> {
            let value = self.coerce(column, Value::from_json(raw.clone()))?;
            Ok(args.push(value, column.field_type))
        };
        let compare = |args: &mut Args, op: CompareOp| -> DalResult<Predicate> {
            Ok(Predicate::Compare {
                column: name.clone(),
                op,
                arg: bind(args, &filter.value)?
            })
        };

        match filter.op {
            Operator::Eq if filter.value.is_null() => Ok(Predicate::IsNull {
                column:  name,
                negated: false
            }),
            Operator::Neq if filter.value.is_null() => Ok(Predicate::IsNull {
                column:  name,
                negated: true
            }),
            Operator::Eq => compare(args, CompareOp::Eq),
            Operator::Neq => compare(args, CompareOp::Ne),
            op @ (Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte) => {
                if filter.value.is_null() {
                    return Err(self.invalid(format!(
                        "`{}` on `{}` needs a value",
                        op.as_str(),
                        filter.field
                    )));
                }
                let op = match op {
                    Operator::Gt => CompareOp::Gt,
                    Operator::Gte => CompareOp::Gte,
                    Operator::Lt => CompareOp::Lt,
                    _ => CompareOp::Lte
                };
                compare(args, op)
            }
            Operator::Like | Operator::Ilike => {
                let Some(pattern) = filter.value.as_str() else {
                    return Err(self.invalid(format!(
                        "`{}` on `{}` needs a text pattern",
                        filter.op.as_str(),
                        filter.field
                    )));
                };
                Ok(Predicate::Like {
                    column:           name,
                    arg:              args.push_cast(Value::Text(pattern.to_string()), "TEXT"),
                    case_insensitive: filter.op == Operator::Ilike,
                    cast_text:        !column.field_type.is_textual()
                })
            }
            Operator::In | Operator::NotIn => {
                let items = match &filter.value {
                    serde_json::Value::Array(items) if !items.is_empty() => items,
                    _ => {
                        return Err(self.invalid(format!(
                            "`{}` on `{}` needs a non-empty list",
                            filter.op.as_str(),
                            filter.field
                        )));
                    }
                };
                let mut list = Vec::with_capacity(items.len());
                for item in items {
                    list.push(bind(args, item)?);
                }
                Ok(Predicate::InList {
                    column:  name,
                    args:    list,
                    negated: filter.op == Operator::NotIn
                })
            }
            Operator::IsNull | Operator::IsNotNull => Ok(Predicate::IsNull {
                column:  name,
                negated: filter.op == Operator::IsNotNull
            }),
            Operator::Between => match &filter.value {
                serde_json::Value::Array(bounds) if bounds.len() == 2 => {
                    let low = bind(args, &bounds[0])?;
                    let high = bind(args, &bounds[1])?;
                    Ok(Predicate::Between {
                        column: name,
                        low,
                        high
                    })
                }
                _ => Err(self.invalid(format!(
                    "`between` on `{}` needs exactly two values",
                    filter.field
                )))
            }
        }
    }
}

fn column_ref(field: &FieldMetadata) -> ColumnRef {
    ColumnRef {
        name:       field.name.clone(),
        field_type: field.field_type
    }
}

/// Append `predicate` to a group, flattening a child of the same connective.
fn absorb(group: &mut Vec<Predicate>, predicate: Predicate, conjunction: bool) {
    match predicate {
        Predicate::All(children) if conjunction => group.extend(children),
        Predicate::Any(children) if !conjunction => group.extend(children),
        other => group.push(other)
    }
}
