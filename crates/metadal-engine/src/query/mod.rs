// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Declarative queries and their compilation to parameterized SQL.
//!
//! # Query document
//!
//! ```json
//! {
//!   "select":   ["id", "title", "status"],
//!   "where":    [
//!     { "field": "status", "op": "eq", "value": "open" },
//!     { "or": [
//!       { "field": "priority", "op": "gte", "value": 3 },
//!       { "field": "title", "op": "ilike", "value": "%urgent%" }
//!     ]}
//!   ],
//!   "order_by": [{ "field": "created_at", "direction": "desc" }],
//!   "limit":    20,
//!   "offset":   40,
//!   "relations": ["comments"]
//! }
//! ```
//!
//! The top-level `where` list is a conjunction. Operators:
//!
//! | Operator | Aliases | Value | SQL |
//! |----------|---------|-------|-----|
//! | `eq` | `=`, `==`, *(missing)* | scalar | `col = $n` (`IS NULL` for null) |
//! | `neq` | `!=`, `<>`, `ne` | scalar | `col <> $n` (`IS NOT NULL` for null) |
//! | `gt`, `gte`, `lt`, `lte` | `>`, `>=`, `<`, `<=` | scalar | ordering |
//! | `like`, `ilike` | | text pattern | pattern match |
//! | `in`, `not_in` | `nin` | non-empty list | one placeholder per element |
//! | `is_null`, `is_not_null` | | ignored | no placeholder |
//! | `between` | | `[low, high]` | inclusive bounds |

mod compiler;
mod plan;

pub use compiler::QueryCompiler;
use metadal_core::{SortDirection, Value};
pub use plan::{
    Assignment, ColumnRef, CompareOp, DeletePlan, InsertPlan, Plan, Predicate, SelectPlan,
    Statement, Target, UpdatePlan, like_to_regex
};
use serde::Deserialize;

/// Filter operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Equality.
    #[default]
    #[serde(alias = "=", alias = "==", alias = "")]
    Eq,
    /// Inequality.
    #[serde(alias = "!=", alias = "<>", alias = "ne")]
    Neq,
    /// Greater than.
    #[serde(alias = ">")]
    Gt,
    /// Greater than or equal.
    #[serde(alias = ">=")]
    Gte,
    /// Less than.
    #[serde(alias = "<")]
    Lt,
    /// Less than or equal.
    #[serde(alias = "<=")]
    Lte,
    /// Case-sensitive pattern match.
    Like,
    /// Case-insensitive pattern match.
    Ilike,
    /// Membership.
    In,
    /// Exclusion.
    #[serde(alias = "nin")]
    NotIn,
    /// Null test.
    IsNull,
    /// Non-null test.
    IsNotNull,
    /// Inclusive range.
    Between
}

impl Operator {
    /// Snake-case name, for error messages.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Like => "like",
            Self::Ilike => "ilike",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::IsNull => "is_null",
            Self::IsNotNull => "is_not_null",
            Self::Between => "between"
        }
    }
}

/// Leaf condition: `field OP value`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Filter {
    /// Field name, validated against metadata.
    pub field: String,
    /// Operator; `eq` when absent.
    #[serde(default, alias = "operator")]
    pub op:    Operator,
    /// Operand. Lists for `in`, `not_in` and `between`.
    #[serde(default)]
    pub value: serde_json::Value
}

/// Condition tree node.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    /// Disjunction of children.
    Or {
        /// Children.
        or: Vec<Condition>
    },
    /// Conjunction of children.
    And {
        /// Children.
        and: Vec<Condition>
    },
    /// Leaf comparison.
    Leaf(Filter)
}

impl Condition {
    /// Leaf with an explicit operator.
    pub fn leaf(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Self::Leaf(Filter {
            field: field.into(),
            op,
            value: value.into().to_json()
        })
    }

    /// `field = value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::Eq, value)
    }

    /// `field IN (values...)`.
    pub fn is_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>
    {
        Self::Leaf(Filter {
            field: field.into(),
            op:    Operator::In,
            value: serde_json::Value::Array(
                values.into_iter().map(|v| v.into().to_json()).collect()
            )
        })
    }

    /// `field BETWEEN low AND high`.
    pub fn between(
        field: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>
    ) -> Self {
        Self::Leaf(Filter {
            field: field.into(),
            op:    Operator::Between,
            value: serde_json::json!([low.into().to_json(), high.into().to_json()])
        })
    }

    /// `field IS NULL`.
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::leaf(field, Operator::IsNull, Value::Null)
    }

    /// Conjunction.
    pub fn and(children: Vec<Condition>) -> Self {
        Self::And {
            and: children
        }
    }

    /// Disjunction.
    pub fn or(children: Vec<Condition>) -> Self {
        Self::Or {
            or: children
        }
    }
}

/// One ordering clause.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OrderBy {
    /// Field name, validated against metadata.
    pub field:     String,
    /// Direction; ascending when absent.
    #[serde(default, alias = "dir")]
    pub direction: SortDirection
}

/// Declarative query against one entity.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct Query {
    /// Projection; empty means every column.
    #[serde(alias = "fields")]
    pub select:    Vec<String>,
    /// Conjunction of conditions.
    #[serde(rename = "where", alias = "filter")]
    pub filter:    Vec<Condition>,
    /// Ordering clauses, applied in order.
    #[serde(alias = "order")]
    pub order_by:  Vec<OrderBy>,
    /// Page size; absent or zero means unbounded at compile time.
    pub limit:     Option<u64>,
    /// Rows to skip.
    pub offset:    Option<u64>,
    /// Relations to resolve on each row.
    #[serde(alias = "include")]
    pub relations: Vec<String>
}

impl Query {
    /// Match-everything query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the projection.
    #[must_use]
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>
    {
        self.select = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Add a top-level condition.
    #[must_use]
    pub fn filter(mut self, condition: Condition) -> Self {
        self.filter.push(condition);
        self
    }

    /// Add an ordering clause.
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            direction
        });
        self
    }

    /// Set the page size.
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the offset.
    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Request a relation.
    #[must_use]
    pub fn with_relation(mut self, name: impl Into<String>) -> Self {
        self.relations.push(name.into());
        self
    }
}
