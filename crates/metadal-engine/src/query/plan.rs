// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Compiled statements.
//!
//! A [`Statement`] carries both the SQL text and the structured [`Plan`] it
//! was rendered from. Relational stores execute the text; the in-memory
//! store interprets the plan. Argument indices in the plan are zero-based
//! positions into [`Statement::args`]; SQL placeholders are one-based.

use std::cmp::Ordering;

use metadal_core::{Record, SortDirection, Value, ident, metadata::FieldType};
use regex::Regex;

/// Schema-qualified table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    /// Tenant namespace.
    pub schema: String,
    /// Entity table.
    pub table:  String
}

impl Target {
    fn sql(&self) -> String {
        ident::qualified(&self.schema, &self.table)
    }
}

/// Column read by a select or returned by a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    /// Column name.
    pub name:       String,
    /// Logical type, used for decoding.
    pub field_type: FieldType
}

impl ColumnRef {
    fn sql(&self) -> String {
        let quoted = ident::quote(&self.name);
        match self.field_type {
            // NUMERIC decodes as text on most drivers; read it as a float.
            FieldType::Decimal => format!("{quoted}::FLOAT8 AS {quoted}"),
            _ => quoted
        }
    }
}

/// Comparison operator of a [`Predicate::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte
}

impl CompareOp {
    /// SQL operator.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<="
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Gte => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Lte => ordering != Ordering::Greater
        }
    }
}

/// Boolean filter over one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Conjunction.
    All(Vec<Predicate>),
    /// Disjunction.
    Any(Vec<Predicate>),
    /// `column OP $arg`.
    Compare {
        /// Column.
        column: String,
        /// Operator.
        op:     CompareOp,
        /// Argument index.
        arg:    usize
    },
    /// `column [I]LIKE $arg`.
    Like {
        /// Column.
        column:           String,
        /// Pattern argument index.
        arg:              usize,
        /// `ILIKE` instead of `LIKE`.
        case_insensitive: bool,
        /// Column is not textual and is cast to text first.
        cast_text:        bool
    },
    /// `column [NOT] IN ($a, $b, ...)`.
    InList {
        /// Column.
        column:  String,
        /// Argument indices, never empty.
        args:    Vec<usize>,
        /// `NOT IN`.
        negated: bool
    },
    /// `column IS [NOT] NULL`.
    IsNull {
        /// Column.
        column:  String,
        /// `IS NOT NULL`.
        negated: bool
    },
    /// `column BETWEEN $low AND $high`.
    Between {
        /// Column.
        column: String,
        /// Lower bound argument index.
        low:    usize,
        /// Upper bound argument index.
        high:   usize
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Connective {
    And,
    Or
}

impl Predicate {
    /// Render as SQL, with `casts[i]` appended to placeholder `i`.
    #[must_use]
    pub fn to_sql(&self, casts: &[&str]) -> String {
        self.render(casts, None)
    }

    fn render(&self, casts: &[&str], parent: Option<Connective>) -> String {
        let ph = |i: usize| placeholder(i, casts);
        match self {
            Self::All(children) => group(children, casts, Connective::And, parent),
            Self::Any(children) => group(children, casts, Connective::Or, parent),
            Self::Compare {
                column,
                op,
                arg
            } => format!("{} {} {}", ident::quote(column), op.as_sql(), ph(*arg)),
            Self::Like {
                column,
                arg,
                case_insensitive,
                cast_text
            } => format!(
                "{}{} {} {}",
                ident::quote(column),
                if *cast_text { "::TEXT" } else { "" },
                if *case_insensitive { "ILIKE" } else { "LIKE" },
                ph(*arg)
            ),
            Self::InList {
                column,
                args,
                negated
            } => format!(
                "{} {}IN ({})",
                ident::quote(column),
                if *negated { "NOT " } else { "" },
                args.iter().map(|a| ph(*a)).collect::<Vec<_>>().join(", ")
            ),
            Self::IsNull {
                column,
                negated
            } => format!(
                "{} IS {}NULL",
                ident::quote(column),
                if *negated { "NOT " } else { "" }
            ),
            Self::Between {
                column,
                low,
                high
            } => format!("{} BETWEEN {} AND {}", ident::quote(column), ph(*low), ph(*high))
        }
    }

    /// Evaluate against a row with SQL null semantics.
    #[must_use]
    pub fn matches(&self, row: &Record, args: &[Value]) -> bool {
        let arg = |i: &usize| args.get(*i).unwrap_or(&Value::Null);
        match self {
            Self::All(children) => children.iter().all(|c| c.matches(row, args)),
            Self::Any(children) => children.iter().any(|c| c.matches(row, args)),
            Self::Compare {
                column,
                op,
                arg: i
            } => row
                .get_or_null(column)
                .compare(arg(i))
                .is_some_and(|o| op.accepts(o)),
            Self::Like {
                column,
                arg: i,
                case_insensitive,
                ..
            } => {
                let (Some(text), Some(pattern)) = (row.get_or_null(column).to_text(), arg(i).to_text())
                else {
                    return false;
                };
                like_to_regex(&pattern, *case_insensitive).is_some_and(|re| re.is_match(&text))
            }
            Self::InList {
                column,
                args: list,
                negated
            } => {
                let value = row.get_or_null(column);
                if value.is_null() {
                    return false;
                }
                let found = list
                    .iter()
                    .any(|i| value.compare(arg(i)) == Some(Ordering::Equal));
                found != *negated
            }
            Self::IsNull {
                column,
                negated
            } => row.get_or_null(column).is_null() != *negated,
            Self::Between {
                column,
                low,
                high
            } => {
                let value = row.get_or_null(column);
                value.compare(arg(low)).is_some_and(|o| o != Ordering::Less)
                    && value.compare(arg(high)).is_some_and(|o| o != Ordering::Greater)
            }
        }
    }
}

fn group(
    children: &[Predicate],
    casts: &[&str],
    own: Connective,
    parent: Option<Connective>
) -> String {
    if children.is_empty() {
        return match own {
            Connective::And => "TRUE".to_string(),
            Connective::Or => "FALSE".to_string()
        };
    }
    let joiner = match own {
        Connective::And => " AND ",
        Connective::Or => " OR "
    };
    let body = children
        .iter()
        .map(|c| c.render(casts, Some(own)))
        .collect::<Vec<_>>()
        .join(joiner);
    match parent {
        Some(p) if p != own && children.len() > 1 => format!("({body})"),
        _ => body
    }
}

fn placeholder(index: usize, casts: &[&str]) -> String {
    match casts.get(index) {
        Some(cast) => format!("${}::{}", index + 1, cast),
        None => format!("${}", index + 1)
    }
}

/// Translate a SQL `LIKE` pattern into an anchored regex.
///
/// `%` matches any run, `_` one character, `\` escapes the next one.
#[must_use]
pub fn like_to_regex(pattern: &str, case_insensitive: bool) -> Option<Regex> {
    let mut re = String::from(if case_insensitive { "(?is)^" } else { "(?s)^" });
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    re.push_str(&regex::escape(&next.to_string()));
                }
            }
            other => re.push_str(&regex::escape(&other.to_string()))
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

/// Row-returning read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectPlan {
    /// Table read.
    pub target:  Target,
    /// Projection; ignored when `count` is set.
    pub columns: Vec<ColumnRef>,
    /// Row filter.
    pub filter:  Predicate,
    /// Ordering.
    pub order:   Vec<(String, SortDirection)>,
    /// Page size.
    pub limit:   Option<u64>,
    /// Rows skipped.
    pub offset:  u64,
    /// Return a single `{count}` row instead of rows.
    pub count:   bool
}

/// Single-row insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertPlan {
    /// Table written.
    pub target:    Target,
    /// Column and argument index pairs.
    pub values:    Vec<(String, usize)>,
    /// Columns returned.
    pub returning: Vec<ColumnRef>
}

/// One `SET` item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// `column = $arg`.
    Set {
        /// Column.
        column: String,
        /// Argument index.
        arg:    usize
    },
    /// `column = column + 1`.
    Increment {
        /// Column.
        column: String
    }
}

/// Filtered update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    /// Table written.
    pub target:      Target,
    /// Assignments in order.
    pub assignments: Vec<Assignment>,
    /// Row filter.
    pub filter:      Predicate,
    /// Columns returned.
    pub returning:   Vec<ColumnRef>
}

/// Filtered physical delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePlan {
    /// Table written.
    pub target: Target,
    /// Row filter.
    pub filter: Predicate
}

/// Structured form of a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// `SELECT`.
    Select(SelectPlan),
    /// `INSERT ... RETURNING`.
    Insert(InsertPlan),
    /// `UPDATE ... RETURNING`.
    Update(UpdatePlan),
    /// `DELETE`.
    Delete(DeletePlan)
}

impl Plan {
    /// Table the plan touches.
    #[must_use]
    pub fn target(&self) -> &Target {
        match self {
            Self::Select(p) => &p.target,
            Self::Insert(p) => &p.target,
            Self::Update(p) => &p.target,
            Self::Delete(p) => &p.target
        }
    }

    /// Render SQL for the plan.
    #[must_use]
    pub fn to_sql(&self, casts: &[&str]) -> String {
        match self {
            Self::Select(p) => {
                let projection = if p.count {
                    "COUNT(*) AS \"count\"".to_string()
                } else {
                    column_list(&p.columns)
                };
                let mut sql = format!(
                    "SELECT {} FROM {} WHERE {}",
                    projection,
                    p.target.sql(),
                    p.filter.to_sql(casts)
                );
                if !p.count {
                    if !p.order.is_empty() {
                        let order = p
                            .order
                            .iter()
                            .map(|(c, d)| format!("{} {}", ident::quote(c), d.as_sql()))
                            .collect::<Vec<_>>()
                            .join(", ");
                        sql.push_str(&format!(" ORDER BY {order}"));
                    }
                    if let Some(limit) = p.limit {
                        sql.push_str(&format!(" LIMIT {limit}"));
                    }
                    if p.offset > 0 {
                        sql.push_str(&format!(" OFFSET {}", p.offset));
                    }
                }
                sql
            }
            Self::Insert(p) => {
                let columns = p
                    .values
                    .iter()
                    .map(|(c, _)| ident::quote(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                let values = p
                    .values
                    .iter()
                    .map(|(_, a)| placeholder(*a, casts))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
                    p.target.sql(),
                    columns,
                    values,
                    column_list(&p.returning)
                )
            }
            Self::Update(p) => {
                let sets = p
                    .assignments
                    .iter()
                    .map(|a| match a {
                        Assignment::Set {
                            column,
                            arg
                        } => format!("{} = {}", ident::quote(column), placeholder(*arg, casts)),
                        Assignment::Increment {
                            column
                        } => {
                            let quoted = ident::quote(column);
                            format!("{quoted} = {quoted} + 1")
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "UPDATE {} SET {} WHERE {} RETURNING {}",
                    p.target.sql(),
                    sets,
                    p.filter.to_sql(casts),
                    column_list(&p.returning)
                )
            }
            Self::Delete(p) => format!(
                "DELETE FROM {} WHERE {}",
                p.target.sql(),
                p.filter.to_sql(casts)
            )
        }
    }
}

fn column_list(columns: &[ColumnRef]) -> String {
    columns
        .iter()
        .map(ColumnRef::sql)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Compiled, parameterized statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text with `$n::TYPE` placeholders.
    pub sql:  String,
    /// Positional arguments; `args[i]` binds `$i+1`.
    pub args: Vec<Value>,
    /// Structured form.
    pub plan: Plan
}

impl Statement {
    /// Number of distinct placeholders in [`Self::sql`].
    #[must_use]
    pub fn placeholder_count(&self) -> usize {
        let mut seen = std::collections::BTreeSet::new();
        let bytes = self.sql.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'$' {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if end > start {
                    seen.insert(&self.sql[start..end]);
                }
                i = end.max(i + 1);
            } else {
                i += 1;
            }
        }
        seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp(column: &str, arg: usize) -> Predicate {
        Predicate::Compare {
            column: column.into(),
            op: CompareOp::Eq,
            arg
        }
    }

    #[test]
    fn nested_groups_are_parenthesized() {
        let p = Predicate::All(vec![
            cmp("a", 0),
            Predicate::Any(vec![cmp("b", 1), Predicate::All(vec![cmp("c", 2), cmp("d", 3)])]),
        ]);
        assert_eq!(
            p.to_sql(&["TEXT", "TEXT", "TEXT", "TEXT"]),
            "\"a\" = $1::TEXT AND (\"b\" = $2::TEXT OR (\"c\" = $3::TEXT AND \"d\" = $4::TEXT))"
        );
    }

    #[test]
    fn like_translation() {
        let re = like_to_regex("%urg_nt%", false).unwrap();
        assert!(re.is_match("very urgent task"));
        assert!(!re.is_match("very URGENT task"));
        let re = like_to_regex("%urgent%", true).unwrap();
        assert!(re.is_match("very URGENT task"));
        let re = like_to_regex("100\\%", false).unwrap();
        assert!(re.is_match("100%"));
        assert!(!re.is_match("1000"));
        let re = like_to_regex("a.c", false).unwrap();
        assert!(!re.is_match("abc"));
    }

    #[test]
    fn null_semantics() {
        let row = Record::new().with("a", Value::Null).with("b", 2);
        let args = [Value::Int(2)];
        assert!(!cmp("a", 0).matches(&row, &args));
        assert!(cmp("b", 0).matches(&row, &args));
        let not_in = Predicate::InList {
            column:  "a".into(),
            args:    vec![0],
            negated: true
        };
        assert!(!not_in.matches(&row, &args));
        let is_null = Predicate::IsNull {
            column:  "missing".into(),
            negated: false
        };
        assert!(is_null.matches(&row, &args));
    }

    #[test]
    fn between_is_inclusive() {
        let p = Predicate::Between {
            column: "n".into(),
            low:    0,
            high:   1
        };
        let args = [Value::Int(1), Value::Int(3)];
        for (n, expected) in [(0, false), (1, true), (3, true), (4, false)] {
            assert_eq!(p.matches(&Record::new().with("n", n), &args), expected, "{n}");
        }
    }

    #[test]
    fn placeholder_count_ignores_repeats() {
        let stmt = Statement {
            sql:  "SELECT 1 WHERE a = $1::TEXT AND b = $2 AND c = $10".into(),
            args: vec![],
            plan: Plan::Delete(DeletePlan {
                target: Target {
                    schema: "s".into(),
                    table:  "t".into()
                },
                filter: Predicate::All(vec![])
            })
        };
        assert_eq!(stmt.placeholder_count(), 3);
    }
}
