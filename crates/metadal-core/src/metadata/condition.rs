// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Business-rule conditions.
//!
//! A condition is a conjunction of clauses of the form
//! `old.field == 'literal'` or `new.field != 'literal'`, joined by `&&`.
//! Conditions are parsed once when metadata loads; evaluation never fails.
//!
//! Field values compare by their text form. Absent and null fields compare
//! as the empty string, so `old.status == ''` holds on create.

use std::{fmt, str::FromStr};

use serde::Deserialize;
use thiserror::Error;

use crate::{Record, ident};

/// A condition string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid rule condition `{condition}`: {reason}")]
pub struct ConditionError {
    /// Offending condition text.
    pub condition: String,
    /// What is wrong.
    pub reason:    &'static str
}

/// Which snapshot a clause reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Snapshot {
    /// State before the operation.
    Old,
    /// Proposed state after the operation.
    New
}

/// Clause operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `==`
    Eq,
    /// `!=`
    Ne
}

/// One `snapshot.field OP literal` term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    /// Snapshot read.
    pub snapshot:   Snapshot,
    /// Field read.
    pub field:      String,
    /// Operator.
    pub comparison: Comparison,
    /// Literal compared against.
    pub literal:    String
}

impl Clause {
    fn holds(&self, old: Option<&Record>, new: &Record) -> bool {
        let record = match self.snapshot {
            Snapshot::Old => old,
            Snapshot::New => Some(new)
        };
        let actual = record
            .and_then(|r| r.get(&self.field))
            .and_then(|v| v.to_text())
            .unwrap_or_default();
        match self.comparison {
            Comparison::Eq => actual == self.literal,
            Comparison::Ne => actual != self.literal
        }
    }
}

/// Parsed conjunction of clauses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct RuleCondition {
    source:  String,
    clauses: Vec<Clause>
}

impl RuleCondition {
    /// Parse condition text.
    ///
    /// # Errors
    ///
    /// [`ConditionError`] for empty input, a clause without `==`/`!=`, a
    /// left side other than `old.<field>`/`new.<field>`, or an unterminated
    /// quoted literal.
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let fail = |reason| ConditionError {
            condition: source.to_string(),
            reason
        };
        if source.trim().is_empty() {
            return Err(fail("condition is empty"));
        }

        let mut clauses = Vec::new();
        for part in split_clauses(source) {
            let part = part.trim();
            let (eq, ne) = (part.find("=="), part.find("!="));
            let (at, comparison) = match (eq, ne) {
                (Some(e), Some(n)) if n < e => (n, Comparison::Ne),
                (Some(e), _) => (e, Comparison::Eq),
                (None, Some(n)) => (n, Comparison::Ne),
                (None, None) => return Err(fail("clause needs `==` or `!=`"))
            };
            let lhs = part[..at].trim();
            let rhs = part[at + 2..].trim();

            let (snapshot, field) = if let Some(f) = lhs.strip_prefix("old.") {
                (Snapshot::Old, f)
            } else if let Some(f) = lhs.strip_prefix("new.") {
                (Snapshot::New, f)
            } else {
                return Err(fail("left side must be `old.<field>` or `new.<field>`"));
            };
            if !ident::is_valid(field) {
                return Err(fail("field name is not a valid identifier"));
            }

            clauses.push(Clause {
                snapshot,
                field: field.to_string(),
                comparison,
                literal: parse_literal(rhs).ok_or_else(|| fail("malformed literal"))?
            });
        }

        Ok(Self {
            source: source.to_string(),
            clauses
        })
    }

    /// Original text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parsed clauses.
    #[must_use]
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Evaluate against the old (absent on create) and new snapshots.
    #[must_use]
    pub fn evaluate(&self, old: Option<&Record>, new: &Record) -> bool {
        self.clauses.iter().all(|c| c.holds(old, new))
    }
}

/// Split on `&&` outside quoted literals.
fn split_clauses(source: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    let mut chars = source.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == '&' && chars.peek().is_some_and(|&(_, n)| n == '&') => {
                chars.next();
                parts.push(&source[start..i]);
                start = i + 2;
            }
            None => {}
        }
    }
    parts.push(&source[start..]);
    parts
}

fn parse_literal(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    let quoted = |q: char| raw.len() >= 2 && raw.starts_with(q) && raw.ends_with(q);
    if quoted('\'') || quoted('"') {
        return Some(raw[1..raw.len() - 1].to_string());
    }
    if raw.starts_with(['\'', '"']) || raw.ends_with(['\'', '"']) {
        return None;
    }
    if raw == "null" {
        return Some(String::new());
    }
    Some(raw.to_string())
}

impl TryFrom<String> for RuleCondition {
    type Error = ConditionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl FromStr for RuleCondition {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RuleCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
