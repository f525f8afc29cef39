// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Field validation rules.

use metadal_core::{
    Record, Value,
    metadata::{ValidationKind, ValidationRule}
};

use crate::error::Violation;

/// Stable rule name reported in a [`Violation`].
#[must_use]
pub const fn rule_name(kind: &ValidationKind) -> &'static str {
    match kind {
        ValidationKind::Required => "required",
        ValidationKind::MinLength(_) => "min_length",
        ValidationKind::MaxLength(_) => "max_length",
        ValidationKind::EmailFormat(_) => "email_format",
        ValidationKind::Regex(_) => "regex",
        ValidationKind::In(_) => "in"
    }
}

/// Check one rule against a record.
///
/// Only `required` fails on a missing value; the length and pattern rules
/// apply to text values and skip everything else.
#[must_use]
pub fn validate(rule: &ValidationRule, record: &Record) -> Option<Violation> {
    let value = record.get_or_null(&rule.field);
    let text = match value {
        Value::Text(s) => Some(s.as_str()),
        _ => None
    };
    let ok = match &rule.kind {
        ValidationKind::Required => !value.is_null() && text.is_none_or(|s| !s.is_empty()),
        ValidationKind::MinLength(n) => text.is_none_or(|s| s.chars().count() >= *n),
        ValidationKind::MaxLength(n) => text.is_none_or(|s| s.chars().count() <= *n),
        ValidationKind::EmailFormat(p) | ValidationKind::Regex(p) => {
            text.is_none_or(|s| p.is_match(s))
        }
        ValidationKind::In(allowed) => match value.to_text() {
            None => true,
            Some(s) => allowed.iter().any(|a| *a == s)
        }
    };
    (!ok).then(|| Violation {
        field:   rule.field.clone(),
        rule:    rule_name(&rule.kind),
        message: rule.message()
    })
}
