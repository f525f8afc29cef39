// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! SQL identifier allow-listing and quoting.
//!
//! Identifiers interpolated into statements come from two places only:
//! validated metadata names and validated tenant ids. Both pass through
//! [`check`] at load time and through [`quote`] at render time.

use crate::MetadataError;

/// Longest identifier PostgreSQL keeps without truncation.
pub const MAX_LEN: usize = 63;

/// Whether `name` matches `[A-Za-z_][A-Za-z0-9_]*` and fits [`MAX_LEN`].
#[must_use]
pub fn is_valid(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_LEN
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate an identifier, returning it on success.
///
/// # Errors
///
/// [`MetadataError::InvalidIdentifier`] when the allow-list rejects it.
pub fn check(name: &str) -> Result<&str, MetadataError> {
    if is_valid(name) {
        Ok(name)
    } else {
        Err(MetadataError::InvalidIdentifier(name.to_string()))
    }
}

/// Double-quote an identifier, doubling embedded quotes.
#[must_use]
pub fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render `"schema"."table"`.
#[must_use]
pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote(schema), quote(table))
}
