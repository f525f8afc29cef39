// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Tenant identity.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{MetadataError, ident};

/// Longest accepted tenant id, leaving room for the namespace prefix.
pub const MAX_TENANT_LEN: usize = 48;

/// Validated tenant identifier.
///
/// Only ASCII letters, digits and `_` are accepted, so the id can be embedded
/// in a namespace name and compared as a plain text value.
///
/// # Example
///
/// ```rust
/// use metadal_core::TenantId;
///
/// let t = TenantId::new("acme_01").unwrap();
/// assert_eq!(t.namespace("tenant_"), "tenant_acme_01");
/// assert!(TenantId::new("acme; drop").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Validate and wrap a tenant id.
    ///
    /// # Errors
    ///
    /// [`MetadataError::InvalidTenant`] for empty, overlong or non
    /// alphanumeric input.
    pub fn new(id: impl Into<String>) -> Result<Self, MetadataError> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= MAX_TENANT_LEN
            && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            Ok(Self(id))
        } else {
            Err(MetadataError::InvalidTenant(id))
        }
    }

    /// Raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespace (schema) name for this tenant.
    #[must_use]
    pub fn namespace(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.0)
    }

    /// Recover a tenant from a namespace name carrying `prefix`.
    ///
    /// Returns `None` when the name does not start with the prefix or the
    /// remainder is not a valid tenant id.
    #[must_use]
    pub fn from_namespace(namespace: &str, prefix: &str) -> Option<Self> {
        if !ident::is_valid(namespace) {
            return None;
        }
        namespace
            .strip_prefix(prefix)
            .and_then(|rest| Self::new(rest).ok())
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = MetadataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for TenantId {
    type Error = MetadataError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_alphanumeric() {
        assert!(TenantId::new("t1").is_ok());
        assert!(TenantId::new("Acme_Corp_2").is_ok());
    }

    #[test]
    fn rejects_unsafe() {
        assert!(TenantId::new("").is_err());
        assert!(TenantId::new("a-b").is_err());
        assert!(TenantId::new("t1\"; --").is_err());
        assert!(TenantId::new("x".repeat(MAX_TENANT_LEN + 1)).is_err());
    }

    #[test]
    fn namespace_round_trip() {
        let t = TenantId::new("t1").unwrap();
        let ns = t.namespace("tenant_");
        assert_eq!(ns, "tenant_t1");
        assert_eq!(TenantId::from_namespace(&ns, "tenant_"), Some(t));
        assert_eq!(TenantId::from_namespace("public", "tenant_"), None);
    }

    #[test]
    fn serde_validates() {
        let ok: TenantId = serde_json::from_str("\"t2\"").unwrap();
        assert_eq!(ok.as_str(), "t2");
        assert!(serde_json::from_str::<TenantId>("\"t 2\"").is_err());
    }
}
