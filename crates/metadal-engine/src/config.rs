// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Engine configuration.
//!
//! ```json
//! {
//!   "service": "helpdesk",
//!   "schema_prefix": "tenant_",
//!   "default_limit": 100,
//!   "max_limit": 1000,
//!   "statement_timeout_ms": 5000,
//!   "database": { "url": "postgres://localhost/helpdesk", "max_connections": 10 }
//! }
//! ```
//!
//! Environment overrides (see [`DalConfig::apply_env`]):
//!
//! | Variable | Key |
//! |----------|-----|
//! | `DATABASE_URL` | `database.url` |
//! | `DAL_SERVICE` | `service` |
//! | `DAL_STATEMENT_TIMEOUT_MS` | `statement_timeout_ms` |

use std::{path::Path, time::Duration};

use metadal_core::ident;
use serde::Deserialize;

use crate::error::ConfigError;

/// Connection settings for the Postgres store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL.
    pub url:                String,
    /// Pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections:    u32,
    /// Pool acquire timeout in milliseconds.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout_ms() -> u64 {
    3000
}

impl DatabaseConfig {
    /// Settings for `url` with default pool sizing.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url:                url.into(),
            max_connections:    default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms()
        }
    }

    /// Acquire timeout as a duration.
    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DalConfig {
    /// Service name, first segment of event subjects.
    pub service:              String,
    /// Tenant namespace prefix.
    pub schema_prefix:        String,
    /// Page size when a query gives none.
    pub default_limit:        u64,
    /// Upper bound on any page size.
    pub max_limit:            u64,
    /// Per-statement timeout unless the request scope sets one.
    pub statement_timeout_ms: Option<u64>,
    /// Postgres connection, when used.
    pub database:             Option<DatabaseConfig>
}

impl Default for DalConfig {
    fn default() -> Self {
        Self {
            service:              "default".to_string(),
            schema_prefix:        "tenant_".to_string(),
            default_limit:        100,
            max_limit:            1000,
            statement_timeout_ms: None,
            database:             None
        }
    }
}

impl DalConfig {
    /// Defaults with the given service name.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Self::default()
        }
    }

    /// Parse and validate JSON text.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] or the first validation error.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] when unreadable, otherwise see [`Self::from_json_str`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path:    path.display().to_string(),
            message: e.to_string()
        })?;
        Self::from_json_str(&text)
    }

    /// Override keys from the process environment, then re-validate.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for unparsable overrides.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Override keys from an arbitrary lookup.
    ///
    /// # Errors
    ///
    /// See [`Self::apply_env`].
    pub fn apply_vars<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>
    {
        if let Some(url) = lookup("DATABASE_URL") {
            match self.database.as_mut() {
                Some(db) => db.url = url,
                None => self.database = Some(DatabaseConfig::new(url))
            }
        }
        if let Some(service) = lookup("DAL_SERVICE") {
            self.service = service;
        }
        if let Some(raw) = lookup("DAL_STATEMENT_TIMEOUT_MS") {
            let ms = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key:     "statement_timeout_ms",
                message: format!("`{raw}` is not a number of milliseconds")
            })?;
            self.statement_timeout_ms = Some(ms);
        }
        self.validate()?;
        Ok(self)
    }

    /// Check ranges and identifiers.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key:     "service",
                message: "must not be empty".into()
            });
        }
        if !ident::is_valid(&self.schema_prefix) {
            return Err(ConfigError::Invalid {
                key:     "schema_prefix",
                message: format!("`{}` is not a valid identifier", self.schema_prefix)
            });
        }
        if self.default_limit == 0 || self.default_limit > self.max_limit {
            return Err(ConfigError::Invalid {
                key:     "default_limit",
                message: format!(
                    "must be between 1 and max_limit ({}), got {}",
                    self.max_limit, self.default_limit
                )
            });
        }
        if self.statement_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid {
                key:     "statement_timeout_ms",
                message: "must be positive".into()
            });
        }
        Ok(())
    }

    /// Statement timeout as a duration.
    #[must_use]
    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_ms.map(Duration::from_millis)
    }
}
