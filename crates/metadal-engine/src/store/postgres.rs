// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! PostgreSQL store over `sqlx::PgPool`.
//!
//! Arguments are bound as their canonical text and cast in SQL
//! (`$1::UUID`), so a single bind path covers every logical type including
//! NULL. Rows decode by column type name.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use metadal_core::{Record, Value};
use sqlx::{
    Column, PgPool, Postgres, Row, TypeInfo,
    postgres::{PgArguments, PgPoolOptions, PgRow},
    query::Query
};
use uuid::Uuid;

use super::{Store, StoreError};
use crate::{config::DatabaseConfig, query::Statement, schema::SchemaOp};

/// Store backed by a Postgres connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool
}

impl PgStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self {
            pool
        }
    }

    /// Open a pool from configuration.
    ///
    /// # Errors
    ///
    /// [`StoreError::Connection`] when the database is unreachable.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await
            .map_err(map_error)?;
        Ok(Self::new(pool))
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn bind(statement: &Statement) -> Query<'_, Postgres, PgArguments> {
    statement
        .args
        .iter()
        .fold(sqlx::query(&statement.sql), |query, arg| query.bind(arg.to_text()))
}

fn decode_err(err: sqlx::Error) -> StoreError {
    StoreError::Decode(err.to_string())
}

fn decode_value(row: &PgRow, index: usize, type_name: &str) -> Result<Value, StoreError> {
    let value = match type_name {
        "UUID" => row.try_get::<Option<Uuid>, _>(index).map(Value::from),
        "BOOL" => row.try_get::<Option<bool>, _>(index).map(Value::from),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .map(|v| Value::from(v.map(i64::from))),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)
            .map(|v| Value::from(v.map(i64::from))),
        "INT8" => row.try_get::<Option<i64>, _>(index).map(Value::from),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)
            .map(|v| Value::from(v.map(f64::from))),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index).map(Value::from),
        "TIMESTAMPTZ" => row.try_get::<Option<DateTime<Utc>>, _>(index).map(Value::from),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)
            .map(|v| Value::from(v.map(|t| t.and_utc()))),
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(index)
            .map(|v| v.map_or(Value::Null, Value::Json)),
        _ => row.try_get::<Option<String>, _>(index).map(Value::from)
    };
    value.map_err(decode_err)
}

fn decode_row(row: &PgRow) -> Result<Record, StoreError> {
    let mut record = Record::new();
    for column in row.columns() {
        let value = decode_value(row, column.ordinal(), column.type_info().name())?;
        record.insert(column.name(), value);
    }
    Ok(record)
}

fn map_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => {
            let message = db.message().to_string();
            match db.code().as_deref() {
                Some("23505") => {
                    StoreError::UniqueViolation(db.constraint().unwrap_or_default().to_string())
                }
                Some("23502" | "23514") => StoreError::Constraint(message),
                Some("3F000" | "42P01" | "42703" | "42704") => StoreError::MissingObject(message),
                _ => StoreError::Query(message)
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            StoreError::Connection(err.to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Decode(err.to_string())
        }
        _ => StoreError::Query(err.to_string())
    }
}

/// Escape `LIKE` metacharacters so `prefix` matches literally.
fn escape_like(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

#[async_trait]
impl Store for PgStore {
    async fn fetch_all(&self, statement: &Statement) -> Result<Vec<Record>, StoreError> {
        let rows = bind(statement)
            .fetch_all(&self.pool)
            .await
            .map_err(map_error)?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&self, statement: &Statement) -> Result<u64, StoreError> {
        let result = bind(statement)
            .execute(&self.pool)
            .await
            .map_err(map_error)?;
        Ok(result.rows_affected())
    }

    async fn apply_schema(&self, op: &SchemaOp) -> Result<(), StoreError> {
        let sql = op.to_sql();
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn list_namespaces(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT schema_name::TEXT AS schema_name FROM information_schema.schemata \
             WHERE schema_name LIKE $1 ORDER BY schema_name"
        )
        .bind(escape_like(prefix))
        .fetch_all(&self.pool)
        .await
        .map_err(map_error)?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("schema_name").map_err(decode_err))
            .collect()
    }
}
