// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Schema definition operations.
//!
//! Every DDL statement the provisioner or migrator issues is a [`SchemaOp`].
//! Postgres runs [`SchemaOp::to_sql`]; the in-memory store interprets the
//! operation itself.
//!
//! # Implied indexes
//!
//! | Name | Columns | When |
//! |------|---------|------|
//! | `idx_<table>_tenant_id` | `tenant_id` | always |
//! | `idx_<table>_<field>` | `field` | `indexed` |
//! | `uniq_<table>_<field>_tenant` | `tenant_id, field` (unique) | `unique_per_tenant` |
//! | `<table>_<name>` | declared | declared index |
//! | `idx_<table>_not_deleted` | `tenant_id` where not deleted | soft delete |

use chrono::{SecondsFormat, Utc};
use metadal_core::{
    Value, ident,
    metadata::{
        CREATED_AT, DELETED_AT, EntityMetadata, FieldMetadata, FieldType, ID, IndexKind,
        TENANT_ID, UPDATED_AT
    }
};
use uuid::Uuid;

use super::types::{PostgresTypeMapper, SqlType, TypeMapper};

/// Column default expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnDefault {
    /// `gen_random_uuid()`.
    RandomUuid,
    /// `NOW()`.
    Now,
    /// Constant.
    Literal(Value)
}

impl ColumnDefault {
    /// SQL expression.
    #[must_use]
    pub fn to_sql(&self) -> String {
        match self {
            Self::RandomUuid => "gen_random_uuid()".to_string(),
            Self::Now => "NOW()".to_string(),
            Self::Literal(value) => literal(value)
        }
    }

    /// Value the default produces now.
    #[must_use]
    pub fn evaluate(&self) -> Value {
        match self {
            Self::RandomUuid => Value::Uuid(Uuid::new_v4()),
            Self::Now => Value::Timestamp(Utc::now()),
            Self::Literal(value) => value.clone()
        }
    }
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => quote_literal(s),
        Value::Uuid(u) => quote_literal(&u.to_string()),
        Value::Timestamp(t) => quote_literal(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        Value::Json(j) => format!("{}::JSONB", quote_literal(&j.to_string()))
    }
}

/// One column of a table definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    /// Column name.
    pub name:       String,
    /// Logical type.
    pub field_type: FieldType,
    /// Storage type and nullability.
    pub sql_type:   SqlType,
    /// Primary key.
    pub primary:    bool,
    /// Default expression.
    pub default:    Option<ColumnDefault>,
    /// Check constraint body.
    pub check:      Option<String>
}

impl ColumnDef {
    /// Column for a field.
    #[must_use]
    pub fn from_field(field: &FieldMetadata, mapper: &impl TypeMapper) -> Self {
        let default = match field.name.as_str() {
            ID if field.system => Some(ColumnDefault::RandomUuid),
            CREATED_AT | UPDATED_AT if field.system => Some(ColumnDefault::Now),
            _ => declared_default(field)
        };
        Self {
            name: field.name.clone(),
            field_type: field.field_type,
            sql_type: mapper.map_type(field),
            primary: field.primary,
            default,
            check: mapper.check_constraint(field)
        }
    }

    /// `"name" TYPE [PRIMARY KEY | NOT NULL] [DEFAULT ...] [CHECK (...)]`.
    #[must_use]
    pub fn to_sql(&self) -> String {
        let mut parts = vec![ident::quote(&self.name), self.sql_type.name.clone()];
        if self.primary {
            parts.push("PRIMARY KEY".to_string());
        } else if !self.sql_type.nullable {
            parts.push("NOT NULL".to_string());
        }
        if let Some(default) = &self.default {
            parts.push(format!("DEFAULT {}", default.to_sql()));
        }
        if let Some(check) = &self.check {
            parts.push(format!("CHECK ({check})"));
        }
        parts.join(" ")
    }

    /// Whether rows may hold NULL here.
    #[must_use]
    pub fn nullable(&self) -> bool {
        self.sql_type.nullable && !self.primary
    }
}

fn declared_default(field: &FieldMetadata) -> Option<ColumnDefault> {
    let raw = field.default.as_ref()?;
    if raw.as_str().is_some_and(|s| s.eq_ignore_ascii_case("now()")) {
        return Some(ColumnDefault::Now);
    }
    field
        .field_type
        .coerce(Value::from_json(raw.clone()))
        .ok()
        .filter(|v| !v.is_null())
        .map(ColumnDefault::Literal)
}

/// Row restriction of a partial index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFilter {
    /// `WHERE "deleted_at" IS NULL`.
    NotDeleted
}

/// One index of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    /// Index name, unique within the namespace.
    pub name:    String,
    /// Indexed columns in order.
    pub columns: Vec<String>,
    /// Unique index.
    pub unique:  bool,
    /// Access method.
    pub kind:    IndexKind,
    /// Partial index restriction.
    pub filter:  Option<IndexFilter>
}

impl IndexDef {
    fn new(name: String, columns: Vec<String>) -> Self {
        Self {
            name,
            columns,
            unique: false,
            kind: IndexKind::default(),
            filter: None
        }
    }
}

/// A DDL operation within a tenant namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaOp {
    /// `CREATE SCHEMA IF NOT EXISTS`.
    CreateSchema {
        /// Namespace.
        schema: String
    },
    /// `DROP SCHEMA IF EXISTS ... CASCADE`.
    DropSchema {
        /// Namespace.
        schema: String
    },
    /// `CREATE TABLE IF NOT EXISTS`.
    CreateTable {
        /// Namespace.
        schema:  String,
        /// Table.
        table:   String,
        /// Columns in order.
        columns: Vec<ColumnDef>
    },
    /// `DROP TABLE IF EXISTS ... CASCADE`.
    DropTable {
        /// Namespace.
        schema: String,
        /// Table.
        table:  String
    },
    /// `ADD COLUMN IF NOT EXISTS`.
    AddColumn {
        /// Namespace.
        schema: String,
        /// Table.
        table:  String,
        /// New column.
        column: ColumnDef
    },
    /// `DROP COLUMN IF EXISTS`.
    DropColumn {
        /// Namespace.
        schema: String,
        /// Table.
        table:  String,
        /// Column name.
        column: String
    },
    /// `ALTER COLUMN ... TYPE ... USING`.
    AlterColumn {
        /// Namespace.
        schema: String,
        /// Table.
        table:  String,
        /// Column with its new type.
        column: ColumnDef
    },
    /// `CREATE INDEX IF NOT EXISTS`.
    CreateIndex {
        /// Namespace.
        schema: String,
        /// Table.
        table:  String,
        /// Index.
        index:  IndexDef
    },
    /// `DROP INDEX IF EXISTS`.
    DropIndex {
        /// Namespace.
        schema: String,
        /// Index name.
        index:  String
    }
}

impl SchemaOp {
    /// Namespace the operation runs in.
    #[must_use]
    pub fn schema(&self) -> &str {
        match self {
            Self::CreateSchema {
                schema
            }
            | Self::DropSchema {
                schema
            }
            | Self::CreateTable {
                schema, ..
            }
            | Self::DropTable {
                schema, ..
            }
            | Self::AddColumn {
                schema, ..
            }
            | Self::DropColumn {
                schema, ..
            }
            | Self::AlterColumn {
                schema, ..
            }
            | Self::CreateIndex {
                schema, ..
            }
            | Self::DropIndex {
                schema, ..
            } => schema
        }
    }

    /// PostgreSQL statement.
    #[must_use]
    pub fn to_sql(&self) -> String {
        match self {
            Self::CreateSchema {
                schema
            } => format!("CREATE SCHEMA IF NOT EXISTS {}", ident::quote(schema)),
            Self::DropSchema {
                schema
            } => format!("DROP SCHEMA IF EXISTS {} CASCADE", ident::quote(schema)),
            Self::CreateTable {
                schema,
                table,
                columns
            } => {
                let columns = columns
                    .iter()
                    .map(|c| format!("    {}", c.to_sql()))
                    .collect::<Vec<_>>()
                    .join(",\n");
                format!(
                    "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
                    ident::qualified(schema, table),
                    columns
                )
            }
            Self::DropTable {
                schema,
                table
            } => format!("DROP TABLE IF EXISTS {} CASCADE", ident::qualified(schema, table)),
            Self::AddColumn {
                schema,
                table,
                column
            } => format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {}",
                ident::qualified(schema, table),
                column.to_sql()
            ),
            Self::DropColumn {
                schema,
                table,
                column
            } => format!(
                "ALTER TABLE {} DROP COLUMN IF EXISTS {}",
                ident::qualified(schema, table),
                ident::quote(column)
            ),
            Self::AlterColumn {
                schema,
                table,
                column
            } => {
                let name = ident::quote(&column.name);
                let ty = &column.sql_type.name;
                format!(
                    "ALTER TABLE {} ALTER COLUMN {name} TYPE {ty} USING {name}::{ty}",
                    ident::qualified(schema, table)
                )
            }
            Self::CreateIndex {
                schema,
                table,
                index
            } => {
                let columns = index
                    .columns
                    .iter()
                    .map(|c| ident::quote(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut sql = format!(
                    "CREATE {}INDEX IF NOT EXISTS {} ON {}{} ({})",
                    if index.unique { "UNIQUE " } else { "" },
                    ident::quote(&index.name),
                    ident::qualified(schema, table),
                    index.kind.as_sql_using(),
                    columns
                );
                if let Some(IndexFilter::NotDeleted) = index.filter {
                    sql.push_str(&format!(" WHERE {} IS NULL", ident::quote(DELETED_AT)));
                }
                sql
            }
            Self::DropIndex {
                schema,
                index
            } => format!("DROP INDEX IF EXISTS {}", ident::qualified(schema, index))
        }
    }
}

/// Column definitions of an entity, system columns first.
#[must_use]
pub fn column_defs(entity: &EntityMetadata) -> Vec<ColumnDef> {
    let mapper = PostgresTypeMapper;
    entity
        .columns()
        .iter()
        .map(|f| ColumnDef::from_field(f, &mapper))
        .collect()
}

/// Declared and implied indexes of an entity.
#[must_use]
pub fn index_defs(entity: &EntityMetadata) -> Vec<IndexDef> {
    let table = &entity.table;
    let mut indexes = vec![IndexDef::new(
        format!("idx_{table}_{TENANT_ID}"),
        vec![TENANT_ID.to_string()]
    )];
    for field in entity.columns().iter().filter(|f| !f.system) {
        if let Some(kind) = field.indexed {
            indexes.push(IndexDef {
                kind,
                ..IndexDef::new(format!("idx_{table}_{}", field.name), vec![field.name.clone()])
            });
        }
        if field.unique_per_tenant {
            indexes.push(IndexDef {
                unique: true,
                ..IndexDef::new(
                    format!("uniq_{table}_{}_tenant", field.name),
                    vec![TENANT_ID.to_string(), field.name.clone()]
                )
            });
        }
    }
    for spec in &entity.indexes {
        indexes.push(IndexDef {
            unique: spec.unique,
            kind: spec.kind,
            ..IndexDef::new(spec.storage_name(table), spec.fields.clone())
        });
    }
    if entity.soft_delete() {
        indexes.push(IndexDef {
            filter: Some(IndexFilter::NotDeleted),
            ..IndexDef::new(format!("idx_{table}_not_deleted"), vec![TENANT_ID.to_string()])
        });
    }
    indexes
}

/// Table plus indexes for an entity in `schema`.
#[must_use]
pub fn create_entity(schema: &str, entity: &EntityMetadata) -> Vec<SchemaOp> {
    let mut ops = vec![SchemaOp::CreateTable {
        schema:  schema.to_string(),
        table:   entity.table.clone(),
        columns: column_defs(entity)
    }];
    ops.extend(index_defs(entity).into_iter().map(|index| SchemaOp::CreateIndex {
        schema: schema.to_string(),
        table: entity.table.clone(),
        index
    }));
    ops
}

#[cfg(test)]
mod tests {
    use metadal_core::metadata::ServiceMetadata;
    use serde_json::json;

    use super::*;

    fn ticket() -> EntityMetadata {
        ServiceMetadata::from_json(json!({
            "service": "helpdesk",
            "entities": [{
                "name": "Ticket",
                "fields": [
                    { "name": "title", "type": "text", "required": true, "max_length": 200 },
                    { "name": "status", "type": "enum", "values": ["open", "closed"],
                      "default": "open", "indexed": true },
                    { "name": "code", "type": "text", "unique_per_tenant": true },
                    { "name": "tags", "type": "json", "indexed": "gin" },
                    { "name": "opened_at", "type": "timestamp", "default": "now()" }
                ],
                "indexes": [{ "name": "by_status_title", "fields": ["status", "title"] }],
                "policy": { "soft_delete": true, "optimistic_locking": true }
            }]
        }))
        .unwrap()
        .entity("Ticket")
        .unwrap()
        .clone()
    }

    #[test]
    fn create_table_sql() {
        let ops = create_entity("tenant_t1", &ticket());
        let sql = ops[0].to_sql();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"tenant_t1\".\"tickets\" (\n"));
        for line in [
            "\"id\" UUID PRIMARY KEY DEFAULT gen_random_uuid()",
            "\"tenant_id\" TEXT NOT NULL",
            "\"created_at\" TIMESTAMPTZ NOT NULL DEFAULT NOW()",
            "\"deleted_at\" TIMESTAMPTZ,",
            "\"version\" INTEGER NOT NULL DEFAULT 1",
            "\"title\" VARCHAR(200) NOT NULL",
            "\"status\" VARCHAR(50) DEFAULT 'open' CHECK (\"status\" IN ('open', 'closed'))",
            "\"tags\" JSONB",
            "\"opened_at\" TIMESTAMPTZ DEFAULT NOW()"
        ] {
            assert!(sql.contains(line), "missing `{line}` in\n{sql}");
        }
    }

    #[test]
    fn implied_indexes() {
        let names: Vec<_> = index_defs(&ticket()).into_iter().map(|i| i.name).collect();
        assert_eq!(
            names,
            [
                "idx_tickets_tenant_id",
                "idx_tickets_status",
                "uniq_tickets_code_tenant",
                "idx_tickets_tags",
                "tickets_by_status_title",
                "idx_tickets_not_deleted"
            ]
        );
    }

    #[test]
    fn index_sql() {
        let ops = create_entity("tenant_t1", &ticket());
        let sql: Vec<_> = ops[1..].iter().map(SchemaOp::to_sql).collect();
        assert_eq!(
            sql[2],
            "CREATE UNIQUE INDEX IF NOT EXISTS \"uniq_tickets_code_tenant\" ON \"tenant_t1\".\"tickets\" (\"tenant_id\", \"code\")"
        );
        assert_eq!(
            sql[3],
            "CREATE INDEX IF NOT EXISTS \"idx_tickets_tags\" ON \"tenant_t1\".\"tickets\" USING gin (\"tags\")"
        );
        assert!(sql[5].ends_with("(\"tenant_id\") WHERE \"deleted_at\" IS NULL"));
    }

    #[test]
    fn column_ops_sql() {
        let column = ColumnDef::from_field(
            &FieldMetadata::new("priority", FieldType::Integer),
            &PostgresTypeMapper
        );
        let alter = SchemaOp::AlterColumn {
            schema: "tenant_t1".into(),
            table: "tickets".into(),
            column: column.clone()
        };
        assert_eq!(
            alter.to_sql(),
            "ALTER TABLE \"tenant_t1\".\"tickets\" ALTER COLUMN \"priority\" TYPE INTEGER USING \"priority\"::INTEGER"
        );
        let add = SchemaOp::AddColumn {
            schema: "tenant_t1".into(),
            table: "tickets".into(),
            column
        };
        assert_eq!(
            add.to_sql(),
            "ALTER TABLE \"tenant_t1\".\"tickets\" ADD COLUMN IF NOT EXISTS \"priority\" INTEGER"
        );
        let drop = SchemaOp::DropIndex {
            schema: "tenant_t1".into(),
            index:  "idx_tickets_status".into()
        };
        assert_eq!(drop.to_sql(), "DROP INDEX IF EXISTS \"tenant_t1\".\"idx_tickets_status\"");
        assert_eq!(
            SchemaOp::DropSchema {
                schema: "tenant_t1".into()
            }
            .to_sql(),
            "DROP SCHEMA IF EXISTS \"tenant_t1\" CASCADE"
        );
    }

    #[test]
    fn literal_defaults_escape() {
        assert_eq!(ColumnDefault::Literal(Value::from("it's")).to_sql(), "'it''s'");
        assert_eq!(ColumnDefault::Literal(Value::Bool(true)).to_sql(), "TRUE");
        assert_eq!(
            ColumnDefault::Literal(Value::Json(json!({"a": 1}))).to_sql(),
            "'{\"a\":1}'::JSONB"
        );
    }
}
