// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Metadata diff.
//!
//! Entities are matched by name, columns by name and logical type, indexes
//! by name. Renames are not inferred: a renamed field is one drop plus one
//! add.
//!
//! Order of the produced list:
//!
//! 1. new tables, in declaration order
//! 2. per surviving entity: drop indexes, drop columns, add columns, alter
//!    columns, create indexes
//! 3. dropped tables

use std::{collections::HashSet, fmt};

use metadal_core::metadata::{EntityMetadata, FieldType, ServiceMetadata};

use super::ddl::{ColumnDef, IndexDef, SchemaOp, column_defs, index_defs};

/// Kind of a [`Migration`], as recorded in the history table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationKind {
    /// New entity table with its indexes.
    CreateTable,
    /// Entity removed.
    DropTable,
    /// Field or system column added.
    AddColumn,
    /// Field or system column removed.
    DropColumn,
    /// Logical type changed.
    AlterColumn,
    /// Index added.
    CreateIndex,
    /// Index removed.
    DropIndex
}

impl MigrationKind {
    /// Kebab-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CreateTable => "create-table",
            Self::DropTable => "drop-table",
            Self::AddColumn => "add-column",
            Self::DropColumn => "drop-column",
            Self::AlterColumn => "alter-column",
            Self::CreateIndex => "create-index",
            Self::DropIndex => "drop-index"
        }
    }
}

impl fmt::Display for MigrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural change carried by a migration.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Create the table and every index of the entity.
    CreateTable {
        /// Columns.
        columns: Vec<ColumnDef>,
        /// Indexes.
        indexes: Vec<IndexDef>
    },
    /// Drop the table.
    DropTable,
    /// Add a column.
    AddColumn(ColumnDef),
    /// Drop a column.
    DropColumn(String),
    /// Change a column type.
    AlterColumn {
        /// Column with the new type.
        column: ColumnDef,
        /// Previous logical type.
        from:   FieldType
    },
    /// Create an index.
    CreateIndex(IndexDef),
    /// Drop an index.
    DropIndex(String)
}

/// One schema change, independent of the tenant it is applied to.
#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    /// Entity affected.
    pub entity: String,
    /// Table affected.
    pub table:  String,
    /// What changes.
    pub change: Change
}

impl Migration {
    /// Kind of the change.
    #[must_use]
    pub const fn kind(&self) -> MigrationKind {
        match self.change {
            Change::CreateTable { .. } => MigrationKind::CreateTable,
            Change::DropTable => MigrationKind::DropTable,
            Change::AddColumn(_) => MigrationKind::AddColumn,
            Change::DropColumn(_) => MigrationKind::DropColumn,
            Change::AlterColumn { .. } => MigrationKind::AlterColumn,
            Change::CreateIndex(_) => MigrationKind::CreateIndex,
            Change::DropIndex(_) => MigrationKind::DropIndex
        }
    }

    /// Column or index name, or the table for table-level changes.
    #[must_use]
    pub fn target(&self) -> &str {
        match &self.change {
            Change::CreateTable { .. } | Change::DropTable => &self.table,
            Change::AddColumn(c) => &c.name,
            Change::AlterColumn {
                column, ..
            } => &column.name,
            Change::DropColumn(name) | Change::DropIndex(name) => name,
            Change::CreateIndex(index) => &index.name
        }
    }

    /// Operations realizing the change in `schema`.
    #[must_use]
    pub fn ops(&self, schema: &str) -> Vec<SchemaOp> {
        let schema = schema.to_string();
        let table = self.table.clone();
        match &self.change {
            Change::CreateTable {
                columns,
                indexes
            } => {
                let mut ops = vec![SchemaOp::CreateTable {
                    schema:  schema.clone(),
                    table:   table.clone(),
                    columns: columns.clone()
                }];
                ops.extend(indexes.iter().map(|index| SchemaOp::CreateIndex {
                    schema: schema.clone(),
                    table:  table.clone(),
                    index:  index.clone()
                }));
                ops
            }
            Change::DropTable => vec![SchemaOp::DropTable {
                schema,
                table
            }],
            Change::AddColumn(column) => vec![SchemaOp::AddColumn {
                schema,
                table,
                column: column.clone()
            }],
            Change::DropColumn(column) => vec![SchemaOp::DropColumn {
                schema,
                table,
                column: column.clone()
            }],
            Change::AlterColumn {
                column, ..
            } => vec![SchemaOp::AlterColumn {
                schema,
                table,
                column: column.clone()
            }],
            Change::CreateIndex(index) => vec![SchemaOp::CreateIndex {
                schema,
                table,
                index: index.clone()
            }],
            Change::DropIndex(index) => vec![SchemaOp::DropIndex {
                schema,
                index: index.clone()
            }]
        }
    }
}

impl fmt::Display for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.change {
            Change::AlterColumn {
                column,
                from
            } => write!(
                f,
                "{} {}.{} ({} -> {})",
                self.kind(),
                self.table,
                column.name,
                from.as_str(),
                column.field_type.as_str()
            ),
            Change::CreateTable { .. } | Change::DropTable => {
                write!(f, "{} {}", self.kind(), self.table)
            }
            _ => write!(f, "{} {}.{}", self.kind(), self.table, self.target())
        }
    }
}

/// Changes turning `old` into `new`.
#[must_use]
pub fn diff(old: &ServiceMetadata, new: &ServiceMetadata) -> Vec<Migration> {
    diff_entities(old.entities(), new.entities())
}

/// Migrations creating every entity from scratch.
#[must_use]
pub fn plan_create(entities: &[EntityMetadata]) -> Vec<Migration> {
    diff_entities(&[], entities)
}

/// [`diff`] over entity lists.
#[must_use]
pub fn diff_entities(old: &[EntityMetadata], new: &[EntityMetadata]) -> Vec<Migration> {
    let find = |list: &'_ [EntityMetadata], name: &str| -> Option<usize> {
        list.iter().position(|e| e.name == name)
    };
    let mut created = Vec::new();
    let mut changed = Vec::new();
    let mut dropped = Vec::new();

    for entity in new {
        match find(old, &entity.name).map(|i| &old[i]) {
            Some(before) if before.table == entity.table => changed.extend(diff_entity(before, entity)),
            Some(before) => {
                dropped.push(migration(before, Change::DropTable));
                created.push(create(entity));
            }
            None => created.push(create(entity))
        }
    }
    for entity in old {
        if find(new, &entity.name).is_none() {
            dropped.push(migration(entity, Change::DropTable));
        }
    }

    created.into_iter().chain(changed).chain(dropped).collect()
}

fn migration(entity: &EntityMetadata, change: Change) -> Migration {
    Migration {
        entity: entity.name.clone(),
        table: entity.table.clone(),
        change
    }
}

fn create(entity: &EntityMetadata) -> Migration {
    migration(
        entity,
        Change::CreateTable {
            columns: column_defs(entity),
            indexes: index_defs(entity)
        }
    )
}

fn diff_entity(old: &EntityMetadata, new: &EntityMetadata) -> Vec<Migration> {
    let old_columns = column_defs(old);
    let new_columns = column_defs(new);
    let old_indexes = index_defs(old);
    let new_indexes = index_defs(new);

    let old_index_names: HashSet<&str> = old_indexes.iter().map(|i| i.name.as_str()).collect();
    let new_index_names: HashSet<&str> = new_indexes.iter().map(|i| i.name.as_str()).collect();
    let column = |list: &'_ [ColumnDef], name: &str| list.iter().find(|c| c.name == name).cloned();

    let mut out = Vec::new();
    for index in &old_indexes {
        if !new_index_names.contains(index.name.as_str()) {
            out.push(migration(new, Change::DropIndex(index.name.clone())));
        }
    }
    for c in &old_columns {
        if column(&new_columns, &c.name).is_none() {
            out.push(migration(new, Change::DropColumn(c.name.clone())));
        }
    }
    for c in &new_columns {
        if column(&old_columns, &c.name).is_none() {
            out.push(migration(new, Change::AddColumn(c.clone())));
        }
    }
    for c in &new_columns {
        if let Some(before) = column(&old_columns, &c.name)
            && before.field_type != c.field_type
        {
            out.push(migration(
                new,
                Change::AlterColumn {
                    column: c.clone(),
                    from:   before.field_type
                }
            ));
        }
    }
    for index in &new_indexes {
        if !old_index_names.contains(index.name.as_str()) {
            out.push(migration(new, Change::CreateIndex(index.clone())));
        }
    }
    out
}
