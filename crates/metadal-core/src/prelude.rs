// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Prelude module for convenient imports.
//!
//! ```rust
//! use metadal_core::prelude::*;
//! ```

pub use crate::{
    EventKind, MetadataError, Operation, Pagination, Record, SortDirection, TenantId, Value,
    metadata::{
        EntityMetadata, FieldMetadata, FieldType, HookSet, HookSlot, HookStage, IndexKind,
        IndexSpec, LockPolicy, RelationKind, RelationSpec, ServiceMetadata
    }
};
