// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Stage-by-stage hook evaluation.
//!
//! The evaluator holds no state beyond the shared registry. Pre stages
//! decide whether an operation may proceed; post stages report callback
//! failures after the write is already durable.

use std::sync::Arc;

use metadal_core::{
    Record,
    metadata::{EntityMetadata, HookSlot, RuleAction, ValidationKind}
};
use tracing::{debug, warn};

use super::{HookContext, HookRegistry, validate::validate};
use crate::error::{DalError, DalResult, Violation};

/// Runs the hook slots of an entity against a registry.
#[derive(Debug, Clone, Default)]
pub struct HookEvaluator {
    registry: Arc<HookRegistry>
}

impl HookEvaluator {
    /// Evaluator over `registry`.
    #[must_use]
    pub fn new(registry: Arc<HookRegistry>) -> Self {
        Self {
            registry
        }
    }

    /// Pre-create and pre-update: validations, then business rules.
    ///
    /// `new` is the proposed full row; `old` is the stored row on update.
    /// Declared required fields are checked even without an explicit
    /// validation.
    ///
    /// # Errors
    ///
    /// [`DalError::ValidationFailed`] with every violation, or
    /// [`DalError::RuleRejected`] for the first rejecting rule.
    pub fn before_write(
        &self,
        ctx: &HookContext,
        entity: &EntityMetadata,
        old: Option<&Record>,
        new: &Record
    ) -> DalResult<()> {
        let slot = entity.hooks.slot(ctx.stage);
        let mut violations = required_violations(entity, slot, new);
        if slot.enabled {
            violations.extend(slot.validations.iter().filter_map(|rule| validate(rule, new)));
        }
        if !violations.is_empty() {
            return Err(DalError::ValidationFailed {
                entity: entity.name.clone(),
                violations
            });
        }
        if slot.enabled {
            apply_rules(ctx, entity, slot, old, new)?;
        }
        Ok(())
    }

    /// Pre-delete: `prevent_if`, business rules, then registered checks.
    ///
    /// # Errors
    ///
    /// [`DalError::RuleRejected`] when a condition holds,
    /// [`DalError::ActionFailed`] when a check objects.
    pub async fn before_delete(
        &self,
        ctx: &HookContext,
        entity: &EntityMetadata,
        row: &Record
    ) -> DalResult<()> {
        let slot = entity.hooks.slot(ctx.stage);
        if !slot.enabled {
            return Ok(());
        }
        for prevent in &slot.prevent_if {
            if prevent.condition.evaluate(Some(row), row) {
                return Err(DalError::RuleRejected {
                    entity:  entity.name.clone(),
                    rule:    prevent.condition.source().to_string(),
                    message: rejection_message(&prevent.message, prevent.condition.source())
                });
            }
        }
        apply_rules(ctx, entity, slot, Some(row), row)?;
        for name in &slot.checks {
            let Some(check) = self.registry.check(name) else {
                debug!(stage = %ctx.stage, check = %name, "check not registered, skipping");
                continue;
            };
            check
                .check(ctx, row)
                .await
                .map_err(|e| action_failed(ctx, name, e.to_string()))?;
        }
        Ok(())
    }

    /// Post stages: field-change triggers (update only), then actions.
    ///
    /// # Errors
    ///
    /// [`DalError::ActionFailed`] for the first failing callback; later
    /// callbacks do not run.
    pub async fn after_write(
        &self,
        ctx: &HookContext,
        entity: &EntityMetadata,
        old: Option<&Record>,
        new: &Record
    ) -> DalResult<()> {
        let slot = entity.hooks.slot(ctx.stage);
        if !slot.enabled {
            return Ok(());
        }
        if let Some(old) = old {
            for trigger in &slot.triggers {
                if old.get(&trigger.field) == new.get(&trigger.field) {
                    continue;
                }
                let Some(callback) = self.registry.trigger(&trigger.action) else {
                    debug!(stage = %ctx.stage, trigger = %trigger.action, "trigger not registered, skipping");
                    continue;
                };
                debug!(field = %trigger.field, trigger = %trigger.action, "field changed");
                callback
                    .fire(ctx, old, new)
                    .await
                    .map_err(|e| action_failed(ctx, &trigger.action, e.to_string()))?;
            }
        }
        for name in &slot.actions {
            let Some(action) = self.registry.action(name) else {
                debug!(stage = %ctx.stage, action = %name, "action not registered, skipping");
                continue;
            };
            action
                .run(ctx, new)
                .await
                .map_err(|e| action_failed(ctx, name, e.to_string()))?;
        }
        Ok(())
    }
}

fn required_violations(entity: &EntityMetadata, slot: &HookSlot, new: &Record) -> Vec<Violation> {
    entity
        .fields
        .iter()
        .filter(|f| f.required && !f.system)
        .filter(|f| {
            !slot.validations.iter().any(|v| {
                slot.enabled && v.field == f.name && v.kind == ValidationKind::Required
            })
        })
        .filter(|f| new.get_or_null(&f.name).is_null())
        .map(|f| Violation {
            field:   f.name.clone(),
            rule:    "required",
            message: format!("{} is required", f.name)
        })
        .collect()
}

fn apply_rules(
    ctx: &HookContext,
    entity: &EntityMetadata,
    slot: &HookSlot,
    old: Option<&Record>,
    new: &Record
) -> DalResult<()> {
    for rule in &slot.rules {
        if !rule.condition.evaluate(old, new) {
            continue;
        }
        let source = rule.condition.source();
        match rule.action {
            RuleAction::Reject => {
                return Err(DalError::RuleRejected {
                    entity:  entity.name.clone(),
                    rule:    source.to_string(),
                    message: rejection_message(&rule.message, source)
                });
            }
            RuleAction::Warn => warn!(
                stage = %ctx.stage,
                entity = %entity.name,
                rule = rule.name.as_deref().unwrap_or(source),
                "{}",
                rejection_message(&rule.message, source)
            )
        }
    }
    Ok(())
}

fn rejection_message(message: &str, condition: &str) -> String {
    if message.is_empty() {
        format!("rule `{condition}` rejected the operation")
    } else {
        message.to_string()
    }
}

fn action_failed(ctx: &HookContext, name: &str, message: String) -> DalError {
    DalError::ActionFailed {
        entity: ctx.entity.clone(),
        stage: ctx.stage,
        name: name.to_string(),
        message
    }
}
