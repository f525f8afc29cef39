// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Lifecycle hooks.
//!
//! Metadata declares hooks by name; application code supplies the behavior
//! through a [`HookRegistry`] built before the engine starts.
//!
//! | Declared as | Trait | Runs in | Failure |
//! |-------------|-------|---------|---------|
//! | `actions` | [`Action`] | post-create, post-update, post-delete | `ActionFailed` |
//! | `triggers` | [`Trigger`] | post-update, when the field changed | `ActionFailed` |
//! | `checks` | [`Check`] | pre-delete | `ActionFailed`, row untouched |
//!
//! A declared name with no registration is a no-op, so metadata may declare
//! intent before the implementation exists.
//!
//! # Usage
//!
//! ```rust
//! use metadal_engine::hooks::{HookError, HookRegistry};
//!
//! let mut registry = HookRegistry::new();
//! registry
//!     .register_action_fn("notify_assignee", |ctx, ticket| {
//!         tracing::info!(tenant = %ctx.tenant, id = ?ticket.id(), "notify");
//!         Ok(())
//!     })
//!     .register_check_fn("no_open_children", |_, _| Err(HookError::new("has children")));
//! assert!(registry.check("no_open_children").is_some());
//! ```

mod evaluator;
mod validate;

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
pub use evaluator::HookEvaluator;
use metadal_core::{Record, TenantId, metadata::HookStage};
pub use validate::{rule_name, validate};

pub use crate::error::HookError;

/// What a callback knows about the operation invoking it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookContext {
    /// Tenant the operation runs in.
    pub tenant: TenantId,
    /// Entity name.
    pub entity: String,
    /// Stage being run.
    pub stage:  HookStage,
    /// Acting user, when the caller supplied one.
    pub actor:  Option<String>
}

impl HookContext {
    /// Context for `entity` in `tenant` at `stage`.
    #[must_use]
    pub fn new(tenant: TenantId, entity: impl Into<String>, stage: HookStage) -> Self {
        Self {
            tenant,
            entity: entity.into(),
            stage,
            actor: None
        }
    }

    /// Set the actor.
    #[must_use]
    pub fn with_actor(mut self, actor: Option<String>) -> Self {
        self.actor = actor;
        self
    }

    /// Same context at another stage.
    #[must_use]
    pub fn at(&self, stage: HookStage) -> Self {
        Self {
            stage,
            ..self.clone()
        }
    }
}

/// Post-operation callback over the stored row.
#[async_trait]
pub trait Action: Send + Sync {
    /// Run after the write is durable.
    async fn run(&self, ctx: &HookContext, record: &Record) -> Result<(), HookError>;
}

/// Field-change callback over the old and new rows.
#[async_trait]
pub trait Trigger: Send + Sync {
    /// Fire after an update changed the watched field.
    async fn fire(&self, ctx: &HookContext, old: &Record, new: &Record) -> Result<(), HookError>;
}

/// Pre-delete veto over the row about to be deleted.
#[async_trait]
pub trait Check: Send + Sync {
    /// Return an error to block the delete.
    async fn check(&self, ctx: &HookContext, record: &Record) -> Result<(), HookError>;
}

struct FnAction<F>(F);

#[async_trait]
impl<F> Action for FnAction<F>
where
    F: Fn(&HookContext, &Record) -> Result<(), HookError> + Send + Sync
{
    async fn run(&self, ctx: &HookContext, record: &Record) -> Result<(), HookError> {
        (self.0)(ctx, record)
    }
}

struct FnTrigger<F>(F);

#[async_trait]
impl<F> Trigger for FnTrigger<F>
where
    F: Fn(&HookContext, &Record, &Record) -> Result<(), HookError> + Send + Sync
{
    async fn fire(&self, ctx: &HookContext, old: &Record, new: &Record) -> Result<(), HookError> {
        (self.0)(ctx, old, new)
    }
}

struct FnCheck<F>(F);

#[async_trait]
impl<F> Check for FnCheck<F>
where
    F: Fn(&HookContext, &Record) -> Result<(), HookError> + Send + Sync
{
    async fn check(&self, ctx: &HookContext, record: &Record) -> Result<(), HookError> {
        (self.0)(ctx, record)
    }
}

/// Named callbacks, populated at startup and read-only afterwards.
#[derive(Default, Clone)]
pub struct HookRegistry {
    actions:  HashMap<String, Arc<dyn Action>>,
    triggers: HashMap<String, Arc<dyn Trigger>>,
    checks:   HashMap<String, Arc<dyn Check>>
}

impl HookRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action, replacing any previous one with the same name.
    pub fn register_action(
        &mut self,
        name: impl Into<String>,
        action: impl Action + 'static
    ) -> &mut Self {
        self.actions.insert(name.into(), Arc::new(action));
        self
    }

    /// Register a synchronous closure as an action.
    pub fn register_action_fn<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&HookContext, &Record) -> Result<(), HookError> + Send + Sync + 'static
    {
        self.register_action(name, FnAction(f))
    }

    /// Register a trigger.
    pub fn register_trigger(
        &mut self,
        name: impl Into<String>,
        trigger: impl Trigger + 'static
    ) -> &mut Self {
        self.triggers.insert(name.into(), Arc::new(trigger));
        self
    }

    /// Register a synchronous closure as a trigger.
    pub fn register_trigger_fn<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&HookContext, &Record, &Record) -> Result<(), HookError> + Send + Sync + 'static
    {
        self.register_trigger(name, FnTrigger(f))
    }

    /// Register a check.
    pub fn register_check(
        &mut self,
        name: impl Into<String>,
        check: impl Check + 'static
    ) -> &mut Self {
        self.checks.insert(name.into(), Arc::new(check));
        self
    }

    /// Register a synchronous closure as a check.
    pub fn register_check_fn<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&HookContext, &Record) -> Result<(), HookError> + Send + Sync + 'static
    {
        self.register_check(name, FnCheck(f))
    }

    /// Action by name.
    #[must_use]
    pub fn action(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    /// Trigger by name.
    #[must_use]
    pub fn trigger(&self, name: &str) -> Option<Arc<dyn Trigger>> {
        self.triggers.get(name).cloned()
    }

    /// Check by name.
    #[must_use]
    pub fn check(&self, name: &str) -> Option<Arc<dyn Check>> {
        self.checks.get(name).cloned()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("actions", &sorted_names(&self.actions))
            .field("triggers", &sorted_names(&self.triggers))
            .field("checks", &sorted_names(&self.checks))
            .finish()
    }
}

fn sorted_names<V>(map: &HashMap<String, V>) -> Vec<&str> {
    let mut names: Vec<&str> = map.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn ctx() -> HookContext {
        HookContext::new(TenantId::new("t1").unwrap(), "Ticket", HookStage::PostCreate)
    }

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl Action for Counter {
        async fn run(&self, _: &HookContext, _: &Record) -> Result<(), HookError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn registered_action_runs() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = HookRegistry::new();
        registry.register_action("count", Counter(hits.clone()));
        let action = registry.action("count").unwrap();
        action.run(&ctx(), &Record::new()).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(registry.action("missing").is_none());
    }

    #[tokio::test]
    async fn closure_adapters() {
        let mut registry = HookRegistry::new();
        registry
            .register_trigger_fn("t", |_, old, new| {
                if old == new { Err("unchanged".into()) } else { Ok(()) }
            })
            .register_check_fn("c", |ctx, _| {
                if ctx.stage == HookStage::PreDelete { Err("blocked".into()) } else { Ok(()) }
            });
        let trigger = registry.trigger("t").unwrap();
        let a = Record::new().with("s", "a");
        let b = Record::new().with("s", "b");
        assert!(trigger.fire(&ctx(), &a, &b).await.is_ok());
        assert_eq!(
            trigger.fire(&ctx(), &a, &a).await,
            Err(HookError::new("unchanged"))
        );
        let check = registry.check("c").unwrap();
        assert!(check.check(&ctx().at(HookStage::PreDelete), &a).await.is_err());
        assert!(check.check(&ctx(), &a).await.is_ok());
    }

    #[test]
    fn debug_lists_names() {
        let mut registry = HookRegistry::new();
        registry
            .register_action_fn("b", |_, _| Ok(()))
            .register_action_fn("a", |_, _| Ok(()));
        let text = format!("{registry:?}");
        assert!(text.contains("actions: [\"a\", \"b\"]"), "{text}");
    }
}
