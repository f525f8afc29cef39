// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Declarative lifecycle hooks.
//!
//! An entity carries a [`HookSet`] with one [`HookSlot`] per stage. A slot
//! mixes evaluator-native behavior (validations, business rules,
//! `prevent_if`) with names resolved against application-supplied
//! callbacks (actions, triggers, checks).
//!
//! | Stage | Rules read | Typical content |
//! |-------|-----------|-----------------|
//! | `pre_create` | new | validations |
//! | `post_create` | new | actions |
//! | `pre_update` | old + merged new | validations, rules |
//! | `post_update` | old + new | triggers, actions |
//! | `pre_delete` | stored row | checks, `prevent_if` |
//! | `post_delete` | stored row | actions |

use std::fmt;

use regex::Regex;
use serde::Deserialize;

use super::condition::RuleCondition;

/// Structural e-mail pattern.
pub const EMAIL_PATTERN: &str = r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$";

/// Lifecycle stage a slot is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    /// Before insert.
    PreCreate,
    /// After a committed insert.
    PostCreate,
    /// Before update.
    PreUpdate,
    /// After a committed update.
    PostUpdate,
    /// Before delete.
    PreDelete,
    /// After a committed delete.
    PostDelete
}

impl HookStage {
    /// All stages in lifecycle order.
    pub const ALL: [HookStage; 6] = [
        Self::PreCreate,
        Self::PostCreate,
        Self::PreUpdate,
        Self::PostUpdate,
        Self::PreDelete,
        Self::PostDelete
    ];

    /// Snake-case name, as used in metadata documents.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PreCreate => "pre_create",
            Self::PostCreate => "post_create",
            Self::PreUpdate => "pre_update",
            Self::PostUpdate => "post_update",
            Self::PreDelete => "pre_delete",
            Self::PostDelete => "post_delete"
        }
    }

    /// Whether the stage runs before the write.
    #[must_use]
    pub const fn is_pre(&self) -> bool {
        matches!(self, Self::PreCreate | Self::PreUpdate | Self::PreDelete)
    }
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Regular expression compiled at load time.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    /// Compile a pattern.
    ///
    /// # Errors
    ///
    /// The regex compile error.
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Regex::new(source).map(Self)
    }

    /// Whether `text` matches.
    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }

    /// Source text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

/// Validation rule kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationKind {
    /// Present, non-null and not an empty string.
    Required,
    /// At least this many characters.
    MinLength(usize),
    /// At most this many characters.
    MaxLength(usize),
    /// Structural e-mail shape.
    EmailFormat(Pattern),
    /// Caller-supplied pattern.
    Regex(Pattern),
    /// One of the listed values (by text form).
    In(Vec<String>)
}

/// Field validation declared on a slot.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawValidation")]
pub struct ValidationRule {
    /// Field checked.
    pub field:   String,
    /// Rule kind.
    pub kind:    ValidationKind,
    /// Message shown on failure; generated when absent.
    pub message: Option<String>
}

impl ValidationRule {
    /// Rule with a generated message.
    #[must_use]
    pub fn new(field: impl Into<String>, kind: ValidationKind) -> Self {
        Self {
            field: field.into(),
            kind,
            message: None
        }
    }

    /// Failure message, from metadata or generated.
    #[must_use]
    pub fn message(&self) -> String {
        if let Some(m) = &self.message
            && !m.is_empty()
        {
            return m.clone();
        }
        let field = &self.field;
        match &self.kind {
            ValidationKind::Required => format!("{field} is required"),
            ValidationKind::MinLength(n) => format!("{field} must be at least {n} characters"),
            ValidationKind::MaxLength(n) => format!("{field} must be at most {n} characters"),
            ValidationKind::EmailFormat(_) => format!("{field} must be a valid email address"),
            ValidationKind::Regex(p) => format!("{field} must match `{}`", p.as_str()),
            ValidationKind::In(values) => format!("{field} must be one of: {}", values.join(", "))
        }
    }
}

#[derive(Deserialize)]
struct RawValidation {
    field:   String,
    #[serde(alias = "type")]
    rule:    String,
    #[serde(default)]
    value:   Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>
}

impl TryFrom<RawValidation> for ValidationRule {
    type Error = String;

    fn try_from(raw: RawValidation) -> Result<Self, Self::Error> {
        let length = |value: &Option<serde_json::Value>| -> Result<usize, String> {
            let n = match value {
                Some(serde_json::Value::Number(n)) => n.as_u64(),
                Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
                _ => None
            };
            n.and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| format!("rule `{}` on `{}` needs a length", raw.rule, raw.field))
        };
        let compile = |source: &str| {
            Pattern::new(source)
                .map_err(|e| format!("invalid pattern for `{}`: {e}", raw.field))
        };

        let kind = match raw.rule.as_str() {
            "required" => ValidationKind::Required,
            "min_length" => ValidationKind::MinLength(length(&raw.value)?),
            "max_length" => ValidationKind::MaxLength(length(&raw.value)?),
            "email" | "email_format" => ValidationKind::EmailFormat(compile(EMAIL_PATTERN)?),
            "regex" | "pattern" => match &raw.value {
                Some(serde_json::Value::String(p)) => ValidationKind::Regex(compile(p)?),
                _ => return Err(format!("regex rule on `{}` needs a pattern", raw.field))
            },
            "in" | "one_of" => match &raw.value {
                Some(serde_json::Value::Array(items)) => ValidationKind::In(
                    items
                        .iter()
                        .map(|v| match v {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string()
                        })
                        .collect()
                ),
                _ => return Err(format!("in rule on `{}` needs a value list", raw.field))
            },
            other => return Err(format!("unknown validation rule `{other}`"))
        };

        Ok(Self {
            field: raw.field,
            kind,
            message: raw.message
        })
    }
}

/// What a business rule does when its condition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Abort the operation with the rule message.
    #[default]
    Reject,
    /// Log the message and continue.
    Warn
}

/// Conditional rule over old and new snapshots.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BusinessRule {
    /// Optional rule name, for logs.
    #[serde(default)]
    pub name:      Option<String>,
    /// Condition.
    pub condition: RuleCondition,
    /// Action taken when the condition holds.
    #[serde(default)]
    pub action:    RuleAction,
    /// User-visible message.
    #[serde(default)]
    pub message:   String
}

/// Callback fired when a field value changes on update.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FieldTrigger {
    /// Watched field.
    #[serde(alias = "on_field_change")]
    pub field:  String,
    /// Registered trigger name.
    pub action: String
}

/// Condition over the stored row that blocks a delete.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PreventRule {
    /// Condition; `old.` and `new.` both read the stored row.
    pub condition: RuleCondition,
    /// User-visible message.
    #[serde(default)]
    pub message:   String
}

/// Hooks attached to one stage.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HookSlot {
    /// Disabled slots are skipped entirely.
    pub enabled:     bool,
    /// Field validations.
    pub validations: Vec<ValidationRule>,
    /// Business rules.
    pub rules:       Vec<BusinessRule>,
    /// Registered action names.
    pub actions:     Vec<String>,
    /// Field-change triggers.
    pub triggers:    Vec<FieldTrigger>,
    /// Registered check names.
    pub checks:      Vec<String>,
    /// Delete-blocking conditions.
    pub prevent_if:  Vec<PreventRule>
}

impl Default for HookSlot {
    fn default() -> Self {
        Self {
            enabled:     true,
            validations: Vec::new(),
            rules:       Vec::new(),
            actions:     Vec::new(),
            triggers:    Vec::new(),
            checks:      Vec::new(),
            prevent_if:  Vec::new()
        }
    }
}

impl HookSlot {
    /// Whether the slot would do anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.validations.is_empty()
            && self.rules.is_empty()
            && self.actions.is_empty()
            && self.triggers.is_empty()
            && self.checks.is_empty()
            && self.prevent_if.is_empty()
    }

    /// Every business-rule and `prevent_if` condition in the slot.
    pub fn conditions(&self) -> impl Iterator<Item = &RuleCondition> {
        self.rules
            .iter()
            .map(|r| &r.condition)
            .chain(self.prevent_if.iter().map(|p| &p.condition))
    }
}

/// The six hook slots of an entity.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct HookSet {
    /// Before insert.
    pub pre_create:  HookSlot,
    /// After insert.
    pub post_create: HookSlot,
    /// Before update.
    pub pre_update:  HookSlot,
    /// After update.
    pub post_update: HookSlot,
    /// Before delete.
    pub pre_delete:  HookSlot,
    /// After delete.
    pub post_delete: HookSlot
}

impl HookSet {
    /// Slot for `stage`.
    #[must_use]
    pub fn slot(&self, stage: HookStage) -> &HookSlot {
        match stage {
            HookStage::PreCreate => &self.pre_create,
            HookStage::PostCreate => &self.post_create,
            HookStage::PreUpdate => &self.pre_update,
            HookStage::PostUpdate => &self.post_update,
            HookStage::PreDelete => &self.pre_delete,
            HookStage::PostDelete => &self.post_delete
        }
    }

    /// Mutable slot for `stage`.
    pub fn slot_mut(&mut self, stage: HookStage) -> &mut HookSlot {
        match stage {
            HookStage::PreCreate => &mut self.pre_create,
            HookStage::PostCreate => &mut self.post_create,
            HookStage::PreUpdate => &mut self.pre_update,
            HookStage::PostUpdate => &mut self.post_update,
            HookStage::PreDelete => &mut self.pre_delete,
            HookStage::PostDelete => &mut self.post_delete
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn validations_parse_all_kinds() {
        let slot: HookSlot = serde_json::from_value(json!({
            "validations": [
                { "field": "title", "rule": "required" },
                { "field": "title", "rule": "min_length", "value": 3 },
                { "field": "title", "rule": "max_length", "value": "80" },
                { "field": "email", "rule": "email_format" },
                { "field": "code", "rule": "regex", "value": "^[A-Z]{3}$" },
                { "field": "status", "rule": "in", "value": ["open", "closed"], "message": "bad status" }
            ]
        }))
        .unwrap();
        assert!(slot.enabled);
        assert_eq!(slot.validations.len(), 6);
        assert_eq!(slot.validations[1].kind, ValidationKind::MinLength(3));
        assert_eq!(slot.validations[2].kind, ValidationKind::MaxLength(80));
        assert_eq!(slot.validations[5].message(), "bad status");
        assert_eq!(slot.validations[0].message(), "title is required");
    }

    #[test]
    fn bad_regex_fails_at_load() {
        let result: Result<HookSlot, _> = serde_json::from_value(json!({
            "validations": [{ "field": "code", "rule": "regex", "value": "([" }]
        }));
        assert!(result.is_err());
    }

    #[test]
    fn unknown_rule_fails_at_load() {
        let result: Result<ValidationRule, _> =
            serde_json::from_value(json!({ "field": "a", "rule": "palindrome" }));
        assert!(result.is_err());
    }

    #[test]
    fn email_pattern_shape() {
        let p = Pattern::new(EMAIL_PATTERN).unwrap();
        assert!(p.is_match("a.b+c@example.co"));
        assert!(!p.is_match("not-an-email"));
        assert!(!p.is_match("a@b"));
    }

    #[test]
    fn rules_and_triggers_parse() {
        let set: HookSet = serde_json::from_value(json!({
            "pre_update": {
                "rules": [{
                    "condition": "old.status == 'closed'",
                    "action": "reject",
                    "message": "closed tickets are read-only"
                }]
            },
            "post_update": {
                "triggers": [{ "on_field_change": "status", "action": "notify_status" }],
                "actions": ["reindex"]
            },
            "pre_delete": {
                "enabled": false,
                "checks": ["no_open_children"]
            }
        }))
        .unwrap();
        assert_eq!(set.pre_update.rules[0].action, RuleAction::Reject);
        assert_eq!(set.post_update.triggers[0].field, "status");
        assert!(!set.slot(HookStage::PreDelete).enabled);
        assert!(set.slot(HookStage::PostCreate).is_empty());
    }

    #[test]
    fn stage_names() {
        assert_eq!(HookStage::PreDelete.to_string(), "pre_delete");
        assert!(HookStage::PreUpdate.is_pre());
        assert!(!HookStage::PostCreate.is_pre());
    }
}
