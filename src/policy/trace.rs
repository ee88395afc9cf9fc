//! Evaluation trace: policy → rule → condition.
//!
//! Each level is a small value assembled bottom-up during one evaluation
//! pass and never mutated afterwards. Traces can also be built directly,
//! which is how the explanation renderer is tested.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ApprovalRequiredError, DeniedError, GateError};
use crate::policy::config::{Policy, Rule};
use crate::policy::{ActionSet, Decision, Effect};

/// Why a policy or rule was passed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Policy is switched off
    Disabled,
    /// None of the policy's principals matched
    PrincipalMismatch,
    /// None of the policy's resource specs matched
    ResourceMismatch,
    /// Rule does not cover the requested action
    ActionMismatch,
    /// Rule's schedule is not active at the evaluation time
    ScheduleInactive,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Disabled => "disabled",
            SkipReason::PrincipalMismatch => "principal_mismatch",
            SkipReason::ResourceMismatch => "resource_mismatch",
            SkipReason::ActionMismatch => "action_mismatch",
            SkipReason::ScheduleInactive => "schedule_inactive",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One condition checked on the winning rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionTrace {
    /// Condition key, e.g. `max_rows_affected`
    pub name: String,
    /// Whether the condition let the rule's effect stand
    pub passed: bool,
    /// One-line human detail
    pub detail: String,
}

impl ConditionTrace {
    pub fn new(name: impl Into<String>, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed,
            detail: detail.into(),
        }
    }
}

/// One rule considered inside a matched policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTrace {
    /// Position inside the policy
    pub index: usize,
    /// Actions the rule covers
    pub actions: ActionSet,
    /// Raw effect declared by the rule
    pub effect: Effect,
    /// `true` for the winning rule
    pub matched: bool,
    /// Set when the rule was skipped
    pub skip_reason: Option<SkipReason>,
    /// Context for the skip, e.g. the schedule window
    #[serde(default)]
    pub detail: String,
    /// Conditions applied, winning rule only
    #[serde(default)]
    pub conditions: Vec<ConditionTrace>,
}

impl RuleTrace {
    pub fn skipped(
        index: usize,
        rule: &Rule,
        reason: SkipReason,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            index,
            actions: rule.actions,
            effect: rule.effect,
            matched: false,
            skip_reason: Some(reason),
            detail: detail.into(),
            conditions: Vec::new(),
        }
    }

    pub fn matched(index: usize, rule: &Rule, conditions: Vec<ConditionTrace>) -> Self {
        Self {
            index,
            actions: rule.actions,
            effect: rule.effect,
            matched: true,
            skip_reason: None,
            detail: String::new(),
            conditions,
        }
    }
}

/// One policy considered during evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTrace {
    /// Policy name
    pub name: String,
    /// Policy priority
    pub priority: i64,
    /// `true` when principal and resource filters selected the policy
    pub matched: bool,
    /// Set when the policy was skipped before its rules were considered
    pub skip_reason: Option<SkipReason>,
    /// Index of the resource spec that selected the policy
    #[serde(default)]
    pub resource_index: Option<usize>,
    /// On resource mismatch: tag sets that would have selected the policy
    #[serde(default)]
    pub unlocking_tags: Vec<BTreeSet<String>>,
    /// Rules considered, in file order
    #[serde(default)]
    pub rules: Vec<RuleTrace>,
}

impl PolicyTrace {
    pub fn skipped(policy: &Policy, reason: SkipReason) -> Self {
        Self {
            name: policy.name.clone(),
            priority: policy.priority,
            matched: false,
            skip_reason: Some(reason),
            resource_index: None,
            unlocking_tags: Vec::new(),
            rules: Vec::new(),
        }
    }

    pub fn resource_mismatch(policy: &Policy, unlocking_tags: Vec<BTreeSet<String>>) -> Self {
        Self {
            unlocking_tags,
            ..Self::skipped(policy, SkipReason::ResourceMismatch)
        }
    }

    pub fn matched(policy: &Policy, resource_index: usize, rules: Vec<RuleTrace>) -> Self {
        Self {
            name: policy.name.clone(),
            priority: policy.priority,
            matched: true,
            skip_reason: None,
            resource_index: Some(resource_index),
            unlocking_tags: Vec::new(),
            rules,
        }
    }

    /// The winning rule, if this policy produced the decision.
    pub fn winning_rule(&self) -> Option<&RuleTrace> {
        self.rules.iter().find(|r| r.matched)
    }
}

/// Complete audit record of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionTrace {
    /// Decision returned to the caller, after any dry-run override
    pub decision: Decision,

    /// Decision the rules produced, before any dry-run override
    pub evaluated: Decision,

    /// Policies considered, in evaluation order, up to the winner
    pub policies: Vec<PolicyTrace>,

    /// No policy produced a decision
    pub default_applied: bool,

    /// Engine ran in dry-run mode
    pub dry_run: bool,

    /// Effective evaluation time
    pub timestamp: DateTime<Utc>,

    /// Rule file version
    pub config_version: String,

    /// Rule file digest
    pub config_digest: String,

    /// Rendered explanation of the evaluated decision
    pub explanation: String,
}

impl DecisionTrace {
    /// `true` if the dry-run override changed the outcome.
    pub fn overridden(&self) -> bool {
        self.decision.effect != self.evaluated.effect
    }

    /// Gate result with the rendered explanation attached to denials.
    pub fn must_allow(&self) -> Result<(), GateError> {
        match self.decision.effect {
            Effect::Allow => Ok(()),
            Effect::RequireApproval => {
                Err(ApprovalRequiredError::new(self.decision.clone()).into())
            }
            Effect::Deny => Err(DeniedError::new(self.decision.clone())
                .with_explanation(self.explanation.clone())
                .into()),
        }
    }
}
