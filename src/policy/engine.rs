//! Policy evaluation.
//!
//! # Algorithm
//!
//! Policies are walked in priority order. The first policy whose principal
//! and resource filters match, and which has a rule covering the action with
//! an active schedule, decides the request. No lower-priority policy is
//! consulted after that. The winning rule's conditions are applied in a fixed
//! order:
//!
//! 1. `require_approval` marks the decision and upgrades `allow`
//! 2. blast-radius ceilings force `deny` when exceeded, overriding step 1
//!
//! When nothing matches, the engine's default effect applies. In dry-run mode
//! a non-allow outcome is returned as `allow` with a `[DRY RUN]` prefix,
//! while the trace and explanation keep the real reasoning.
//!
//! The engine is immutable after construction and safe to share across
//! threads without locking.

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{Level, event};

use crate::policy::config::{Config, Policy, Rule};
use crate::policy::explain::render_explanation;
use crate::policy::loader;
use crate::policy::principal::{ResourceMatch, match_resources, principals_match};
use crate::policy::trace::{ConditionTrace, DecisionTrace, PolicyTrace, RuleTrace, SkipReason};
use crate::policy::{DEFAULT_POLICY_NAME, Decision, Effect, PolicyError, Request};

/// Message of the synthesized default decision.
pub const NO_MATCH_MESSAGE: &str = "No matching policy found";

/// Prefix added to messages whose effect was overridden by dry run.
pub const DRY_RUN_PREFIX: &str = "[DRY RUN] ";

/// Construction-time engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Effect used when no policy matches
    pub default_effect: Effect,
    /// Resolve every request to `allow` while tracing the real outcome
    pub dry_run: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            default_effect: Effect::Deny,
            dry_run: false,
        }
    }
}

/// Immutable policy decision engine.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    config: Config,
    options: EngineOptions,
}

impl PolicyEngine {
    /// Creates an engine over an already validated rule set.
    pub fn new(config: Config, options: EngineOptions) -> Self {
        Self { config, options }
    }

    /// Loads and validates a rule file, then creates an engine over it.
    pub fn from_file(path: impl AsRef<Path>, options: EngineOptions) -> Result<Self, PolicyError> {
        Ok(Self::new(loader::load_file(path)?, options))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// Evaluates a request. Always yields exactly one decision.
    pub fn evaluate(&self, request: &Request) -> Decision {
        self.explain(request).decision
    }

    /// Evaluates a request and returns the full trace with its explanation.
    pub fn explain(&self, request: &Request) -> DecisionTrace {
        let timestamp = request.context.timestamp.unwrap_or_else(Utc::now);

        let mut policies = Vec::new();
        let mut outcome = None;
        for policy in self.config.policies() {
            let (trace, decision) = evaluate_policy(policy, request, timestamp);
            policies.push(trace);
            if decision.is_some() {
                outcome = decision;
                break;
            }
        }

        let default_applied = outcome.is_none();
        let evaluated = outcome.unwrap_or_else(|| {
            let needs_approval = self.options.default_effect == Effect::RequireApproval;
            Decision {
                effect: self.options.default_effect,
                policy_name: DEFAULT_POLICY_NAME.to_string(),
                rule_index: None,
                message: NO_MATCH_MESSAGE.to_string(),
                conditions: Vec::new(),
                requires_approval: needs_approval,
                approval_quorum: u32::from(needs_approval),
            }
        });

        let mut decision = evaluated.clone();
        if self.options.dry_run && decision.effect != Effect::Allow {
            decision.message = format!("{DRY_RUN_PREFIX}{}", decision.message);
            decision.effect = Effect::Allow;
        }

        let trace = DecisionTrace {
            decision,
            evaluated,
            policies,
            default_applied,
            dry_run: self.options.dry_run,
            timestamp,
            config_version: self.config.version().to_string(),
            config_digest: self.config.digest().to_string(),
            explanation: String::new(),
        };
        let explanation = render_explanation(request, &trace);
        let trace = DecisionTrace {
            explanation,
            ..trace
        };

        log_decision(request, &trace);
        trace
    }
}

fn evaluate_policy(
    policy: &Policy,
    request: &Request,
    timestamp: DateTime<Utc>,
) -> (PolicyTrace, Option<Decision>) {
    if !policy.enabled {
        return (PolicyTrace::skipped(policy, SkipReason::Disabled), None);
    }
    if !principals_match(&policy.principals, &request.principal) {
        return (
            PolicyTrace::skipped(policy, SkipReason::PrincipalMismatch),
            None,
        );
    }
    let resource_index = match match_resources(&policy.resources, &request.resource) {
        ResourceMatch::Matched(index) => index,
        ResourceMatch::Mismatch(unlocking) => {
            return (PolicyTrace::resource_mismatch(policy, unlocking), None);
        }
    };

    let mut rules = Vec::with_capacity(policy.rules.len());
    for (index, rule) in policy.rules.iter().enumerate() {
        if !rule.actions.contains(request.action) {
            rules.push(RuleTrace::skipped(
                index,
                rule,
                SkipReason::ActionMismatch,
                format!("covers {}", rule.actions),
            ));
            continue;
        }
        if let Some(schedule) = rule.schedule() {
            if !schedule.is_active(timestamp) {
                rules.push(RuleTrace::skipped(
                    index,
                    rule,
                    SkipReason::ScheduleInactive,
                    schedule.describe(timestamp),
                ));
                continue;
            }
        }

        let (decision, conditions) = apply_rule(policy, index, rule, request, timestamp);
        rules.push(RuleTrace::matched(index, rule, conditions));
        return (
            PolicyTrace::matched(policy, resource_index, rules),
            Some(decision),
        );
    }

    (PolicyTrace::matched(policy, resource_index, rules), None)
}

/// Builds the decision of a winning rule and applies its conditions.
fn apply_rule(
    policy: &Policy,
    index: usize,
    rule: &Rule,
    request: &Request,
    timestamp: DateTime<Utc>,
) -> (Decision, Vec<ConditionTrace>) {
    let declares_approval = rule.effect == Effect::RequireApproval;
    let mut decision = Decision {
        effect: rule.effect,
        policy_name: policy.name.clone(),
        rule_index: Some(index),
        message: rule.message.clone(),
        conditions: Vec::new(),
        requires_approval: declares_approval,
        approval_quorum: u32::from(declares_approval),
    };
    let mut traces = Vec::new();

    let Some(conditions) = &rule.conditions else {
        return (decision, traces);
    };

    if let Some(schedule) = &conditions.schedule {
        traces.push(ConditionTrace::new(
            "schedule",
            true,
            schedule.describe(timestamp),
        ));
    }

    if conditions.require_approval {
        let quorum = conditions.quorum();
        decision.requires_approval = true;
        decision.approval_quorum = quorum;
        let detail = if decision.effect == Effect::Allow {
            decision.effect = Effect::RequireApproval;
            format!("{quorum} approval(s) required, allow upgraded to require_approval")
        } else {
            format!("{quorum} approval(s) required")
        };
        decision
            .conditions
            .push(format!("require_approval: quorum {quorum}"));
        traces.push(ConditionTrace::new("require_approval", true, detail));
    }

    // Blast radius runs last and always wins over the approval upgrade.
    let ctx = &request.context;
    let ceilings = [
        ("max_rows_affected", "rows", conditions.max_rows_affected, ctx.rows_affected),
        ("max_pods_affected", "pods", conditions.max_pods_affected, ctx.pods_affected),
    ];
    let mut breaches = Vec::new();
    for (name, unit, limit, actual) in ceilings {
        let Some(limit) = limit else { continue };
        let detail = format!("{actual} {unit} affected, limit is {limit}");
        let passed = actual <= limit;
        if !passed {
            decision
                .conditions
                .push(format!("{name}: {actual} {unit} affected exceeds limit of {limit}"));
            breaches.push(detail.clone());
        }
        traces.push(ConditionTrace::new(name, passed, detail));
    }
    if !breaches.is_empty() {
        decision.effect = Effect::Deny;
        decision.message = format!("Blast radius exceeded: {}", breaches.join("; "));
    }

    (decision, traces)
}

macro_rules! decision_event {
    ($level:expr, $request:ident, $trace:ident) => {
        event!(
            $level,
            policy = %$trace.evaluated.policy_name,
            rule = ?$trace.evaluated.rule_index,
            effect = %$trace.evaluated.effect,
            action = %$request.action,
            resource_type = %$request.resource.resource_type,
            resource_name = %$request.resource.name,
            trace_id = %$request.context.trace_id,
            dry_run = $trace.dry_run,
            default_applied = $trace.default_applied,
            reason = %$trace.evaluated.message,
            "Policy decision"
        )
    };
}

/// One structured line per evaluation, leveled by the real effect so that
/// dry-run denials stay visible.
fn log_decision(request: &Request, trace: &DecisionTrace) {
    match trace.evaluated.effect {
        Effect::Deny => decision_event!(Level::WARN, request, trace),
        Effect::RequireApproval => decision_event!(Level::INFO, request, trace),
        Effect::Allow => decision_event!(Level::DEBUG, request, trace),
    }
}
