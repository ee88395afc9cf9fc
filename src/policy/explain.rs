//! Human-readable rendering of decision traces.
//!
//! Rendering is a pure function of the request and the trace. It describes
//! the evaluated decision, never the dry-run override, so a staged policy
//! explains exactly what it would have done.

use std::collections::BTreeSet;

use crate::policy::trace::{DecisionTrace, PolicyTrace, RuleTrace};
use crate::policy::{Effect, Request};

/// Renders the audit narrative for one evaluation.
pub fn render_explanation(request: &Request, trace: &DecisionTrace) -> String {
    let decision = &trace.evaluated;
    let mut lines = header(request, decision.effect);
    lines.push(String::new());

    let unlocking = unlocking_tag_sets(&trace.policies);
    if trace.default_applied && request.resource.tags.is_empty() && !unlocking.is_empty() {
        lines.push("No policy matched this request; the default effect applied.".to_string());
        lines.push(
            "The resource carries no tags. These tag sets would select a policy:".to_string(),
        );
        for (tags, names) in unlocking {
            lines.push(format!("  - [{}]: {}", join(&tags), names.join(", ")));
        }
    } else {
        if trace.default_applied {
            lines.push("No policy matched this request; the default effect applied.".to_string());
        }
        if trace.policies.is_empty() {
            lines.push("No policies evaluated.".to_string());
        } else {
            lines.push("Policies evaluated:".to_string());
            for policy in &trace.policies {
                render_policy(&mut lines, policy);
            }
        }
    }

    lines.push(String::new());
    lines.push(footer(decision.effect, &decision.message, decision.approval_quorum));
    lines.join("\n")
}

fn header(request: &Request, effect: Effect) -> Vec<String> {
    let resource = &request.resource;
    let mut target = resource.resource_type.clone();
    if !resource.name.is_empty() {
        target = format!("{target}/{}", resource.name);
    }
    if !resource.namespace.is_empty() {
        target = format!("{target} (namespace {})", resource.namespace);
    }
    if !resource.tags.is_empty() {
        target = format!("{target} [tags: {}]", join(&resource.tags));
    }
    vec![
        format!("Resource: {target}"),
        format!("Action: {}", request.action),
        format!("Decision: {}", effect.label()),
    ]
}

fn render_policy(lines: &mut Vec<String>, policy: &PolicyTrace) {
    let title = format!("  - {} (priority {})", policy.name, policy.priority);
    match policy.skip_reason {
        Some(reason) => lines.push(format!("{title}: skipped, {reason}")),
        None => {
            lines.push(format!("{title}: matched"));
            for rule in &policy.rules {
                render_rule(lines, rule);
            }
            if policy.winning_rule().is_none() {
                lines.push("      no rule applied, continuing".to_string());
            }
        }
    }
}

fn render_rule(lines: &mut Vec<String>, rule: &RuleTrace) {
    let title = format!("      rule {} [{}] -> {}", rule.index, rule.actions, rule.effect);
    match rule.skip_reason {
        Some(reason) if rule.detail.is_empty() => lines.push(format!("{title}: skipped, {reason}")),
        Some(reason) => lines.push(format!("{title}: skipped, {reason} ({})", rule.detail)),
        None => {
            lines.push(format!("{title}: MATCHED"));
            for condition in &rule.conditions {
                let mark = if condition.passed { "✓" } else { "✗" };
                lines.push(format!(
                    "        {mark} {}: {}",
                    condition.name, condition.detail
                ));
            }
        }
    }
}

fn footer(effect: Effect, message: &str, quorum: u32) -> String {
    match effect {
        Effect::Deny if message.is_empty() => "Denied: no further action possible.".to_string(),
        Effect::Deny => format!("Denied: {message}"),
        Effect::RequireApproval => format!(
            "Approval required ({} approval(s)). Check the pending approvals list and retry once approved.",
            quorum.max(1)
        ),
        Effect::Allow => "Allowed: the request is permitted.".to_string(),
    }
}

/// Distinct tag sets from resource-mismatched policies, with the policies
/// each would select, in first-seen order.
fn unlocking_tag_sets(policies: &[PolicyTrace]) -> Vec<(BTreeSet<String>, Vec<String>)> {
    let mut sets: Vec<(BTreeSet<String>, Vec<String>)> = Vec::new();
    for policy in policies {
        for tags in &policy.unlocking_tags {
            match sets.iter_mut().find(|(existing, _)| existing == tags) {
                Some((_, names)) => {
                    if !names.contains(&policy.name) {
                        names.push(policy.name.clone());
                    }
                }
                None => sets.push((tags.clone(), vec![policy.name.clone()])),
            }
        }
    }
    sets
}

fn join(tags: &BTreeSet<String>) -> String {
    tags.iter().cloned().collect::<Vec<_>>().join(", ")
}
