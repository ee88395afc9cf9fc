//! Validated, immutable rule set.
//!
//! These types are only produced by [`crate::policy::loader`], after every
//! structural invariant has been checked. Nothing here can be mutated once
//! a [`Config`] exists.

use std::collections::BTreeSet;

use crate::policy::schedule::Schedule;
use crate::policy::{ActionSet, Effect};

/// Full rule set, with policies already sorted for evaluation.
#[derive(Debug, Clone)]
pub struct Config {
    version: String,
    policies: Vec<Policy>,
    digest: String,
}

impl Config {
    pub(crate) fn new(version: String, policies: Vec<Policy>, digest: String) -> Self {
        Self {
            version,
            policies,
            digest,
        }
    }

    /// Rule file format version (`"1"` when the file omits it).
    pub fn version(&self) -> &str {
        &self.version
    }

    /// SHA-256 hex digest of the expanded rule file text.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Policies in evaluation order: priority descending, file order on ties.
    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    /// Looks up a policy by name.
    pub fn policy(&self, name: &str) -> Option<&Policy> {
        self.policies.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// One named group of rules.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Unique name
    pub name: String,

    /// Free-text description
    pub description: String,

    /// Disabled policies are skipped during evaluation
    pub enabled: bool,

    /// Higher priorities are evaluated first
    pub priority: i64,

    /// Who the policy targets. Empty means everyone.
    pub principals: Vec<PrincipalSpec>,

    /// What the policy targets. Never empty.
    pub resources: Vec<ResourceSpec>,

    /// Rules in file order. Never empty.
    pub rules: Vec<Rule>,
}

/// Principal filter of a policy.
///
/// A spec matches when any of its populated fields matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrincipalSpec {
    /// Exact user id
    #[serde(default)]
    pub user: Option<String>,

    /// Role the principal must hold
    #[serde(default)]
    pub role: Option<String>,

    /// Exact service account name
    #[serde(default)]
    pub service: Option<String>,

    /// Matches every principal
    #[serde(default)]
    pub any: bool,
}

/// Resource filter of a policy.
#[derive(Debug, Clone)]
pub struct ResourceSpec {
    /// Required resource type
    pub resource_type: String,

    /// Exact resource name
    pub name: Option<String>,

    /// Glob over the resource name, compiled at load time
    pub name_pattern: Option<glob::Pattern>,

    /// Tags the resource must all carry
    pub tags: BTreeSet<String>,

    /// Required namespace
    pub namespace: Option<String>,
}

/// One action-to-effect mapping.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Actions the rule applies to. Never empty.
    pub actions: ActionSet,

    /// Raw effect before conditions are applied
    pub effect: Effect,

    /// Optional constraints
    pub conditions: Option<Conditions>,

    /// Message reported with the decision
    pub message: String,
}

impl Rule {
    /// Schedule gate of the rule, if it has one.
    pub fn schedule(&self) -> Option<&Schedule> {
        self.conditions.as_ref().and_then(|c| c.schedule.as_ref())
    }
}

/// Constraints that modify a rule's raw effect.
#[derive(Debug, Clone, Default)]
pub struct Conditions {
    /// Upgrade `allow` to `require_approval`
    pub require_approval: bool,

    /// Approvals needed, defaults to 1 when approval is required
    pub approval_quorum: Option<u32>,

    /// Deny when more rows are affected
    pub max_rows_affected: Option<u64>,

    /// Deny when more pods are affected
    pub max_pods_affected: Option<u64>,

    /// Time window in which the rule is active
    pub schedule: Option<Schedule>,
}

impl Conditions {
    /// Approval quorum in effect when approval is required.
    pub fn quorum(&self) -> u32 {
        self.approval_quorum.unwrap_or(1).max(1)
    }
}
