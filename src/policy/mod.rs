//! Policy decision engine for helpdesk agent tool calls.
//!
//! Every `psql`/`kubectl` invocation an agent wants to make is described as a
//! [`Request`] and evaluated against a declarative rule set. The engine returns
//! one of three effects:
//!
//! - **Allow**: run the tool call
//! - **RequireApproval**: park the call until a human approves it
//! - **Deny**: refuse the call
//!
//! Evaluation is a pure, synchronous function of the request and the loaded
//! [`config::Config`]. The full reasoning is captured in a
//! [`trace::DecisionTrace`] and rendered by [`explain::render_explanation`].

pub mod config;
pub mod engine;
pub mod explain;
pub mod loader;
pub mod principal;
pub mod schedule;
pub mod store;
pub mod trace;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use config::Config;
pub use engine::{EngineOptions, PolicyEngine};
pub use trace::DecisionTrace;

// ═══════════════════════════════════════════════════════════════════════════
// Effects and actions
// ═══════════════════════════════════════════════════════════════════════════

/// Outcome of a rule, and of a whole evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    /// The tool call may proceed.
    Allow,
    /// The tool call is refused. Fail closed: this is the default.
    #[default]
    Deny,
    /// The tool call may proceed once a human approves it.
    RequireApproval,
}

impl Effect {
    /// Token used in rule files and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
            Effect::RequireApproval => "require_approval",
        }
    }

    /// Upper-case label used in rendered explanations.
    pub fn label(&self) -> &'static str {
        match self {
            Effect::Allow => "ALLOWED",
            Effect::Deny => "DENIED",
            Effect::RequireApproval => "REQUIRES APPROVAL",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Effect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Effect::Allow),
            "deny" => Ok(Effect::Deny),
            "require_approval" => Ok(Effect::RequireApproval),
            other => Err(format!(
                "unknown effect '{other}' (expected allow, deny or require_approval)"
            )),
        }
    }
}

/// Coarse class of the operation an agent wants to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Queries and `get`/`describe` style calls.
    Read,
    /// Mutations that can be rolled forward or back.
    Write,
    /// Deletes, drops, scale-to-zero and other irreversible changes.
    Destructive,
}

impl Action {
    /// All actions, in bit order.
    pub const ALL: [Action; 3] = [Action::Read, Action::Write, Action::Destructive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Destructive => "destructive",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Action::Read => 0b001,
            Action::Write => 0b010,
            Action::Destructive => 0b100,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Action::Read),
            "write" => Ok(Action::Write),
            "destructive" => Ok(Action::Destructive),
            other => Err(format!(
                "unknown action '{other}' (expected read, write or destructive)"
            )),
        }
    }
}

/// Set of actions a rule applies to.
///
/// Rule files accept either a single action or a list; both are normalized
/// into this bit set by the loader, so matching never sees the file shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ActionSet(u8);

impl ActionSet {
    pub const EMPTY: ActionSet = ActionSet(0);

    pub fn single(action: Action) -> Self {
        ActionSet(action.bit())
    }

    pub fn insert(&mut self, action: Action) {
        self.0 |= action.bit();
    }

    pub fn contains(&self, action: Action) -> bool {
        self.0 & action.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Members in a stable order (read, write, destructive).
    pub fn iter(&self) -> impl Iterator<Item = Action> + '_ {
        Action::ALL.into_iter().filter(|a| self.contains(*a))
    }
}

impl FromIterator<Action> for ActionSet {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        let mut set = ActionSet::EMPTY;
        for action in iter {
            set.insert(action);
        }
        set
    }
}

impl fmt::Display for ActionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|a| a.as_str()).collect();
        f.write_str(&names.join(", "))
    }
}

impl Serialize for ActionSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for ActionSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let actions = Vec::<Action>::deserialize(deserializer)?;
        Ok(actions.into_iter().collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Evaluation request
// ═══════════════════════════════════════════════════════════════════════════

/// One evaluation input, assembled by the enforcer around a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Who is asking
    #[serde(default)]
    pub principal: Principal,

    /// What is being acted on
    pub resource: Resource,

    /// Requested action class
    pub action: Action,

    /// Situational data (time, blast radius counters)
    #[serde(default)]
    pub context: RequestContext,
}

/// Identity making the request. Authentication happens upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Human user id, empty for service accounts
    #[serde(default)]
    pub user_id: String,

    /// Assigned roles
    #[serde(default)]
    pub roles: Vec<String>,

    /// Service account name, empty for humans
    #[serde(default)]
    pub service: String,
}

/// Target of the request, with its live tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource kind, e.g. `database` or `kubernetes`
    #[serde(rename = "type")]
    pub resource_type: String,

    /// Resource name, e.g. `orders-db`
    #[serde(default)]
    pub name: String,

    /// Tags currently carried by the resource
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Kubernetes namespace, if any
    #[serde(default)]
    pub namespace: String,

    /// Free-form extras passed through to audit records
    #[serde(default)]
    pub extras: BTreeMap<String, serde_json::Value>,
}

/// Situational data for an evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Evaluation time. `None` means "now".
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    /// Correlation id propagated into logs
    #[serde(default)]
    pub trace_id: String,

    /// Rows the operation affects (measured or estimated)
    #[serde(default)]
    pub rows_affected: u64,

    /// Pods the operation affects (measured or estimated)
    #[serde(default)]
    pub pods_affected: u64,
}

// ═══════════════════════════════════════════════════════════════════════════
// Decision
// ═══════════════════════════════════════════════════════════════════════════

/// Name reported when no policy matched.
pub const DEFAULT_POLICY_NAME: &str = "default";

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Final effect
    pub effect: Effect,

    /// Policy that produced the decision, or `"default"`
    pub policy_name: String,

    /// Index of the winning rule inside its policy
    pub rule_index: Option<usize>,

    /// Human message from the rule or the condition that fired
    pub message: String,

    /// Summaries of conditions that shaped the effect
    #[serde(default)]
    pub conditions: Vec<String>,

    /// Whether an approval workflow is required
    #[serde(default)]
    pub requires_approval: bool,

    /// Number of approvals required when `requires_approval` is set
    #[serde(default)]
    pub approval_quorum: u32,
}

impl Decision {
    /// Returns `true` if the request may proceed.
    pub fn is_allowed(&self) -> bool {
        self.effect == Effect::Allow
    }

    /// Returns `true` if the request is refused.
    pub fn is_denied(&self) -> bool {
        self.effect == Effect::Deny
    }

    /// Returns `true` if the request must wait for approval.
    pub fn needs_approval(&self) -> bool {
        self.effect == Effect::RequireApproval
    }

    /// Converts the decision into a gate result for enforcers.
    ///
    /// Denials carry no rendered explanation here; use
    /// [`DecisionTrace::must_allow`] to attach one.
    pub fn must_allow(&self) -> Result<(), crate::error::GateError> {
        match self.effect {
            Effect::Allow => Ok(()),
            Effect::RequireApproval => {
                Err(crate::error::ApprovalRequiredError::new(self.clone()).into())
            }
            Effect::Deny => Err(crate::error::DeniedError::new(self.clone()).into()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Load errors
// ═══════════════════════════════════════════════════════════════════════════

/// Where in a rule file a validation problem was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLocation {
    /// Position of the policy in file order
    pub policy_index: usize,
    /// Policy name, possibly empty
    pub policy_name: String,
    /// Position of the rule inside the policy, if the problem is rule-level
    pub rule_index: Option<usize>,
}

impl fmt::Display for ConfigLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "policies[{}]", self.policy_index)?;
        if !self.policy_name.is_empty() {
            write!(f, " ({})", self.policy_name)?;
        }
        if let Some(rule) = self.rule_index {
            write!(f, ", rules[{rule}]")?;
        }
        Ok(())
    }
}

/// Rule set loading errors. Loading is all-or-nothing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// Policy file could not be read
    #[error("Failed to read policy file {path}: {details}")]
    Read {
        /// Path that was read
        path: String,
        /// I/O error details
        details: String,
    },

    /// Rule file is not well-formed
    #[error("Policy parse error: {details}")]
    Parse {
        /// Parser error details
        details: String,
    },

    /// Two policies share a name
    #[error(
        "policies[{index}]: duplicate policy name '{name}' (first defined at policies[{first_index}])"
    )]
    DuplicateName {
        /// Position of the second occurrence
        index: usize,
        /// The duplicated name
        name: String,
        /// Position of the first occurrence
        first_index: usize,
    },

    /// A policy or rule violates a structural invariant
    #[error("{at}: {details}")]
    Invalid {
        /// Offending policy and rule
        at: ConfigLocation,
        /// What is wrong
        details: String,
    },
}
