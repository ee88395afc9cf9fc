//! Gate errors raised when a decision does not allow a tool call.
//!
//! Enforcers call [`Decision::must_allow`](crate::policy::Decision::must_allow)
//! (or [`DecisionTrace::must_allow`](crate::policy::DecisionTrace::must_allow))
//! around a tool invocation and branch on the result:
//!
//! - [`DeniedError`] is terminal. Retrying the same request cannot succeed.
//! - [`ApprovalRequiredError`] is actionable. The caller may open an approval
//!   request and evaluate again once it is resolved.
//!
//! Both are plain immutable values and can cross task and thread boundaries.

use std::fmt;

use thiserror::Error;

use crate::policy::Decision;

/// The request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeniedError {
    /// Decision that refused the request
    pub decision: Decision,
    /// Rendered explanation, when the caller had a trace
    pub explanation: Option<String>,
}

impl DeniedError {
    pub fn new(decision: Decision) -> Self {
        Self {
            decision,
            explanation: None,
        }
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }
}

impl fmt::Display for DeniedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.explanation.as_deref() {
            Some(explanation) if !explanation.is_empty() => f.write_str(explanation),
            _ => f.write_str(describe(&self.decision)),
        }
    }
}

impl std::error::Error for DeniedError {}

/// The request may proceed only after human approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequiredError {
    /// Decision that asked for approval
    pub decision: Decision,
}

impl ApprovalRequiredError {
    pub fn new(decision: Decision) -> Self {
        Self { decision }
    }

    /// Number of approvals the workflow must collect.
    pub fn quorum(&self) -> u32 {
        self.decision.approval_quorum.max(1)
    }
}

impl fmt::Display for ApprovalRequiredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(describe(&self.decision))
    }
}

impl std::error::Error for ApprovalRequiredError {}

fn describe(decision: &Decision) -> &str {
    if decision.message.is_empty() {
        &decision.policy_name
    } else {
        &decision.message
    }
}

/// Result of gating a decision.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    /// Terminal refusal
    #[error(transparent)]
    Denied(#[from] DeniedError),

    /// Approval workflow required
    #[error(transparent)]
    ApprovalRequired(#[from] ApprovalRequiredError),
}

impl GateError {
    pub fn is_denied(&self) -> bool {
        matches!(self, GateError::Denied(_))
    }

    pub fn is_approval_required(&self) -> bool {
        matches!(self, GateError::ApprovalRequired(_))
    }

    /// Decision behind the error.
    pub fn decision(&self) -> &Decision {
        match self {
            GateError::Denied(e) => &e.decision,
            GateError::ApprovalRequired(e) => &e.decision,
        }
    }
}

/// Returns `true` if `err`, or any error in its source chain, is a denial.
pub fn is_denied(err: &(dyn std::error::Error + 'static)) -> bool {
    find_in_chain(err, |e| {
        e.is::<DeniedError>() || e.downcast_ref::<GateError>().is_some_and(GateError::is_denied)
    })
}

/// Returns `true` if `err`, or any error in its source chain, asks for approval.
pub fn is_approval_required(err: &(dyn std::error::Error + 'static)) -> bool {
    find_in_chain(err, |e| {
        e.is::<ApprovalRequiredError>()
            || e.downcast_ref::<GateError>()
                .is_some_and(GateError::is_approval_required)
    })
}

fn find_in_chain<F>(err: &(dyn std::error::Error + 'static), predicate: F) -> bool
where
    F: Fn(&(dyn std::error::Error + 'static)) -> bool,
{
    let mut current = Some(err);
    while let Some(e) = current {
        if predicate(e) {
            return true;
        }
        current = e.source();
    }
    false
}
