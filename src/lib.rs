//! Helpdesk Gate - policy decision engine for AI-ops helpdesk agents.
//!
//! Helpdesk agents turn natural-language requests into `psql` and `kubectl`
//! tool calls. Before a call runs, the enforcer asks this crate whether the
//! caller may perform that action class on that resource, and again after
//! it runs with the measured blast radius.
//!
//! # Decisions
//!
//! - **Allow**: run the call.
//! - **RequireApproval**: wait for a human approval workflow.
//! - **Deny**: refuse the call.
//!
//! Every decision comes with a trace and a rendered explanation for the
//! audit log.
//!
//! ```no_run
//! use helpdesk_gate::policy::{EngineOptions, PolicyEngine, Request};
//!
//! # fn run(request: Request) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = PolicyEngine::from_file("policies.yaml", EngineOptions::default())?;
//! let trace = engine.explain(&request);
//! trace.must_allow()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod policy;

pub use error::{ApprovalRequiredError, DeniedError, GateError};
pub use policy::{Decision, DecisionTrace, Effect, PolicyEngine, Request};
