//! `helpdesk-policy`: validate rule files and evaluate requests offline.
//!
//! Exit codes for `eval`: 0 allowed, 2 denied, 3 approval required.
//! Any load or input error exits with 1.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use thiserror::Error;

use helpdesk_gate::config::{EngineSettings, LogSettings};
use helpdesk_gate::policy::{
    Action, DecisionTrace, PolicyEngine, PolicyError, Principal, Request, RequestContext, Resource,
    loader,
};
use helpdesk_gate::{GateError, logging};

const EXIT_ALLOWED: u8 = 0;
const EXIT_ERROR: u8 = 1;
const EXIT_DENIED: u8 = 2;
const EXIT_APPROVAL_REQUIRED: u8 = 3;

#[derive(Debug, Parser)]
#[command(name = "helpdesk-policy", version, about = "Helpdesk policy decision engine")]
struct Cli {
    #[command(flatten)]
    log: LogSettings,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate a rule file and list policies in evaluation order
    Check {
        /// Rule file to validate
        file: PathBuf,
    },

    /// Evaluate one request and print the explanation
    Eval(EvalArgs),
}

#[derive(Debug, Args)]
struct EvalArgs {
    #[command(flatten)]
    engine: EngineSettings,

    /// Read the whole request from a JSON file instead of flags
    #[arg(long)]
    request: Option<PathBuf>,

    /// Resource type, e.g. database or kubernetes
    #[arg(long, required_unless_present = "request")]
    resource_type: Option<String>,

    /// Resource name
    #[arg(long, default_value = "")]
    resource_name: String,

    /// Resource tag (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Kubernetes namespace
    #[arg(long, default_value = "")]
    namespace: String,

    /// Action class: read, write or destructive
    #[arg(long, required_unless_present = "request")]
    action: Option<Action>,

    /// Requesting user id
    #[arg(long, default_value = "")]
    user: String,

    /// Role held by the requester (repeatable)
    #[arg(long = "role")]
    roles: Vec<String>,

    /// Requesting service account
    #[arg(long, default_value = "")]
    service: String,

    /// Rows affected by the operation
    #[arg(long, default_value_t = 0)]
    rows: u64,

    /// Pods affected by the operation
    #[arg(long, default_value_t = 0)]
    pods: u64,

    /// Evaluation time (RFC 3339, any UTC offset), defaults to now
    #[arg(long)]
    at: Option<String>,

    /// Correlation id, defaults to a fresh UUID
    #[arg(long)]
    trace_id: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Rendered explanation
    Text,
    /// Full decision trace as JSON
    Json,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("Failed to read request {path}: {details}")]
    Request { path: String, details: String },

    #[error("Invalid --at timestamp '{value}': {details}")]
    Timestamp { value: String, details: String },

    #[error("Missing required argument --{0}")]
    Missing(&'static str),

    #[error("Failed to encode trace: {0}")]
    Json(#[from] serde_json::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log.log_format);

    let code = match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "helpdesk-policy failed");
            eprintln!("error: {e}");
            EXIT_ERROR
        }
    };
    ExitCode::from(code)
}

fn run(command: Command) -> Result<u8, CliError> {
    match command {
        Command::Check { file } => check(&file),
        Command::Eval(args) => eval(args),
    }
}

fn check(file: &Path) -> Result<u8, CliError> {
    let config = loader::load_file(file)?;
    println!(
        "{}: version {}, {} policies, digest {}",
        file.display(),
        config.version(),
        config.len(),
        config.digest()
    );
    for policy in config.policies() {
        let state = if policy.enabled { "" } else { " [disabled]" };
        println!(
            "  {:>6}  {}{}  ({} rules)",
            policy.priority,
            policy.name,
            state,
            policy.rules.len()
        );
    }
    Ok(EXIT_ALLOWED)
}

fn eval(args: EvalArgs) -> Result<u8, CliError> {
    let engine = PolicyEngine::from_file(&args.engine.policy_file, args.engine.options())?;
    let request = build_request(&args)?;

    let trace = engine.explain(&request);
    match args.format {
        OutputFormat::Text => println!("{}", trace.explanation),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&trace)?),
    }

    Ok(exit_status(&trace))
}

fn exit_status(trace: &DecisionTrace) -> u8 {
    match trace.must_allow() {
        Ok(()) => EXIT_ALLOWED,
        Err(GateError::Denied(_)) => EXIT_DENIED,
        Err(GateError::ApprovalRequired(_)) => EXIT_APPROVAL_REQUIRED,
    }
}

fn build_request(args: &EvalArgs) -> Result<Request, CliError> {
    let mut request = match &args.request {
        Some(path) => read_request(path)?,
        None => Request {
            principal: Principal {
                user_id: args.user.clone(),
                roles: args.roles.clone(),
                service: args.service.clone(),
            },
            resource: Resource {
                resource_type: args
                    .resource_type
                    .clone()
                    .ok_or(CliError::Missing("resource-type"))?,
                name: args.resource_name.clone(),
                tags: args.tags.iter().cloned().collect(),
                namespace: args.namespace.clone(),
                extras: Default::default(),
            },
            action: args.action.ok_or(CliError::Missing("action"))?,
            context: RequestContext {
                timestamp: None,
                trace_id: String::new(),
                rows_affected: args.rows,
                pods_affected: args.pods,
            },
        },
    };

    if let Some(at) = &args.at {
        request.context.timestamp = Some(parse_timestamp(at)?);
    }
    if let Some(trace_id) = &args.trace_id {
        request.context.trace_id = trace_id.clone();
    }
    if request.context.trace_id.is_empty() {
        request.context.trace_id = uuid::Uuid::new_v4().to_string();
    }
    Ok(request)
}

fn read_request(path: &Path) -> Result<Request, CliError> {
    let request_error = |details: String| CliError::Request {
        path: path.display().to_string(),
        details,
    };
    let bytes = std::fs::read(path).map_err(|e| request_error(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| request_error(e.to_string()))
}

/// Accepts `Z`, a bare UTC time, or any explicit offset.
fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, CliError> {
    humantime::parse_rfc3339_weak(value)
        .map(DateTime::<Utc>::from)
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|t| t.with_timezone(&Utc)))
        .map_err(|e| CliError::Timestamp {
            value: value.to_string(),
            details: e.to_string(),
        })
}
