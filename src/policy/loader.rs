//! Rule file loading and validation.
//!
//! Loading runs in four steps: environment expansion, YAML parsing into
//! document types, validation into [`Config`] types, and a stable sort by
//! priority. Any failure aborts the whole load.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use chrono::Weekday;
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::policy::config::{Conditions, Config, Policy, PrincipalSpec, ResourceSpec, Rule};
use crate::policy::schedule::Schedule;
use crate::policy::{Action, ActionSet, ConfigLocation, Effect, PolicyError};

/// Version assumed when the file does not declare one.
pub const DEFAULT_VERSION: &str = "1";

static ENV_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}|([A-Za-z_][A-Za-z0-9_]*)|\$)")
        .expect("env reference pattern is valid")
});

// ─────────────────────────────────────────────────────────────────────────────
// Entry points
// ─────────────────────────────────────────────────────────────────────────────

/// Loads a rule set, expanding references against the process environment.
pub fn load(bytes: &[u8]) -> Result<Config, PolicyError> {
    load_with_env(bytes, |name| std::env::var(name).ok())
}

/// Reads and loads a rule file.
pub fn load_file(path: impl AsRef<Path>) -> Result<Config, PolicyError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| PolicyError::Read {
        path: path.display().to_string(),
        details: e.to_string(),
    })?;
    load(&bytes)
}

/// Loads a rule set, resolving `${VAR}` references through `lookup`.
pub fn load_with_env<F>(bytes: &[u8], lookup: F) -> Result<Config, PolicyError>
where
    F: Fn(&str) -> Option<String>,
{
    let text = std::str::from_utf8(bytes).map_err(|e| PolicyError::Parse {
        details: format!("policy file is not valid UTF-8: {e}"),
    })?;
    let expanded = expand_env(text, lookup);

    let doc: ConfigDoc = serde_yml::from_str(&expanded).map_err(|e| PolicyError::Parse {
        details: e.to_string(),
    })?;

    let digest = hex::encode(Sha256::digest(expanded.as_bytes()));
    let config = doc.into_config(digest)?;

    debug!(
        version = %config.version(),
        policies = config.len(),
        digest = %config.digest(),
        "Loaded policy configuration"
    );
    Ok(config)
}

/// Expands `${VAR}`, `${VAR:-fallback}` and `$VAR`; `$$` yields `$`.
///
/// Unset variables expand to the empty string (or the fallback).
pub fn expand_env<F>(text: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ENV_REF
        .replace_all(text, |caps: &Captures<'_>| {
            if let Some(name) = caps.get(1) {
                let fallback = caps.get(2).map(|m| m.as_str());
                match lookup(name.as_str()) {
                    Some(value) if !value.is_empty() || fallback.is_none() => value,
                    _ => fallback.unwrap_or_default().to_string(),
                }
            } else if let Some(name) = caps.get(3) {
                lookup(name.as_str()).unwrap_or_default()
            } else {
                "$".to_string()
            }
        })
        .into_owned()
}

// ─────────────────────────────────────────────────────────────────────────────
// File documents
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigDoc {
    #[serde(default)]
    version: Option<Scalar>,
    #[serde(default)]
    policies: Vec<PolicyDoc>,
}

/// YAML happily reads `version: 1` as a number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Text(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyDoc {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    principals: Vec<PrincipalSpec>,
    #[serde(default)]
    resources: Vec<ResourceDoc>,
    #[serde(default)]
    rules: Vec<RuleDoc>,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceDoc {
    #[serde(rename = "type", default)]
    resource_type: String,
    #[serde(rename = "match", default)]
    matcher: MatchDoc,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MatchDoc {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    name_pattern: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleDoc {
    #[serde(default)]
    action: Option<ActionField>,
    #[serde(default)]
    effect: Option<String>,
    #[serde(default)]
    conditions: Option<ConditionsDoc>,
    #[serde(default)]
    message: String,
}

/// `action: write` or `action: [write, destructive]`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ActionField {
    One(String),
    Many(Vec<String>),
}

impl ActionField {
    fn into_tokens(self) -> Vec<String> {
        match self {
            ActionField::One(token) => vec![token],
            ActionField::Many(tokens) => tokens,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConditionsDoc {
    #[serde(default)]
    require_approval: bool,
    #[serde(default)]
    approval_quorum: Option<u32>,
    #[serde(default)]
    max_rows_affected: Option<u64>,
    #[serde(default)]
    max_pods_affected: Option<u64>,
    #[serde(default)]
    schedule: Option<ScheduleDoc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScheduleDoc {
    #[serde(default)]
    days: Vec<String>,
    #[serde(default)]
    hours: Vec<u32>,
    #[serde(default)]
    timezone: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────────────────

impl ConfigDoc {
    fn into_config(self, digest: String) -> Result<Config, PolicyError> {
        let version = self
            .version
            .map(Scalar::into_string)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_VERSION.to_string());

        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut policies = Vec::with_capacity(self.policies.len());
        for (index, doc) in self.policies.into_iter().enumerate() {
            if let Some(&first_index) = seen.get(&doc.name) {
                return Err(PolicyError::DuplicateName {
                    index,
                    name: doc.name,
                    first_index,
                });
            }
            let policy = doc.validate(index)?;
            seen.insert(policy.name.clone(), index);
            policies.push(policy);
        }

        // Vec::sort_by is stable: equal priorities keep file order.
        policies.sort_by(|a, b| b.priority.cmp(&a.priority));

        Ok(Config::new(version, policies, digest))
    }
}

impl PolicyDoc {
    fn validate(self, index: usize) -> Result<Policy, PolicyError> {
        let at = |rule_index: Option<usize>| ConfigLocation {
            policy_index: index,
            policy_name: self.name.clone(),
            rule_index,
        };
        let invalid = |rule_index: Option<usize>, details: String| PolicyError::Invalid {
            at: at(rule_index),
            details,
        };

        if self.name.trim().is_empty() {
            return Err(invalid(None, "policy name is required".to_string()));
        }
        if self.resources.is_empty() {
            return Err(invalid(None, "at least one resource is required".to_string()));
        }
        if self.rules.is_empty() {
            return Err(invalid(None, "at least one rule is required".to_string()));
        }

        for (i, principal) in self.principals.iter().enumerate() {
            let empty = |v: &Option<String>| v.as_deref().is_none_or(str::is_empty);
            if !principal.any
                && empty(&principal.user)
                && empty(&principal.role)
                && empty(&principal.service)
            {
                return Err(invalid(
                    None,
                    format!("principals[{i}] must set one of any, user, role or service"),
                ));
            }
        }

        let mut resources = Vec::with_capacity(self.resources.len());
        for (i, doc) in self.resources.iter().enumerate() {
            let spec = doc
                .validate()
                .map_err(|e| invalid(None, format!("resources[{i}]: {e}")))?;
            resources.push(spec);
        }

        let mut rules = Vec::with_capacity(self.rules.len());
        for (i, doc) in self.rules.into_iter().enumerate() {
            rules.push(doc.validate().map_err(|e| invalid(Some(i), e))?);
        }

        Ok(Policy {
            name: self.name,
            description: self.description,
            enabled: self.enabled,
            priority: self.priority,
            principals: self.principals,
            resources,
            rules,
        })
    }
}

impl ResourceDoc {
    fn validate(&self) -> Result<ResourceSpec, String> {
        if self.resource_type.trim().is_empty() {
            return Err("resource type is required".to_string());
        }
        let name_pattern = match self.matcher.name_pattern.as_deref() {
            None | Some("") => None,
            Some(pattern) => Some(
                glob::Pattern::new(pattern)
                    .map_err(|e| format!("invalid name_pattern '{pattern}': {e}"))?,
            ),
        };
        Ok(ResourceSpec {
            resource_type: self.resource_type.clone(),
            name: self.matcher.name.clone().filter(|n| !n.is_empty()),
            name_pattern,
            tags: self.matcher.tags.iter().cloned().collect::<BTreeSet<_>>(),
            namespace: self.matcher.namespace.clone().filter(|n| !n.is_empty()),
        })
    }
}

impl RuleDoc {
    fn validate(self) -> Result<Rule, String> {
        let tokens = self.action.map(ActionField::into_tokens).unwrap_or_default();
        let mut actions = ActionSet::EMPTY;
        for token in &tokens {
            actions.insert(token.parse::<Action>()?);
        }
        if actions.is_empty() {
            return Err("rule must name at least one action".to_string());
        }

        let effect = match self.effect.as_deref() {
            None | Some("") => return Err("rule effect is required".to_string()),
            Some(token) => token.parse::<Effect>()?,
        };

        let conditions = self.conditions.map(ConditionsDoc::validate).transpose()?;

        Ok(Rule {
            actions,
            effect,
            conditions,
            message: self.message,
        })
    }
}

impl ConditionsDoc {
    fn validate(self) -> Result<Conditions, String> {
        if self.approval_quorum == Some(0) {
            return Err("approval_quorum must be at least 1".to_string());
        }
        let schedule = self.schedule.map(ScheduleDoc::validate).transpose()?;
        Ok(Conditions {
            require_approval: self.require_approval,
            approval_quorum: self.approval_quorum,
            max_rows_affected: self.max_rows_affected,
            max_pods_affected: self.max_pods_affected,
            schedule,
        })
    }
}

impl ScheduleDoc {
    fn validate(self) -> Result<Schedule, String> {
        let mut days = Vec::with_capacity(self.days.len());
        for day in &self.days {
            let weekday = day
                .trim()
                .parse::<Weekday>()
                .map_err(|_| format!("unknown schedule day '{day}'"))?;
            days.push(weekday);
        }
        if let Some(hour) = self.hours.iter().find(|h| **h > 23) {
            return Err(format!("schedule hour {hour} is outside 0-23"));
        }
        let timezone = match self.timezone.as_deref() {
            None | Some("") => None,
            Some(name) => Some(
                name.parse::<Tz>()
                    .map_err(|e| format!("unknown schedule timezone '{name}': {e}"))?,
            ),
        };
        Ok(Schedule::new(days, self.hours, timezone))
    }
}
