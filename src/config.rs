//! Process-level settings, read from command-line flags and environment.
//!
//! | Variable | Flag | Default |
//! |---|---|---|
//! | `HELPDESK_POLICY_FILE` | `--policies` | required |
//! | `HELPDESK_DEFAULT_EFFECT` | `--default-effect` | `deny` |
//! | `HELPDESK_DRY_RUN` | `--dry-run` | `false` |
//! | `HELPDESK_LOG_FORMAT` | `--log-format` | `pretty` |

use std::path::PathBuf;

use clap::{Args, ValueEnum};

use crate::policy::{Effect, EngineOptions};

/// Rule file and engine behavior.
#[derive(Debug, Clone, Args)]
pub struct EngineSettings {
    /// Policy rule file (YAML)
    #[arg(short = 'p', long = "policies", env = "HELPDESK_POLICY_FILE")]
    pub policy_file: PathBuf,

    /// Effect applied when no policy matches
    #[arg(long, env = "HELPDESK_DEFAULT_EFFECT", default_value = "deny")]
    pub default_effect: Effect,

    /// Resolve every request to allow while reporting the real outcome
    #[arg(long, env = "HELPDESK_DRY_RUN")]
    pub dry_run: bool,
}

impl EngineSettings {
    pub fn options(&self) -> EngineOptions {
        EngineOptions {
            default_effect: self.default_effect,
            dry_run: self.dry_run,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, Args)]
pub struct LogSettings {
    /// Log output format
    #[arg(
        long,
        env = "HELPDESK_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Pretty,
        global = true
    )]
    pub log_format: LogFormat,
}
