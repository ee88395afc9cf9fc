//! Reloadable holder for the active policy engine.
//!
//! Each engine stays immutable. Reloading builds a fresh engine from the
//! rule file and swaps it in atomically; evaluations already in flight keep
//! the snapshot they started with. A failed reload leaves the previous
//! engine in place.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::policy::engine::{EngineOptions, PolicyEngine};
use crate::policy::{PolicyError, loader};

/// Where the active rule set came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySource {
    /// Rule file path
    pub path: PathBuf,
    /// When the file was loaded
    pub loaded_at: DateTime<Utc>,
    /// Digest of the loaded rule set
    pub digest: String,
}

/// Store statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyStats {
    /// Number of policies in the active rule set
    pub policy_count: usize,
    /// Successful reloads since the store was opened
    pub reload_count: u64,
    /// Time of the last successful reload
    pub last_reload: Option<DateTime<Utc>>,
    /// Active rule set origin
    pub source: PolicySource,
}

struct Snapshot {
    engine: Arc<PolicyEngine>,
    source: PolicySource,
    reloaded: bool,
}

/// Holds the active [`PolicyEngine`] and swaps it on reload.
///
/// Pass the store (or engine snapshots taken from it) to every component
/// that needs decisions; there is no global instance.
pub struct PolicyStore {
    path: PathBuf,
    options: EngineOptions,
    current: ArcSwap<Snapshot>,
    reload_count: AtomicU64,
}

impl PolicyStore {
    /// Loads the rule file and builds the first engine.
    pub fn open(path: impl AsRef<Path>, options: EngineOptions) -> Result<Self, PolicyError> {
        let path = path.as_ref().to_path_buf();
        let snapshot = build_snapshot(&path, options, false)?;
        Ok(Self {
            path,
            options,
            current: ArcSwap::from_pointee(snapshot),
            reload_count: AtomicU64::new(0),
        })
    }

    /// Current engine snapshot.
    pub fn engine(&self) -> Arc<PolicyEngine> {
        Arc::clone(&self.current.load().engine)
    }

    /// Re-reads the rule file and swaps in a new engine.
    pub fn reload(&self) -> Result<(), PolicyError> {
        match build_snapshot(&self.path, self.options, true) {
            Ok(snapshot) => {
                info!(
                    path = %self.path.display(),
                    policies = snapshot.engine.config().len(),
                    digest = %snapshot.source.digest,
                    "Reloaded policy configuration"
                );
                self.current.store(Arc::new(snapshot));
                self.reload_count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    error = %e,
                    "Policy reload failed, keeping previous configuration"
                );
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> PolicyStats {
        let snapshot = self.current.load();
        PolicyStats {
            policy_count: snapshot.engine.config().len(),
            reload_count: self.reload_count.load(Ordering::Relaxed),
            last_reload: snapshot.reloaded.then_some(snapshot.source.loaded_at),
            source: snapshot.source.clone(),
        }
    }
}

fn build_snapshot(
    path: &Path,
    options: EngineOptions,
    reloaded: bool,
) -> Result<Snapshot, PolicyError> {
    let config = loader::load_file(path)?;
    let source = PolicySource {
        path: path.to_path_buf(),
        loaded_at: Utc::now(),
        digest: config.digest().to_string(),
    };
    Ok(Snapshot {
        engine: Arc::new(PolicyEngine::new(config, options)),
        source,
        reloaded,
    })
}
