//! Synchronizer configuration, read from `org.toml` at the root of the
//! organization description tree.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::entity::Ruleset;

/// Per-kind switches for operations that remove organization-scoped
/// objects. Everything defaults to off: the synchronizer never deletes
/// unless explicitly told to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DestructiveOperations {
    pub allow_destructive_users: bool,
    pub allow_destructive_teams: bool,
    pub allow_destructive_repositories: bool,
    pub allow_destructive_rulesets: bool,
}

/// Engine configuration record.
///
/// Passed explicitly into the reconciler so a pass is a pure function of
/// its inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Hard upper bound on commands per pass. Exceeding it aborts the
    /// whole pass in commit, before anything is flushed.
    pub max_changesets: usize,
    /// Skip the ruleset diff entirely when false.
    pub enable_rulesets: bool,
    /// Fan-out for the remote snapshot loader (not used by the engine
    /// itself; forwarded to the loader).
    pub github_concurrent_threads: usize,
    pub destructive_operations: DestructiveOperations,
    /// Rulesets declared for the organization.
    pub rulesets: Vec<Ruleset>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_changesets: 50,
            enable_rulesets: false,
            github_concurrent_threads: 4,
            destructive_operations: DestructiveOperations::default(),
            rulesets: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Load the configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        let config: SyncConfig = toml::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }
}
