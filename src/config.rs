//! Repository-level configuration for `strata`.
//!
//! The config lives inside `.git/strata/config.toml`: out of the worktree,
//! next to the repository's own metadata, private to the local clone.

use crate::{
    constants::{CONFIG_FILE_NAME, STRATA_DIR_NAME},
    errors::{StrataError, StrataResult},
};
use git2::Repository;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Persistent repository-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RepoConfig {
    /// Branches that act as stack roots. Never reparented, never folded.
    pub trunk_branches: Vec<String>,
    /// Engine binary used for repository mutations. Defaults to `git`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_binary: Option<String>,
    /// Binary used for operations routed to the external review provider.
    /// Absent means the review-provider runner is unavailable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_binary: Option<String>,
}

impl RepoConfig {
    /// Creates a config with a single trunk branch.
    pub fn new(trunk: String) -> Self {
        Self {
            trunk_branches: vec![trunk],
            ..Default::default()
        }
    }

    /// Whether `branch` is one of the configured trunk branches.
    pub fn is_trunk(&self, branch: &str) -> bool {
        self.trunk_branches.iter().any(|trunk| trunk == branch)
    }

    /// The engine binary for repository mutations.
    pub fn engine_binary(&self) -> &str {
        self.engine_binary.as_deref().unwrap_or("git")
    }

    /// Loads the config for the given repository, or [None] if the
    /// repository has not been initialized with `strata`.
    pub fn try_load(repository: &Repository) -> StrataResult<Option<Self>> {
        let path = config_path(repository)?;
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(Some(toml::from_str(&raw)?))
    }

    /// Persists the config for the given repository.
    pub fn write(&self, repository: &Repository) -> StrataResult<()> {
        let path = config_path(repository)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Returns the path to the config record for the given [Repository].
fn config_path(repository: &Repository) -> StrataResult<PathBuf> {
    let dot_git = repository.path();
    if dot_git.as_os_str().is_empty() {
        return Err(StrataError::CorruptStack(
            "repository has no .git directory".to_string(),
        ));
    }
    Ok(dot_git.join(STRATA_DIR_NAME).join(CONFIG_FILE_NAME))
}
