//! Utilities for interacting with `git` repositories for the `strata`
//! application.
//!
//! Everything here is read-side or worktree-local; history rewrites always go
//! through the external engine.

use crate::errors::{StrataError, StrataResult};
use git2::{BranchType, Oid, Repository, StatusOptions};
use std::env;

/// Returns the repository for the current working directory, and [None] if
/// the current working directory is not within a git repository or an error
/// occurs.
pub fn active_repository() -> Option<Repository> {
    Repository::discover(env::current_dir().ok()?).ok()
}

/// Extension trait for the [Repository] type to expose helper functions
/// related to stack management.
pub trait RepositoryExt {
    /// Checks out a branch with the given `branch_name`.
    fn checkout_branch(&self, branch_name: &str) -> StrataResult<()>;

    /// Whether the working tree has no staged or unstaged modifications.
    /// Untracked files do not count as dirty.
    fn is_working_tree_clean(&self) -> StrataResult<bool>;

    /// The tip revision of a local branch, as a hex string.
    fn branch_tip(&self, branch_name: &str) -> StrataResult<String>;

    /// The merge base of two revisions, as a hex string.
    fn merge_base_of(&self, a: &str, b: &str) -> StrataResult<String>;

    /// Whether `ancestor` is `descendant` or one of its ancestors.
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> StrataResult<bool>;
}

impl RepositoryExt for Repository {
    fn checkout_branch(&self, branch_name: &str) -> StrataResult<()> {
        self.set_head(format!("refs/heads/{branch_name}").as_str())?;
        self.checkout_head(None)?;
        Ok(())
    }

    fn is_working_tree_clean(&self) -> StrataResult<bool> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        let statuses = self.statuses(Some(&mut opts))?;
        Ok(statuses.is_empty())
    }

    fn branch_tip(&self, branch_name: &str) -> StrataResult<String> {
        let branch = self
            .find_branch(branch_name, BranchType::Local)
            .map_err(|_| StrataError::BranchNotFound(branch_name.to_string()))?;
        branch
            .get()
            .target()
            .map(|oid| oid.to_string())
            .ok_or_else(|| StrataError::BranchNotFound(branch_name.to_string()))
    }

    fn merge_base_of(&self, a: &str, b: &str) -> StrataResult<String> {
        let base = self.merge_base(Oid::from_str(a)?, Oid::from_str(b)?)?;
        Ok(base.to_string())
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> StrataResult<bool> {
        let ancestor = Oid::from_str(ancestor)?;
        let descendant = Oid::from_str(descendant)?;
        if ancestor == descendant {
            return Ok(true);
        }
        Ok(self.graph_descendant_of(descendant, ancestor)?)
    }
}
