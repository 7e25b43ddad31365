//! Error types for the `strata` application.

/// A [Result] alias with [StrataError] as the error type.
pub type StrataResult<T> = Result<T, StrataError>;

/// All errors surfaced by `strata` core operations.
///
/// Precondition errors are raised before anything is mutated; mid-rebase
/// failures leave the repository exactly as `git` left it.
#[derive(Debug, thiserror::Error)]
pub enum StrataError {
    /// The stack metadata contains a cycle or references a parent that does
    /// not exist. Requires manual repair.
    #[error("Stack metadata is corrupt: {0}.")]
    CorruptStack(String),
    /// The recorded parent of a branch no longer matches the ancestry derived
    /// from git. Blocks the requested operation until repaired.
    #[error("Branch `{0}` is out of sync with its recorded parent. Run `strata fix` or `strata restack` first.")]
    StackDesync(String),
    /// Trunk branches are never reparented.
    #[error("Cannot move trunk branch `{0}`.")]
    CannotMoveTrunk(String),
    /// Trunk branches are never folded, and nothing is folded into them.
    #[error("Cannot fold trunk branch `{0}`.")]
    CannotFoldTrunk(String),
    /// The branch has no recorded parent.
    #[error("Branch `{0}` has no parent tracked by `strata`.")]
    NoParent(String),
    /// Restack-family operations require a clean working copy.
    #[error("The working copy has uncommitted changes. Commit or stash them first.")]
    DirtyWorkingCopy,
    /// The engine reported a conflict mid-rebase. The repository is left in
    /// the conflicted state for the user to resolve and continue or abort.
    #[error("Rebase of `{0}` hit a conflict. Resolve it, run `git rebase --continue`, then re-run the command.")]
    RebaseConflict(String),
    /// The engine binary could not be started at all.
    #[error("Failed to spawn `{command}`: {source}")]
    ProcessSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    /// The branch exists in git but has no stack metadata.
    #[error("Branch `{0}` is not tracked with `strata`. Track it first with `strata track`.")]
    BranchNotTracked(String),
    /// The named branch does not exist in the repository.
    #[error("Branch `{0}` was not found in the repository.")]
    BranchNotFound(String),
    /// `HEAD` is not on a branch.
    #[error("Not currently on a branch; no target for this operation.")]
    DetachedHead,
    /// The repository has no `strata` configuration yet.
    #[error("Repository is not configured with `strata`. Run any `strata` command to pick a trunk branch.")]
    NotInitialized,
    /// The external review provider runner was requested but not configured.
    #[error("No external review provider is configured for this repository.")]
    NoReviewProvider,
    /// An engine command that should not fail did.
    #[error("Engine command `{command}` failed: {stderr}")]
    EngineFailure { command: String, stderr: String },

    #[error(transparent)]
    Git(#[from] git2::Error),
    #[error(transparent)]
    Fmt(#[from] std::fmt::Error),
    #[error(transparent)]
    Notify(#[from] notify::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Failed to parse repository config: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("Failed to serialize repository config: {0}")]
    TomlSer(#[from] toml::ser::Error),
}
