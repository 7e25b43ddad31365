//! The in-memory context of the `strata` application.

use crate::{
    config::RepoConfig,
    engine::Engine,
    errors::{StrataError, StrataResult},
    git::RepositoryExt,
    graph::StackGraph,
    store::{BranchMetadataStore, StackMetadata},
};
use git2::Repository;

mod fmt;
mod restack;

pub use fmt::DisplayBranch;
pub use restack::{RestackOutcome, RestackReport, RestackStatus};

/// The in-memory context of the `strata` application: the repository, its
/// configuration, and the stack graph derived from both.
pub struct StrataContext<'a> {
    /// The repository associated with the context.
    pub repository: &'a Repository,
    /// The repository-level configuration.
    pub config: RepoConfig,
    /// The engine used for repository mutations.
    engine: Engine,
    /// The derived stack graph. Replaced wholesale by [Self::sync_graph].
    graph: StackGraph,
}

impl<'a> StrataContext<'a> {
    /// Creates a fresh context for a repository that has not been initialized
    /// with `strata`, persisting the config with the given trunk branch.
    pub fn fresh(repository: &'a Repository, trunk: String) -> StrataResult<Self> {
        let config = RepoConfig::new(trunk);
        config.write(repository)?;
        Self::with_config(repository, config)
    }

    /// Loads the context for the given [Repository], or [None] if the
    /// repository has not been initialized with `strata`.
    pub fn try_load(repository: &'a Repository) -> StrataResult<Option<Self>> {
        let Some(config) = RepoConfig::try_load(repository)? else {
            return Ok(None);
        };
        Self::with_config(repository, config).map(Some)
    }

    fn with_config(repository: &'a Repository, config: RepoConfig) -> StrataResult<Self> {
        let workdir = repository
            .workdir()
            .ok_or_else(|| StrataError::CorruptStack("repository has no worktree".to_string()))?
            .to_path_buf();
        let engine = Engine::new(config.engine_binary(), workdir);
        let store = BranchMetadataStore::new(repository);
        let graph = StackGraph::build(repository, &store, &config)?;
        Ok(Self {
            repository,
            config,
            engine,
            graph,
        })
    }

    /// A store view over the repository's metadata records.
    pub fn store(&self) -> BranchMetadataStore<'a> {
        BranchMetadataStore::new(self.repository)
    }

    /// The current stack graph.
    pub fn graph(&self) -> &StackGraph {
        &self.graph
    }

    /// The engine used for repository mutations.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Rebuilds the stack graph from the current refs and metadata. The old
    /// graph is replaced wholesale, never patched in place.
    pub fn sync_graph(&mut self) -> StrataResult<()> {
        let store = self.store();
        self.graph = StackGraph::build(self.repository, &store, &self.config)?;
        Ok(())
    }

    /// The checked-out branch name, erroring on a detached HEAD.
    pub fn current_branch_name(&self) -> StrataResult<String> {
        crate::graph::current_branch_name(self.repository)?.ok_or(StrataError::DetachedHead)
    }

    /// Fails with [StrataError::DirtyWorkingCopy] if the working tree has
    /// uncommitted changes.
    pub fn check_clean(&self) -> StrataResult<()> {
        if !self.repository.is_working_tree_clean()? {
            return Err(StrataError::DirtyWorkingCopy);
        }
        Ok(())
    }

    /// Starts tracking `branch` with `parent` as its stack parent.
    ///
    /// The recorded anchor is the merge base of the two branches, so a branch
    /// that is not yet based on the parent tip is flagged as needing a
    /// restack rather than rewritten on the spot.
    pub fn track_branch(&mut self, branch: &str, parent: &str) -> StrataResult<()> {
        if self.config.is_trunk(branch) {
            return Err(StrataError::CannotMoveTrunk(branch.to_string()));
        }
        self.graph.expect(parent)?;

        let branch_tip = self.repository.branch_tip(branch)?;
        let parent_tip = self.repository.branch_tip(parent)?;
        let anchor = self.repository.merge_base_of(&branch_tip, &parent_tip)?;

        self.store().write(
            branch,
            &StackMetadata::new(parent.to_string(), anchor),
        )?;
        self.sync_graph()
    }

    /// Creates `branch` at the current HEAD, tracks it under the checked-out
    /// branch, and checks it out.
    pub fn create_branch(&mut self, branch: &str) -> StrataResult<()> {
        let parent = self.current_branch_name()?;
        self.graph.expect(&parent)?;

        let head_commit = self.repository.head()?.peel_to_commit()?;
        self.repository.branch(branch, &head_commit, false)?;
        self.repository.checkout_branch(branch)?;

        self.store().write(
            branch,
            &StackMetadata::new(parent, head_commit.id().to_string()),
        )?;
        self.sync_graph()
    }

    /// Deletes `branch` and splices its children onto its parent.
    ///
    /// The children keep their recorded anchors, so they show up as needing a
    /// restack until the user runs one.
    pub async fn delete_branch(&mut self, branch: &str) -> StrataResult<()> {
        if self.config.is_trunk(branch) {
            return Err(StrataError::CannotMoveTrunk(branch.to_string()));
        }
        let node = self.graph.expect(branch)?.clone();
        let parent = node
            .parent
            .clone()
            .ok_or_else(|| StrataError::NoParent(branch.to_string()))?;

        // Move off the branch before deleting its ref.
        self.repository.checkout_branch(&parent)?;
        let output = self.engine.run(&["branch", "-D", branch]).await?;
        if !output.success() {
            return Err(StrataError::BranchNotFound(branch.to_string()));
        }

        let store = self.store();
        store.delete(branch)?;
        for child in &node.children {
            if let Some(mut metadata) = store.read(child)? {
                metadata.parent_branch_name = parent.clone();
                store.write(child, &metadata)?;
            }
        }
        self.sync_graph()
    }

    /// Whether `branch`'s recorded parent revision has fallen behind the
    /// parent's actual tip.
    pub fn needs_restack(&self, branch: &str) -> bool {
        self.graph.needs_restack(branch)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil;
    use pretty_assertions::assert_eq;

    #[test]
    fn fresh_then_reload() {
        let (_dir, repo) = testutil::init_repo();
        assert!(StrataContext::try_load(&repo).unwrap().is_none());

        StrataContext::fresh(&repo, "main".to_string()).unwrap();
        let ctx = StrataContext::try_load(&repo).unwrap().unwrap();
        assert!(ctx.graph().is_trunk("main"));
        assert_eq!(ctx.current_branch_name().unwrap(), "main");
    }

    #[test]
    fn create_branch_tracks_and_checks_out() {
        let (_dir, repo) = testutil::init_repo();
        let mut ctx = StrataContext::fresh(&repo, "main".to_string()).unwrap();

        ctx.create_branch("feature").unwrap();
        assert_eq!(ctx.current_branch_name().unwrap(), "feature");
        assert_eq!(ctx.graph().parent("feature").unwrap().name, "main");
        assert!(!ctx.needs_restack("feature"));
    }

    #[test]
    fn track_existing_branch_records_merge_base_anchor() {
        let (_dir, repo) = testutil::init_repo();
        let mut ctx = StrataContext::fresh(&repo, "main".to_string()).unwrap();

        testutil::create_branch(&repo, "feature");
        testutil::commit_file(&repo, "f.txt", "f\n", "f");
        ctx.track_branch("feature", "main").unwrap();

        let metadata = ctx.store().read("feature").unwrap().unwrap();
        assert_eq!(metadata.parent_branch_name, "main");
        assert_eq!(metadata.parent_branch_revision, testutil::tip(&repo, "main"));
    }

    #[tokio::test]
    async fn delete_branch_reparents_children() {
        let (_dir, repo) = testutil::init_repo();
        let mut ctx = StrataContext::fresh(&repo, "main".to_string()).unwrap();

        ctx.create_branch("a").unwrap();
        testutil::commit_file(&repo, "a.txt", "a\n", "a");
        ctx.create_branch("b").unwrap();
        testutil::commit_file(&repo, "b.txt", "b\n", "b");
        ctx.sync_graph().unwrap();

        ctx.delete_branch("a").await.unwrap();
        assert!(ctx.graph().get("a").is_none());
        assert_eq!(ctx.graph().parent("b").unwrap().name, "main");
    }
}
