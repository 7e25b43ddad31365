//! Restack-family operations: `restack`, `onto`, `fold`, `amend`,
//! `validate`, and `fix`.
//!
//! Every history rewrite runs through the external engine; metadata is only
//! updated after the corresponding engine command succeeded. Descendants are
//! visited with an explicit worklist, and each visited branch reports an
//! outcome instead of aborting the whole walk on the first problem.

use super::StrataContext;
use crate::{
    engine::EngineOutput,
    errors::{StrataError, StrataResult},
    git::RepositoryExt,
    graph::Scope,
};

/// What happened to one branch during a restack walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestackStatus {
    /// The branch was rebased onto its parent's tip.
    Restacked,
    /// The branch was already based on its parent's tip; only the recorded
    /// anchor was refreshed.
    UpToDate,
    /// The engine reported a conflict. The repository is left mid-rebase.
    Failed(String),
    /// Not attempted because an earlier branch in the walk failed.
    Skipped,
}

/// Per-branch outcome of a restack walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestackOutcome {
    pub branch: String,
    pub status: RestackStatus,
}

/// The collected outcomes of a restack-family operation.
#[derive(Debug, Clone, Default)]
pub struct RestackReport {
    pub outcomes: Vec<RestackOutcome>,
}

impl RestackReport {
    /// The first branch that failed, if any.
    pub fn first_failure(&self) -> Option<&RestackOutcome> {
        self.outcomes
            .iter()
            .find(|outcome| matches!(outcome.status, RestackStatus::Failed(_)))
    }

    /// Whether every visited branch completed.
    pub fn succeeded(&self) -> bool {
        self.first_failure().is_none()
    }

    /// The error equivalent of the first failure, naming the branch.
    pub fn error(&self) -> Option<StrataError> {
        self.first_failure()
            .map(|outcome| StrataError::RebaseConflict(outcome.branch.clone()))
    }
}

impl<'a> StrataContext<'a> {
    /// Rebases `branch` (and transitively its descendants) onto its current
    /// metadata parent's tip.
    pub async fn restack(&mut self, branch: &str) -> StrataResult<RestackReport> {
        if self.config.is_trunk(branch) {
            return Err(StrataError::CannotMoveTrunk(branch.to_string()));
        }
        self.graph.expect(branch)?;
        self.check_clean()?;
        self.validate(branch, Scope::Upstack)?;

        let outcomes = self.restack_forest(vec![branch.to_string()]).await?;
        self.sync_graph()?;
        Ok(RestackReport { outcomes })
    }

    /// Moves `branch` onto `onto`, then restacks every descendant.
    pub async fn restack_onto(&mut self, branch: &str, onto: &str) -> StrataResult<RestackReport> {
        if self.config.is_trunk(branch) {
            return Err(StrataError::CannotMoveTrunk(branch.to_string()));
        }
        self.graph.expect(branch)?;
        self.graph.expect(onto)?;
        if branch == onto || self.graph.descendants(branch).iter().any(|name| name == onto) {
            return Err(StrataError::CorruptStack(format!(
                "cannot move `{branch}` onto its own descendant `{onto}`"
            )));
        }
        self.check_clean()?;

        let store = self.store();
        let metadata = store
            .read(branch)?
            .ok_or_else(|| StrataError::NoParent(branch.to_string()))?;
        let branch_tip = self.repository.branch_tip(branch)?;
        let onto_tip = self.repository.branch_tip(onto)?;

        // A previous attempt may have been completed by hand with
        // `git rebase --continue`; in that case only the bookkeeping is
        // missing. Descendants still get the full desync check before
        // anything is mutated.
        if self.repository.merge_base_of(&branch_tip, &onto_tip)? == onto_tip
            && metadata.parent_branch_name != onto
        {
            for child in self.graph.children(branch).to_vec() {
                self.validate(&child, Scope::Upstack)?;
            }
            store.set_parent(branch, onto, &onto_tip)?;
            let mut outcomes = vec![RestackOutcome {
                branch: branch.to_string(),
                status: RestackStatus::UpToDate,
            }];
            let roots = self.graph.children(branch).to_vec();
            outcomes.extend(self.restack_forest(roots).await?);
            self.sync_graph()?;
            return Ok(RestackReport { outcomes });
        }

        self.validate(branch, Scope::Upstack)?;

        let old_parent_tip = self.repository.branch_tip(&metadata.parent_branch_name)?;
        let base = self.repository.merge_base_of(&branch_tip, &old_parent_tip)?;

        // Save the pre-rebase tip so descendants can find their bases.
        store.set_prev_revision(branch, &branch_tip)?;
        let output = self
            .engine
            .run(&["rebase", "--onto", onto_tip.as_str(), base.as_str(), branch])
            .await?;
        if !output.success() {
            // Metadata untouched; the repository is left exactly as the
            // engine left it.
            let mut outcomes = vec![RestackOutcome {
                branch: branch.to_string(),
                status: RestackStatus::Failed(summarize_failure(&output)),
            }];
            outcomes.extend(self.graph.descendants(branch).into_iter().map(|name| {
                RestackOutcome {
                    branch: name,
                    status: RestackStatus::Skipped,
                }
            }));
            return Ok(RestackReport { outcomes });
        }
        store.set_parent(branch, onto, &onto_tip)?;

        let mut outcomes = vec![RestackOutcome {
            branch: branch.to_string(),
            status: RestackStatus::Restacked,
        }];
        let roots = self.graph.children(branch).to_vec();
        outcomes.extend(self.restack_forest(roots).await?);
        self.sync_graph()?;
        Ok(RestackReport { outcomes })
    }

    /// Folds `branch` into its parent.
    ///
    /// Without `keep`, the parent absorbs the branch: the parent's ref
    /// fast-forwards to the branch's tip, the branch's name is deleted, and
    /// its children join the parent's children. With `keep`, the branch
    /// absorbs the parent instead: the parent's name is deleted and the
    /// branch takes over its place in the stack. Either way every child of
    /// the surviving node is restacked afterwards.
    pub async fn fold(&mut self, branch: &str, keep: bool) -> StrataResult<RestackReport> {
        if self.config.is_trunk(branch) {
            return Err(StrataError::CannotFoldTrunk(branch.to_string()));
        }
        let node = self.graph.expect(branch)?.clone();
        let metadata = node
            .metadata
            .clone()
            .ok_or_else(|| StrataError::NoParent(branch.to_string()))?;
        let parent = metadata.parent_branch_name.clone();
        if self.config.is_trunk(&parent) {
            return Err(StrataError::CannotFoldTrunk(parent));
        }
        self.check_clean()?;

        // The branch must sit directly on its parent's tip before it can be
        // folded; repair it first if the parent has moved.
        let branch_tip = self.repository.branch_tip(branch)?;
        let parent_tip = self.repository.branch_tip(&parent)?;
        if self.repository.merge_base_of(&branch_tip, &parent_tip)? != parent_tip {
            if let RestackStatus::Failed(message) = self.rebase_branch(branch).await? {
                return Ok(RestackReport {
                    outcomes: vec![RestackOutcome {
                        branch: branch.to_string(),
                        status: RestackStatus::Failed(message),
                    }],
                });
            }
        }
        let branch_tip = self.repository.branch_tip(branch)?;

        let store = self.store();
        let surviving = if keep {
            // The branch takes over the parent's place in the stack.
            let parent_metadata = store
                .read(&parent)?
                .ok_or_else(|| StrataError::NoParent(parent.clone()))?;

            self.repository.checkout_branch(branch)?;
            expect_success(
                self.engine.run(&["branch", "-D", parent.as_str()]).await?,
                &format!("branch -D {parent}"),
            )?;

            store.delete(&parent)?;
            let mut branch_metadata = store
                .read(branch)?
                .ok_or_else(|| StrataError::NoParent(branch.to_string()))?;
            branch_metadata.parent_branch_name = parent_metadata.parent_branch_name;
            branch_metadata.parent_branch_revision = parent_metadata.parent_branch_revision;
            store.write(branch, &branch_metadata)?;

            // The parent's other children now stack on the branch. Their
            // anchors are left alone so the restack below can still find
            // their original bases.
            for sibling in self.graph.children(&parent).to_vec() {
                if sibling == branch {
                    continue;
                }
                if let Some(mut sibling_metadata) = store.read(&sibling)? {
                    sibling_metadata.parent_branch_name = branch.to_string();
                    store.write(&sibling, &sibling_metadata)?;
                }
            }
            branch.to_string()
        } else {
            // The parent absorbs the branch.
            self.repository.checkout_branch(&parent)?;
            expect_success(
                self.engine
                    .run(&["merge", "--ff-only", branch_tip.as_str()])
                    .await?,
                &format!("merge --ff-only {branch}"),
            )?;
            expect_success(
                self.engine.run(&["branch", "-D", branch]).await?,
                &format!("branch -D {branch}"),
            )?;

            store.delete(branch)?;
            for child in &node.children {
                if let Some(mut child_metadata) = store.read(child)? {
                    child_metadata.parent_branch_name = parent.clone();
                    store.write(child, &child_metadata)?;
                }
            }
            parent
        };

        self.sync_graph()?;
        let roots = self.graph.children(&surviving).to_vec();
        let outcomes = self.restack_forest(roots).await?;
        self.sync_graph()?;
        Ok(RestackReport { outcomes })
    }

    /// Amends the checked-out branch's tip commit with the working copy's
    /// changes (and optionally a new message), then restacks its descendants.
    pub async fn amend_current(&mut self, message: Option<&str>) -> StrataResult<RestackReport> {
        let branch = self.current_branch_name()?;
        let branch_tip = self.repository.branch_tip(&branch)?;

        // Descendants find their base through the pre-amend tip.
        self.store().set_prev_revision(&branch, &branch_tip)?;

        let mut args = vec!["commit", "--amend", "-a"];
        match message {
            Some(message) => args.extend(["-m", message]),
            None => args.push("--no-edit"),
        }
        expect_success(self.engine.run(&args).await?, "commit --amend")?;

        self.sync_graph()?;
        let roots = self.graph.children(&branch).to_vec();
        let outcomes = self.restack_forest(roots).await?;
        self.sync_graph()?;
        Ok(RestackReport { outcomes })
    }

    /// Walks the given slice of the graph and asserts that the recorded
    /// metadata matches the ancestry derived from git. Pure read.
    ///
    /// A branch whose parent merely advanced still validates (that is the
    /// "needs restack" state, repairable by [Self::restack]); validation
    /// fails only when the recorded anchor contradicts the actual ancestry.
    pub fn validate(&self, branch: &str, scope: Scope) -> StrataResult<()> {
        self.graph.expect(branch)?;
        for name in self.graph.scope_branches(branch, scope) {
            if self.graph.is_trunk(&name) {
                continue;
            }
            let node = self.graph.expect(&name)?;
            let Some(metadata) = node.metadata.as_ref() else {
                continue;
            };
            let Some(parent) = self.graph.parent(&name) else {
                return Err(StrataError::CorruptStack(format!(
                    "branch `{name}` has no parent node"
                )));
            };

            let anchor = &metadata.parent_branch_revision;
            let anchor_reachable = self
                .repository
                .is_ancestor(anchor, &parent.revision)
                .unwrap_or(false);
            let merge_base = self
                .repository
                .merge_base_of(&node.revision, &parent.revision)
                .ok();
            // The merge base may also sit exactly on the parent tip when a
            // rebase was finished by hand and only the anchor is trailing.
            let base_matches = merge_base
                .as_deref()
                .is_some_and(|base| base == anchor || base == parent.revision);

            if !anchor_reachable || !base_matches {
                return Err(StrataError::StackDesync(name));
            }
        }
        Ok(())
    }

    /// Rewrites recorded anchors from git-derived ancestry, repairing
    /// desyncs without moving any refs. Returns the repaired branch names.
    pub fn fix(&mut self, branch: Option<&str>) -> StrataResult<Vec<String>> {
        let names = match branch {
            Some(branch) => {
                self.graph.expect(branch)?;
                self.graph.scope_branches(branch, Scope::Upstack)
            }
            None => self.graph.branches(),
        };

        let store = self.store();
        let mut repaired = Vec::new();
        for name in names {
            if self.graph.is_trunk(&name) {
                continue;
            }
            let node = self.graph.expect(&name)?;
            let Some(metadata) = node.metadata.as_ref() else {
                continue;
            };
            let Some(parent) = self.graph.parent(&name) else {
                continue;
            };
            let merge_base = match self
                .repository
                .merge_base_of(&node.revision, &parent.revision)
            {
                Ok(base) => base,
                Err(err) => {
                    tracing::warn!(branch = %name, %err, "no merge base with parent; leaving record alone");
                    continue;
                }
            };
            if metadata.parent_branch_revision != merge_base {
                store.set_parent(&name, &parent.name, &merge_base)?;
                repaired.push(name);
            }
        }
        self.sync_graph()?;
        Ok(repaired)
    }

    /// Restacks every branch in `roots` and their descendants, depth-first
    /// in child order, with an explicit worklist. The first conflict stops
    /// the walk (the repository is mid-rebase at that point); the remaining
    /// branches report [RestackStatus::Skipped].
    pub(crate) async fn restack_forest(
        &self,
        roots: Vec<String>,
    ) -> StrataResult<Vec<RestackOutcome>> {
        let mut outcomes = Vec::new();
        let mut stopped = false;
        let mut worklist: Vec<String> = roots.into_iter().rev().collect();

        while let Some(name) = worklist.pop() {
            if stopped {
                outcomes.push(RestackOutcome {
                    branch: name,
                    status: RestackStatus::Skipped,
                });
                continue;
            }

            let status = self.rebase_branch(&name).await?;
            let failed = matches!(status, RestackStatus::Failed(_));
            outcomes.push(RestackOutcome {
                branch: name.clone(),
                status,
            });

            for child in self.graph.children(&name).iter().rev() {
                worklist.push(child.clone());
            }
            if failed {
                stopped = true;
            }
        }

        Ok(outcomes)
    }

    /// Rebases a single branch onto its metadata parent's current tip.
    ///
    /// Branch tips are re-read from the repository on every call because
    /// earlier steps of the same walk move them.
    async fn rebase_branch(&self, branch: &str) -> StrataResult<RestackStatus> {
        let store = self.store();
        let metadata = store
            .read(branch)?
            .ok_or_else(|| StrataError::BranchNotTracked(branch.to_string()))?;
        let parent = metadata.parent_branch_name.clone();
        let parent_tip = self.repository.branch_tip(&parent)?;
        let branch_tip = self.repository.branch_tip(branch)?;

        // Already based on the parent tip: refresh the anchor and move on.
        if self.repository.merge_base_of(&branch_tip, &parent_tip)? == parent_tip {
            if metadata.parent_branch_revision != parent_tip {
                store.set_parent(branch, &parent, &parent_tip)?;
            }
            return Ok(RestackStatus::UpToDate);
        }

        // Find the base of the branch's own commit range: the recorded
        // anchor when it is still part of the branch's history, else the
        // parent's pre-rebase tip, else a plain merge base.
        let base = if self
            .repository
            .is_ancestor(&metadata.parent_branch_revision, &branch_tip)
            .unwrap_or(false)
        {
            metadata.parent_branch_revision.clone()
        } else if let Some(prev) = store.read(&parent)?.and_then(|meta| meta.prev_revision) {
            self.repository.merge_base_of(&branch_tip, &prev)?
        } else {
            self.repository.merge_base_of(&branch_tip, &parent_tip)?
        };

        store.set_prev_revision(branch, &branch_tip)?;
        let output = self
            .engine
            .run(&["rebase", "--onto", parent_tip.as_str(), base.as_str(), branch])
            .await?;
        if !output.success() {
            tracing::warn!(branch, "rebase reported a conflict");
            return Ok(RestackStatus::Failed(summarize_failure(&output)));
        }

        store.set_parent(branch, &parent, &parent_tip)?;
        Ok(RestackStatus::Restacked)
    }
}

/// Maps an unexpected engine failure to an error naming the command.
fn expect_success(output: EngineOutput, command: &str) -> StrataResult<EngineOutput> {
    if !output.success() {
        return Err(StrataError::EngineFailure {
            command: command.to_string(),
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}

/// A one-line description of a failed engine command.
fn summarize_failure(output: &EngineOutput) -> String {
    output
        .stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("rebase failed")
        .trim()
        .to_string()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{ctx::StrataContext, testutil};
    use pretty_assertions::assert_eq;

    /// main(1) ── a ── b, with one extra commit landed on `a` afterwards so
    /// `b` needs a restack.
    fn stack_with_moved_parent(repo: &git2::Repository) -> StrataContext<'_> {
        let mut ctx = StrataContext::fresh(repo, "main".to_string()).unwrap();
        ctx.create_branch("a").unwrap();
        testutil::commit_file(repo, "a.txt", "a\n", "a");
        ctx.create_branch("b").unwrap();
        testutil::commit_file(repo, "b.txt", "b\n", "b");

        testutil::checkout(repo, "a");
        testutil::commit_file(repo, "a2.txt", "a2\n", "a2");
        ctx.sync_graph().unwrap();
        ctx
    }

    #[tokio::test]
    async fn restack_rebases_onto_parent_tip() {
        let (_dir, repo) = testutil::init_repo();
        let mut ctx = stack_with_moved_parent(&repo);
        assert!(ctx.needs_restack("b"));

        let report = ctx.restack("b").await.unwrap();
        assert!(report.succeeded());

        // merge-base(B, P) == P.tip == recorded anchor.
        let parent_tip = testutil::tip(&repo, "a");
        let branch_tip = testutil::tip(&repo, "b");
        assert_eq!(
            repo.merge_base_of(&branch_tip, &parent_tip).unwrap(),
            parent_tip
        );
        let metadata = ctx.store().read("b").unwrap().unwrap();
        assert_eq!(metadata.parent_branch_revision, parent_tip);
        assert!(!ctx.needs_restack("b"));
        assert_eq!(testutil::log_messages(&repo, "b"), ["b", "a2", "a", "1"]);
        ctx.validate("b", Scope::Fullstack).unwrap();
    }

    #[tokio::test]
    async fn restack_onto_moves_the_whole_subtree() {
        let (_dir, repo) = testutil::init_repo();
        let mut ctx = StrataContext::fresh(&repo, "main".to_string()).unwrap();

        ctx.create_branch("a").unwrap();
        testutil::commit_file(&repo, "a.txt", "a\n", "a");
        ctx.create_branch("b").unwrap();
        testutil::commit_file(&repo, "b.txt", "b\n", "b");

        testutil::checkout(&repo, "main");
        ctx.create_branch("x").unwrap();
        testutil::commit_file(&repo, "x.txt", "x\n", "x");
        ctx.sync_graph().unwrap();

        let report = ctx.restack_onto("a", "x").await.unwrap();
        assert!(report.succeeded());

        assert_eq!(ctx.graph().parent("a").unwrap().name, "x");
        assert_eq!(testutil::log_messages(&repo, "a"), ["a", "x", "1"]);
        assert_eq!(testutil::log_messages(&repo, "b"), ["b", "a", "x", "1"]);
        ctx.validate("x", Scope::Fullstack).unwrap();
    }

    #[tokio::test]
    async fn fold_without_keep_merges_into_parent() {
        let (_dir, repo) = testutil::init_repo();
        let mut ctx = StrataContext::fresh(&repo, "main".to_string()).unwrap();

        // a ── b ── c, linear off trunk.
        for name in ["a", "b", "c"] {
            ctx.create_branch(name).unwrap();
            testutil::commit_file(&repo, &format!("{name}.txt"), name, name);
        }
        ctx.sync_graph().unwrap();

        testutil::checkout(&repo, "b");
        let report = ctx.fold("b", false).await.unwrap();
        assert!(report.succeeded());

        // b is gone; c now stacks on a, whose tip holds a and b combined.
        assert!(ctx.graph().get("b").is_none());
        assert_eq!(ctx.graph().parent("c").unwrap().name, "a");
        assert_eq!(testutil::log_messages(&repo, "a"), ["b", "a", "1"]);
        assert_eq!(testutil::log_messages(&repo, "c"), ["c", "b", "a", "1"]);
        ctx.validate("a", Scope::Fullstack).unwrap();
    }

    #[tokio::test]
    async fn fold_with_keep_absorbs_the_parent() {
        let (_dir, repo) = testutil::init_repo();
        let mut ctx = StrataContext::fresh(&repo, "main".to_string()).unwrap();

        // main ── a ── b ── c, plus d stacked on a.
        ctx.create_branch("a").unwrap();
        testutil::commit_file(&repo, "a.txt", "a\n", "a");
        ctx.create_branch("b").unwrap();
        testutil::commit_file(&repo, "b.txt", "b\n", "b");
        ctx.create_branch("c").unwrap();
        testutil::commit_file(&repo, "c.txt", "c\n", "c");
        testutil::checkout(&repo, "a");
        ctx.sync_graph().unwrap();
        ctx.create_branch("d").unwrap();
        testutil::commit_file(&repo, "d.txt", "d\n", "d");

        testutil::checkout(&repo, "b");
        ctx.sync_graph().unwrap();
        let report = ctx.fold("b", true).await.unwrap();
        assert!(report.succeeded());

        // a is gone; b keeps its name and combined commits and takes over
        // a's place, adopting d.
        assert!(ctx.graph().get("a").is_none());
        assert_eq!(ctx.graph().parent("b").unwrap().name, "main");
        assert_eq!(ctx.graph().parent("c").unwrap().name, "b");
        assert_eq!(ctx.graph().parent("d").unwrap().name, "b");
        assert_eq!(testutil::log_messages(&repo, "b"), ["b", "a", "1"]);
        assert_eq!(testutil::log_messages(&repo, "c"), ["c", "b", "a", "1"]);
        assert_eq!(testutil::log_messages(&repo, "d"), ["d", "b", "a", "1"]);
        ctx.validate("b", Scope::Fullstack).unwrap();
    }

    #[tokio::test]
    async fn fold_refuses_trunk_on_either_side() {
        let (_dir, repo) = testutil::init_repo();
        let mut ctx = StrataContext::fresh(&repo, "main".to_string()).unwrap();
        ctx.create_branch("a").unwrap();
        testutil::commit_file(&repo, "a.txt", "a\n", "a");
        ctx.sync_graph().unwrap();

        // Folding a would fold into trunk.
        assert!(matches!(
            ctx.fold("a", false).await.unwrap_err(),
            StrataError::CannotFoldTrunk(_)
        ));
        // Folding trunk itself is refused outright.
        assert!(matches!(
            ctx.fold("main", false).await.unwrap_err(),
            StrataError::CannotFoldTrunk(_)
        ));
    }

    #[tokio::test]
    async fn conflict_leaves_metadata_alone_and_recovery_completes() {
        let (_dir, repo) = testutil::init_repo();
        let mut ctx = StrataContext::fresh(&repo, "main".to_string()).unwrap();

        ctx.create_branch("a").unwrap();
        testutil::commit_file(&repo, "shared.txt", "from a\n", "a");
        ctx.create_branch("b").unwrap();
        testutil::commit_file(&repo, "shared.txt", "from b\n", "b");

        // Land a conflicting change on a.
        testutil::checkout(&repo, "a");
        testutil::commit_file(&repo, "shared.txt", "from a, reworked\n", "a2");
        ctx.sync_graph().unwrap();

        let anchor_before = ctx.store().read("b").unwrap().unwrap().parent_branch_revision;
        let report = ctx.restack("b").await.unwrap();
        let failure = report.first_failure().expect("conflict expected");
        assert_eq!(failure.branch, "b");
        assert!(matches!(report.error(), Some(StrataError::RebaseConflict(b)) if b == "b"));

        // The anchor was not updated by the failed attempt.
        let anchor_after = ctx.store().read("b").unwrap().unwrap().parent_branch_revision;
        assert_eq!(anchor_before, anchor_after);

        // Resolve the conflict and continue the rebase by hand.
        std::fs::write(repo.workdir().unwrap().join("shared.txt"), "merged\n").unwrap();
        let engine = ctx.engine().clone();
        assert!(engine.run(&["add", "shared.txt"]).await.unwrap().success());
        assert!(engine.run(&["rebase", "--continue"]).await.unwrap().success());

        // Re-running the restack now succeeds and updates the metadata.
        ctx.sync_graph().unwrap();
        let report = ctx.restack("b").await.unwrap();
        assert!(report.succeeded());
        let metadata = ctx.store().read("b").unwrap().unwrap();
        assert_eq!(metadata.parent_branch_revision, testutil::tip(&repo, "a"));
        ctx.validate("b", Scope::Fullstack).unwrap();
    }

    #[tokio::test]
    async fn onto_conflict_recovery_completes_the_bookkeeping() {
        let (_dir, repo) = testutil::init_repo();
        let mut ctx = StrataContext::fresh(&repo, "main".to_string()).unwrap();

        ctx.create_branch("a").unwrap();
        testutil::commit_file(&repo, "shared.txt", "from a\n", "a");
        testutil::checkout(&repo, "main");
        ctx.create_branch("x").unwrap();
        testutil::commit_file(&repo, "shared.txt", "from x\n", "x");
        ctx.sync_graph().unwrap();

        let report = ctx.restack_onto("a", "x").await.unwrap();
        assert!(matches!(report.error(), Some(StrataError::RebaseConflict(b)) if b == "a"));
        // Parent name and anchor untouched by the failed attempt.
        let metadata = ctx.store().read("a").unwrap().unwrap();
        assert_eq!(metadata.parent_branch_name, "main");
        assert_eq!(metadata.parent_branch_revision, testutil::tip(&repo, "main"));

        // Resolve by hand and continue the rebase.
        std::fs::write(repo.workdir().unwrap().join("shared.txt"), "merged\n").unwrap();
        let engine = ctx.engine().clone();
        assert!(engine.run(&["add", "shared.txt"]).await.unwrap().success());
        assert!(engine.run(&["rebase", "--continue"]).await.unwrap().success());

        // Re-running completes the move and updates the metadata.
        ctx.sync_graph().unwrap();
        let report = ctx.restack_onto("a", "x").await.unwrap();
        assert!(report.succeeded());
        let metadata = ctx.store().read("a").unwrap().unwrap();
        assert_eq!(metadata.parent_branch_name, "x");
        assert_eq!(metadata.parent_branch_revision, testutil::tip(&repo, "x"));
        ctx.validate("a", Scope::Fullstack).unwrap();
    }

    #[tokio::test]
    async fn onto_completion_path_still_checks_descendants() {
        let (_dir, repo) = testutil::init_repo();
        let mut ctx = StrataContext::fresh(&repo, "main".to_string()).unwrap();

        ctx.create_branch("a").unwrap();
        testutil::commit_file(&repo, "a.txt", "a\n", "a");
        ctx.create_branch("b").unwrap();
        testutil::commit_file(&repo, "b.txt", "b\n", "b");
        testutil::checkout(&repo, "main");
        ctx.create_branch("x").unwrap();
        testutil::commit_file(&repo, "x.txt", "x\n", "x");

        // Move a onto x behind the tool's back, leaving its metadata (and
        // b's anchor into a's old history) trailing.
        let engine = ctx.engine().clone();
        let main_tip = testutil::tip(&repo, "main");
        assert!(engine
            .run(&["rebase", "--onto", "x", main_tip.as_str(), "a"])
            .await
            .unwrap()
            .success());
        ctx.sync_graph().unwrap();

        // The completion path notices b's desync before mutating anything.
        let err = ctx.restack_onto("a", "x").await.unwrap_err();
        assert!(matches!(err, StrataError::StackDesync(b) if b == "b"));
        let metadata = ctx.store().read("a").unwrap().unwrap();
        assert_eq!(metadata.parent_branch_name, "main");
    }

    #[tokio::test]
    async fn restack_refuses_trunk_and_dirty_trees() {
        let (dir, repo) = testutil::init_repo();
        let mut ctx = StrataContext::fresh(&repo, "main".to_string()).unwrap();
        ctx.create_branch("a").unwrap();
        testutil::commit_file(&repo, "a.txt", "a\n", "a");
        ctx.sync_graph().unwrap();

        assert!(matches!(
            ctx.restack("main").await.unwrap_err(),
            StrataError::CannotMoveTrunk(_)
        ));

        std::fs::write(dir.path().join("README.md"), "dirty").unwrap();
        assert!(matches!(
            ctx.restack("a").await.unwrap_err(),
            StrataError::DirtyWorkingCopy
        ));
    }

    #[tokio::test]
    async fn desync_blocks_onto_until_fixed() {
        let (_dir, repo) = testutil::init_repo();
        let mut ctx = StrataContext::fresh(&repo, "main".to_string()).unwrap();

        ctx.create_branch("a").unwrap();
        testutil::commit_file(&repo, "a.txt", "a\n", "a");
        ctx.create_branch("b").unwrap();
        testutil::commit_file(&repo, "b.txt", "b\n", "b");
        testutil::checkout(&repo, "main");
        ctx.create_branch("x").unwrap();
        testutil::commit_file(&repo, "x.txt", "x\n", "x");
        ctx.sync_graph().unwrap();

        // Sabotage b's recorded anchor so it contradicts real ancestry.
        let store = ctx.store();
        let mut metadata = store.read("b").unwrap().unwrap();
        metadata.parent_branch_revision = testutil::tip(&repo, "x");
        store.write("b", &metadata).unwrap();
        ctx.sync_graph().unwrap();

        let err = ctx.restack_onto("a", "x").await.unwrap_err();
        assert!(matches!(err, StrataError::StackDesync(b) if b == "b"));

        let repaired = ctx.fix(Some("a")).unwrap();
        assert_eq!(repaired, vec!["b".to_string()]);
        let report = ctx.restack_onto("a", "x").await.unwrap();
        assert!(report.succeeded());
        ctx.validate("x", Scope::Fullstack).unwrap();
    }

    #[tokio::test]
    async fn amend_rewrites_tip_and_restacks_children() {
        let (dir, repo) = testutil::init_repo();
        let mut ctx = StrataContext::fresh(&repo, "main".to_string()).unwrap();

        ctx.create_branch("a").unwrap();
        testutil::commit_file(&repo, "a.txt", "a\n", "a");
        ctx.create_branch("b").unwrap();
        testutil::commit_file(&repo, "b.txt", "b\n", "b");

        testutil::checkout(&repo, "a");
        ctx.sync_graph().unwrap();
        std::fs::write(dir.path().join("a.txt"), "amended\n").unwrap();

        let report = ctx.amend_current(Some("a, amended")).await.unwrap();
        assert!(report.succeeded());
        assert_eq!(testutil::log_messages(&repo, "a"), ["a, amended", "1"]);
        assert_eq!(testutil::log_messages(&repo, "b"), ["b", "a, amended", "1"]);
        ctx.validate("a", Scope::Fullstack).unwrap();
    }
}
