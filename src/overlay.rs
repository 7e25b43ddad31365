//! Optimistic state: predicted views of the stack while operations are still
//! queued or running.
//!
//! Each operation kind carries both its engine argv and a pure predictor of
//! its effect. The overlay never mutates the confirmed snapshot; it is
//! recomputed from scratch on every trigger, so there is no persistent
//! optimistic state to reconcile or roll back.

use crate::{
    engine::CommandArg,
    queue::OperationRunner,
};
use serde::{Deserialize, Serialize};

/// One branch in the smartlog view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BranchSnapshot {
    /// The branch name.
    pub name: String,
    /// The tip commit's summary line.
    pub title: String,
    /// The tip commit's body, if any.
    pub description: String,
    /// The tip commit's author.
    pub author: String,
    /// The tip commit's timestamp, in milliseconds since the epoch.
    pub date_millis: i64,
    /// The stack parent. [None] for trunk branches.
    pub parent: Option<String>,
    /// Whether this branch is checked out.
    pub is_head: bool,
    /// Whether this branch is a trunk branch.
    pub is_trunk: bool,
    /// Whether the branch's recorded parent revision is behind the parent.
    pub needs_restack: bool,
}

/// Status of a file in the working copy, or in a conflict listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeStatus {
    Modified,
    Added,
    Removed,
    Renamed,
    Copied,
    Untracked,
    Unresolved,
    Resolved,
}

/// A changed file, as reported by the engine's status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    pub status: ChangeStatus,
}

/// The composed (confirmed + speculative) view of the repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeculativeView {
    /// Branches, parents before children.
    pub commits: Vec<BranchSnapshot>,
    /// The predicted uncommitted changes.
    pub uncommitted: Vec<ChangedFile>,
}

/// Result of asking an operation to predict its effect on a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prediction<T> {
    /// The speculative view after this operation.
    Applied(T),
    /// Ground truth already reflects (or contradicts) the effect; this
    /// operation's speculation is dropped from composition.
    NoLongerApplicable,
}

/// A mutating operation, with everything needed to build its engine argv and
/// to predict its effect on the smartlog. Dispatch is exhaustive matching;
/// adding a case forces every site to handle it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackOp {
    /// Create a new branch at the current head, committing staged changes
    /// with the given title.
    CreateBranch {
        title: String,
        /// The head branch when the operation was requested, used to notice
        /// when the optimistic state has resolved.
        original_head: String,
    },
    /// Amend the head branch's tip commit.
    Amend {
        title: Option<String>,
        description: Option<String>,
    },
    /// Rebase a branch onto its current parent, descendants included.
    Restack { branch: String },
    /// Move a branch (and descendants) onto a new base.
    RestackOnto { branch: String, onto: String },
    /// Fold a branch into its parent.
    Fold { branch: String, keep: bool },
    /// Delete a branch, splicing its children onto its parent.
    DeleteBranch { branch: String },
    /// Check out another branch.
    Goto { branch: String },
}

impl StackOp {
    /// The stack-CLI argv that performs this operation.
    pub fn args(&self) -> Vec<CommandArg> {
        match self {
            Self::CreateBranch { title, .. } => vec![
                CommandArg::plain("create"),
                CommandArg::plain(slugify(title)),
                CommandArg::plain("--message"),
                CommandArg::plain(title.as_str()),
            ],
            Self::Amend { title, .. } => match title {
                Some(title) => vec![
                    CommandArg::plain("amend"),
                    CommandArg::plain("--message"),
                    CommandArg::plain(title.as_str()),
                ],
                None => vec![CommandArg::plain("amend")],
            },
            Self::Restack { branch } => {
                vec![
                    CommandArg::plain("restack"),
                    CommandArg::plain(branch.as_str()),
                ]
            }
            Self::RestackOnto { branch, onto } => vec![
                CommandArg::plain("onto"),
                CommandArg::plain(onto.as_str()),
                CommandArg::plain(branch.as_str()),
            ],
            Self::Fold { branch, keep } => {
                let mut args = vec![
                    CommandArg::plain("fold"),
                    CommandArg::plain(branch.as_str()),
                ];
                if *keep {
                    args.push(CommandArg::plain("--keep"));
                }
                args
            }
            Self::DeleteBranch { branch } => vec![
                CommandArg::plain("delete"),
                CommandArg::plain(branch.as_str()),
                CommandArg::plain("--force"),
            ],
            Self::Goto { branch } => {
                vec![
                    CommandArg::plain("checkout"),
                    CommandArg::plain(branch.as_str()),
                ]
            }
        }
    }

    /// Which process executes this operation.
    pub fn runner(&self) -> OperationRunner {
        OperationRunner::PrimaryEngine
    }

    /// Predicts this operation's effect on the commit list.
    pub fn predict_commits(&self, commits: &[BranchSnapshot]) -> Prediction<Vec<BranchSnapshot>> {
        match self {
            Self::CreateBranch {
                title,
                original_head,
            } => {
                let Some(head) = commits.iter().find(|commit| commit.is_head) else {
                    return Prediction::NoLongerApplicable;
                };
                // The branch exists once we no longer see the original head.
                if head.name != *original_head {
                    return Prediction::NoLongerApplicable;
                }

                let mut next: Vec<BranchSnapshot> = commits.to_vec();
                let author = head.author.clone();
                let parent_name = head.name.clone();
                for commit in &mut next {
                    commit.is_head = false;
                }
                next.push(BranchSnapshot {
                    name: slugify(title),
                    title: title.clone(),
                    description: String::new(),
                    author,
                    date_millis: 0,
                    parent: Some(parent_name),
                    is_head: true,
                    is_trunk: false,
                    needs_restack: false,
                });
                Prediction::Applied(next)
            }
            Self::Amend { title, description } => {
                let Some(head) = commits.iter().find(|commit| commit.is_head) else {
                    return Prediction::NoLongerApplicable;
                };
                let title = match title {
                    Some(title) => title,
                    // Amend without a message change has nothing visible to
                    // predict on the tree.
                    None => return Prediction::NoLongerApplicable,
                };
                // The amend succeeded once the message is what we asked for.
                if head.title == *title
                    && description
                        .as_ref()
                        .map_or(true, |description| head.description == *description)
                {
                    return Prediction::NoLongerApplicable;
                }

                let mut next = commits.to_vec();
                for commit in &mut next {
                    if commit.is_head {
                        commit.title = title.clone();
                        if let Some(description) = description {
                            commit.description = description.clone();
                        }
                    }
                }
                Prediction::Applied(next)
            }
            Self::Restack { branch } => {
                if !commits
                    .iter()
                    .any(|commit| commit.name == *branch && commit.needs_restack)
                {
                    return Prediction::NoLongerApplicable;
                }
                Prediction::Applied(clear_restack_flags(commits, branch))
            }
            Self::RestackOnto { branch, onto } => {
                let Some(moved) = commits.iter().find(|commit| commit.name == *branch) else {
                    return Prediction::NoLongerApplicable;
                };
                if moved.parent.as_deref() == Some(onto.as_str()) {
                    return Prediction::NoLongerApplicable;
                }

                let mut next = clear_restack_flags(commits, branch);
                for commit in &mut next {
                    if commit.name == *branch {
                        commit.parent = Some(onto.clone());
                    }
                }
                Prediction::Applied(next)
            }
            Self::Fold { branch, keep } => {
                let Some(folded) = commits.iter().find(|commit| commit.name == *branch) else {
                    return Prediction::NoLongerApplicable;
                };
                let Some(parent_name) = folded.parent.clone() else {
                    return Prediction::NoLongerApplicable;
                };

                if *keep {
                    // The branch takes the parent's place.
                    let Some(parent) = commits.iter().find(|commit| commit.name == parent_name)
                    else {
                        return Prediction::NoLongerApplicable;
                    };
                    let grandparent = parent.parent.clone();
                    let mut next: Vec<BranchSnapshot> = commits
                        .iter()
                        .filter(|commit| commit.name != parent_name)
                        .cloned()
                        .collect();
                    for commit in &mut next {
                        if commit.name == *branch {
                            commit.parent = grandparent.clone();
                        } else if commit.parent.as_deref() == Some(parent_name.as_str()) {
                            commit.parent = Some(branch.clone());
                        }
                    }
                    Prediction::Applied(next)
                } else {
                    let mut next: Vec<BranchSnapshot> = commits
                        .iter()
                        .filter(|commit| commit.name != *branch)
                        .cloned()
                        .collect();
                    for commit in &mut next {
                        if commit.parent.as_deref() == Some(branch.as_str()) {
                            commit.parent = Some(parent_name.clone());
                        }
                    }
                    Prediction::Applied(next)
                }
            }
            Self::DeleteBranch { branch } => {
                let Some(deleted) = commits.iter().find(|commit| commit.name == *branch) else {
                    return Prediction::NoLongerApplicable;
                };
                let parent = deleted.parent.clone();
                let mut next: Vec<BranchSnapshot> = commits
                    .iter()
                    .filter(|commit| commit.name != *branch)
                    .cloned()
                    .collect();
                for commit in &mut next {
                    if commit.parent.as_deref() == Some(branch.as_str()) {
                        commit.parent = parent.clone();
                    }
                }
                Prediction::Applied(next)
            }
            Self::Goto { branch } => {
                let Some(head) = commits.iter().find(|commit| commit.is_head) else {
                    return Prediction::NoLongerApplicable;
                };
                if head.name == *branch {
                    return Prediction::NoLongerApplicable;
                }
                let mut next = commits.to_vec();
                for commit in &mut next {
                    commit.is_head = commit.name == *branch;
                }
                Prediction::Applied(next)
            }
        }
    }

    /// Predicts this operation's effect on the uncommitted-changes list.
    pub fn predict_uncommitted(&self, files: &[ChangedFile]) -> Prediction<Vec<ChangedFile>> {
        match self {
            Self::CreateBranch { .. } | Self::Amend { .. } => {
                // Optimistic state is over when the changes we wanted to
                // commit are gone.
                if files.is_empty() {
                    return Prediction::NoLongerApplicable;
                }
                Prediction::Applied(Vec::new())
            }
            _ => Prediction::NoLongerApplicable,
        }
    }
}

/// Clears the needs-restack flag on `branch` and everything above it.
fn clear_restack_flags(commits: &[BranchSnapshot], branch: &str) -> Vec<BranchSnapshot> {
    let mut next = commits.to_vec();
    let mut in_subtree: Vec<String> = vec![branch.to_string()];
    // Parents always precede children in the snapshot, so one pass suffices.
    for commit in &mut next {
        if in_subtree.contains(&commit.name)
            || commit
                .parent
                .as_ref()
                .is_some_and(|parent| in_subtree.contains(parent))
        {
            if !in_subtree.contains(&commit.name) {
                in_subtree.push(commit.name.clone());
            }
            commit.needs_restack = false;
        }
    }
    next
}

/// Composes the speculative view: the confirmed snapshot with every pending
/// operation's prediction applied in submission order.
pub fn speculate(
    commits: &[BranchSnapshot],
    uncommitted: &[ChangedFile],
    pending: &[StackOp],
) -> SpeculativeView {
    let mut view = SpeculativeView {
        commits: commits.to_vec(),
        uncommitted: uncommitted.to_vec(),
    };
    for op in pending {
        if let Prediction::Applied(commits) = op.predict_commits(&view.commits) {
            view.commits = commits;
        }
        if let Prediction::Applied(uncommitted) = op.predict_uncommitted(&view.uncommitted) {
            view.uncommitted = uncommitted;
        }
    }
    view
}

/// Lowercased, dash-separated branch name derived from a commit title.
fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn snapshot(name: &str, parent: Option<&str>, is_head: bool) -> BranchSnapshot {
        BranchSnapshot {
            name: name.to_string(),
            title: name.to_string(),
            description: String::new(),
            author: "Test User".to_string(),
            date_millis: 0,
            parent: parent.map(ToString::to_string),
            is_head,
            is_trunk: parent.is_none(),
            needs_restack: false,
        }
    }

    fn base_commits() -> Vec<BranchSnapshot> {
        vec![
            snapshot("main", None, false),
            snapshot("a", Some("main"), true),
        ]
    }

    #[test]
    fn create_branch_speculates_a_new_leaf_and_clears_changes() {
        let commits = base_commits();
        let uncommitted = vec![ChangedFile {
            path: "x.txt".to_string(),
            status: ChangeStatus::Modified,
        }];
        let op = StackOp::CreateBranch {
            title: "Foo".to_string(),
            original_head: "a".to_string(),
        };

        let view = speculate(&commits, &uncommitted, &[op.clone()]);
        assert_eq!(view.commits.len(), commits.len() + 1);
        let leaf = view.commits.last().unwrap();
        assert_eq!(leaf.title, "Foo");
        assert_eq!(leaf.parent.as_deref(), Some("a"));
        assert!(leaf.is_head);
        assert!(!view.commits.iter().any(|c| c.name == "a" && c.is_head));
        assert!(view.uncommitted.is_empty());

        // Once ground truth reflects the new head, the speculation retires:
        // composing with the op equals composing without it.
        let mut confirmed = commits;
        for commit in &mut confirmed {
            commit.is_head = false;
        }
        confirmed.push(snapshot("foo", Some("a"), true));
        let with_op = speculate(&confirmed, &[], &[op]);
        let without_op = speculate(&confirmed, &[], &[]);
        assert_eq!(with_op, without_op);
    }

    #[test]
    fn amend_updates_the_head_in_place() {
        let commits = base_commits();
        let op = StackOp::Amend {
            title: Some("new title".to_string()),
            description: None,
        };

        let view = speculate(&commits, &[], &[op.clone()]);
        assert_eq!(view.commits.len(), commits.len());
        let head = view.commits.iter().find(|c| c.is_head).unwrap();
        assert_eq!(head.title, "new title");

        // Converged ground truth retires the speculation.
        let mut confirmed = commits;
        confirmed[1].title = "new title".to_string();
        assert_eq!(
            op.predict_commits(&confirmed),
            Prediction::NoLongerApplicable
        );
    }

    #[test]
    fn operations_compose_in_submission_order() {
        let commits = base_commits();
        let create = StackOp::CreateBranch {
            title: "Foo".to_string(),
            original_head: "a".to_string(),
        };
        // The amend speculates on top of the created branch, which is the
        // head in the first operation's speculative view.
        let amend = StackOp::Amend {
            title: Some("Bar".to_string()),
            description: None,
        };

        let view = speculate(&commits, &[], &[create, amend]);
        let head = view.commits.iter().find(|c| c.is_head).unwrap();
        assert_eq!(head.name, "foo");
        assert_eq!(head.title, "Bar");
    }

    #[test]
    fn fold_predictions_match_fold_semantics() {
        let commits = vec![
            snapshot("main", None, false),
            snapshot("a", Some("main"), false),
            snapshot("b", Some("a"), true),
            snapshot("c", Some("b"), false),
            snapshot("d", Some("a"), false),
        ];

        // Without keep: b disappears, c moves under a.
        let fold = StackOp::Fold {
            branch: "b".to_string(),
            keep: false,
        };
        let view = speculate(&commits, &[], &[fold]);
        assert!(!view.commits.iter().any(|c| c.name == "b"));
        let c = view.commits.iter().find(|c| c.name == "c").unwrap();
        assert_eq!(c.parent.as_deref(), Some("a"));

        // With keep: a disappears, b takes its place and adopts d.
        let fold_keep = StackOp::Fold {
            branch: "b".to_string(),
            keep: true,
        };
        let view = speculate(&commits, &[], &[fold_keep]);
        assert!(!view.commits.iter().any(|c| c.name == "a"));
        let b = view.commits.iter().find(|c| c.name == "b").unwrap();
        assert_eq!(b.parent.as_deref(), Some("main"));
        let d = view.commits.iter().find(|c| c.name == "d").unwrap();
        assert_eq!(d.parent.as_deref(), Some("b"));
    }

    #[test]
    fn restack_onto_clears_flags_and_moves_the_parent_pointer() {
        let mut commits = base_commits();
        commits.push(snapshot("x", Some("main"), false));
        commits[1].needs_restack = true;

        let op = StackOp::RestackOnto {
            branch: "a".to_string(),
            onto: "x".to_string(),
        };
        let view = speculate(&commits, &[], &[op.clone()]);
        let a = view.commits.iter().find(|c| c.name == "a").unwrap();
        assert_eq!(a.parent.as_deref(), Some("x"));
        assert!(!a.needs_restack);

        // Once the parent pointer is real, the prediction retires.
        let mut confirmed = commits;
        confirmed[1].parent = Some("x".to_string());
        assert_eq!(
            op.predict_commits(&confirmed),
            Prediction::NoLongerApplicable
        );
    }

    #[test]
    fn slugs_are_branch_safe() {
        assert_eq!(slugify("Fix the Thing!"), "fix-the-thing");
        assert_eq!(slugify("  spaces  "), "spaces");
    }
}
