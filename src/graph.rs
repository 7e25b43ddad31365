//! The in-memory stack graph, derived from branch refs plus the metadata
//! store. Never persisted; rebuilt wholesale whenever either side changes.

use crate::{
    config::RepoConfig,
    errors::{StrataError, StrataResult},
    store::{BranchMetadataStore, StackMetadata},
};
use git2::{BranchType, Repository};
use itertools::Itertools;
use std::collections::{HashMap, HashSet};

/// Which slice of the graph an operation walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The branch and all of its descendants.
    Upstack,
    /// The branch and its ancestors down to trunk.
    Downstack,
    /// The entire stack containing the branch, rooted at its trunk.
    Fullstack,
}

/// A single branch in the stack graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackNode {
    /// The branch name.
    pub name: String,
    /// The branch tip as of graph construction.
    pub revision: String,
    /// The metadata parent. [None] for trunk branches.
    pub parent: Option<String>,
    /// Child branches, ordered lexicographically by name. Creation order is
    /// not recoverable from git, so this ordering is the stable one restack
    /// traversals rely on.
    pub children: Vec<String>,
    /// The persisted record backing this node. [None] for trunk branches.
    pub metadata: Option<StackMetadata>,
}

/// A DAG of branches rooted at the configured trunk branches.
#[derive(Debug, Clone, Default)]
pub struct StackGraph {
    nodes: HashMap<String, StackNode>,
    trunks: Vec<String>,
    current: Option<String>,
}

impl StackGraph {
    /// Builds the graph from the repository's local branches and the
    /// metadata store.
    ///
    /// Branches without metadata that are not trunks are untracked and do not
    /// appear in the graph. Metadata for branches whose ref was deleted
    /// externally is skipped. A metadata record whose parent is neither a
    /// trunk nor another tracked branch, or a cycle in the parent pointers,
    /// fails with [StrataError::CorruptStack].
    pub fn build(
        repository: &Repository,
        store: &BranchMetadataStore<'_>,
        config: &RepoConfig,
    ) -> StrataResult<Self> {
        let mut nodes: HashMap<String, StackNode> = HashMap::new();

        for trunk in &config.trunk_branches {
            let Some(revision) = branch_revision(repository, trunk)? else {
                tracing::warn!(branch = %trunk, "configured trunk branch does not exist");
                continue;
            };
            nodes.insert(
                trunk.clone(),
                StackNode {
                    name: trunk.clone(),
                    revision,
                    parent: None,
                    children: Vec::new(),
                    metadata: None,
                },
            );
        }

        for name in store.list()? {
            if config.is_trunk(&name) {
                // Trunks never carry metadata; a leftover record is ignored.
                tracing::warn!(branch = %name, "ignoring stale metadata for trunk branch");
                continue;
            }
            let Some(revision) = branch_revision(repository, &name)? else {
                tracing::debug!(branch = %name, "skipping metadata for deleted branch");
                continue;
            };
            let metadata = store
                .read(&name)?
                .ok_or_else(|| StrataError::CorruptStack(format!("metadata for `{name}` vanished mid-build")))?;
            nodes.insert(
                name.clone(),
                StackNode {
                    name: name.clone(),
                    revision,
                    parent: Some(metadata.parent_branch_name.clone()),
                    children: Vec::new(),
                    metadata: Some(metadata),
                },
            );
        }

        // Validate parent pointers and detect cycles before deriving children.
        let known: HashSet<String> = nodes.keys().cloned().collect();
        let mut resolved: HashSet<String> = HashSet::new();
        for name in &known {
            let mut walk: Vec<String> = Vec::new();
            let mut visiting: HashSet<String> = HashSet::new();
            let mut cursor = name.clone();
            loop {
                if resolved.contains(&cursor) {
                    break;
                }
                if !visiting.insert(cursor.clone()) {
                    return Err(StrataError::CorruptStack(format!(
                        "cycle in stack metadata through `{cursor}`"
                    )));
                }
                walk.push(cursor.clone());
                match nodes.get(&cursor).and_then(|node| node.parent.clone()) {
                    Some(parent) => {
                        if !known.contains(&parent) {
                            return Err(StrataError::CorruptStack(format!(
                                "branch `{cursor}` references missing parent `{parent}`"
                            )));
                        }
                        cursor = parent;
                    }
                    // Only trunks have no parent, so the walk terminated.
                    None => break,
                }
            }
            resolved.extend(walk);
        }

        // Children are the inverse of the parent pointers.
        let edges: Vec<(String, String)> = nodes
            .values()
            .filter_map(|node| node.parent.clone().map(|parent| (parent, node.name.clone())))
            .collect();
        for (parent, child) in edges {
            if let Some(node) = nodes.get_mut(&parent) {
                node.children.push(child);
            }
        }
        for node in nodes.values_mut() {
            node.children = std::mem::take(&mut node.children).into_iter().sorted().collect();
        }

        let current = current_branch_name(repository)?.filter(|name| nodes.contains_key(name));

        Ok(Self {
            nodes,
            trunks: config.trunk_branches.clone(),
            current,
        })
    }

    /// Gets a node by branch name.
    pub fn get(&self, branch_name: &str) -> Option<&StackNode> {
        self.nodes.get(branch_name)
    }

    /// Gets a node, erroring with [StrataError::BranchNotTracked] if absent.
    pub fn expect(&self, branch_name: &str) -> StrataResult<&StackNode> {
        self.get(branch_name)
            .ok_or_else(|| StrataError::BranchNotTracked(branch_name.to_string()))
    }

    /// The metadata parent of `branch_name`, or [None] for trunks.
    pub fn parent(&self, branch_name: &str) -> Option<&StackNode> {
        self.get(branch_name)
            .and_then(|node| node.parent.as_deref())
            .and_then(|parent| self.get(parent))
    }

    /// The ordered children of `branch_name`.
    pub fn children(&self, branch_name: &str) -> &[String] {
        self.get(branch_name).map(|node| node.children.as_slice()).unwrap_or(&[])
    }

    /// Whether `branch_name` is a configured trunk branch.
    pub fn is_trunk(&self, branch_name: &str) -> bool {
        self.trunks.iter().any(|trunk| trunk == branch_name)
    }

    /// The configured trunk branches, in configuration order.
    pub fn trunks(&self) -> &[String] {
        &self.trunks
    }

    /// The checked-out branch, if HEAD is on a tracked branch.
    pub fn current_branch(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// All tracked branch names, parents before children.
    pub fn branches(&self) -> Vec<String> {
        let mut names = Vec::new();
        for trunk in &self.trunks {
            if self.nodes.contains_key(trunk) {
                names.push(trunk.clone());
                names.extend(self.descendants(trunk));
            }
        }
        names
    }

    /// Descendants of `branch_name` in depth-first pre-order, using an
    /// explicit worklist so arbitrarily deep stacks cannot overflow the call
    /// stack. Excludes the branch itself.
    pub fn descendants(&self, branch_name: &str) -> Vec<String> {
        let mut ordered = Vec::new();
        // Children are pushed in reverse so the pop order matches child order.
        let mut worklist: Vec<String> =
            self.children(branch_name).iter().rev().cloned().collect();
        while let Some(name) = worklist.pop() {
            worklist.extend(self.children(&name).iter().rev().cloned());
            ordered.push(name);
        }
        ordered
    }

    /// Ancestors of `branch_name`, nearest first, ending at its trunk.
    /// Excludes the branch itself.
    pub fn ancestors(&self, branch_name: &str) -> Vec<String> {
        let mut ordered = Vec::new();
        let mut cursor = self.get(branch_name).and_then(|node| node.parent.clone());
        while let Some(name) = cursor {
            cursor = self.get(&name).and_then(|node| node.parent.clone());
            ordered.push(name);
        }
        ordered
    }

    /// The trunk branch this stack is rooted at.
    pub fn stack_root(&self, branch_name: &str) -> Option<String> {
        if self.is_trunk(branch_name) {
            return Some(branch_name.to_string());
        }
        self.ancestors(branch_name)
            .into_iter()
            .find(|ancestor| self.is_trunk(ancestor))
    }

    /// The branches covered by `scope` relative to `branch_name`, in the
    /// order a restack-family operation visits them.
    pub fn scope_branches(&self, branch_name: &str, scope: Scope) -> Vec<String> {
        match scope {
            Scope::Upstack => {
                let mut names = vec![branch_name.to_string()];
                names.extend(self.descendants(branch_name));
                names
            }
            Scope::Downstack => {
                let mut names = vec![branch_name.to_string()];
                names.extend(self.ancestors(branch_name));
                names
            }
            Scope::Fullstack => match self.stack_root(branch_name) {
                Some(root) => {
                    let mut names = vec![root.clone()];
                    names.extend(self.descendants(&root));
                    names
                }
                None => vec![branch_name.to_string()],
            },
        }
    }

    /// Whether the recorded parent revision of `branch_name` has fallen
    /// behind the parent's actual tip.
    pub fn needs_restack(&self, branch_name: &str) -> bool {
        let Some(node) = self.get(branch_name) else {
            return false;
        };
        let (Some(metadata), Some(parent)) =
            (node.metadata.as_ref(), self.parent(branch_name))
        else {
            return false;
        };
        metadata.parent_branch_revision != parent.revision
    }
}

/// The tip revision of a local branch, or [None] if the branch is absent.
fn branch_revision(repository: &Repository, branch_name: &str) -> StrataResult<Option<String>> {
    match repository.find_branch(branch_name, BranchType::Local) {
        Ok(branch) => Ok(branch.get().target().map(|oid| oid.to_string())),
        Err(err) if err.code() == git2::ErrorCode::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// The name of the checked-out branch, or [None] on a detached HEAD.
pub fn current_branch_name(repository: &Repository) -> StrataResult<Option<String>> {
    let head = match repository.head() {
        Ok(head) => head,
        Err(err)
            if err.code() == git2::ErrorCode::UnbornBranch
                || err.code() == git2::ErrorCode::NotFound =>
        {
            return Ok(None)
        }
        Err(err) => return Err(err.into()),
    };
    if !head.is_branch() {
        return Ok(None);
    }
    Ok(head
        .name()
        .map(|name| name.trim_start_matches("refs/heads/").to_string()))
}
