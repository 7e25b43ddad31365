//! Shared helpers for building scratch repositories in tests.

use git2::{Repository, RepositoryInitOptions, Signature};
use std::path::Path;
use tempfile::TempDir;

/// Initializes a scratch repository with `main` checked out and one initial
/// commit.
pub fn init_repo() -> (TempDir, Repository) {
    let dir = TempDir::new().unwrap();
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("main");
    let repo = Repository::init_opts(dir.path(), &opts).unwrap();

    {
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test User").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();
    }

    commit_file(&repo, "README.md", "initial\n", "1");
    (dir, repo)
}

fn signature() -> Signature<'static> {
    Signature::now("Test User", "test@example.com").unwrap()
}

/// Writes `content` to `file` and commits it on the current branch.
pub fn commit_file(repo: &Repository, file: &str, content: &str, message: &str) -> git2::Oid {
    let workdir = repo.workdir().unwrap();
    let path = workdir.join(file);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();

    let mut index = repo.index().unwrap();
    index.add_path(Path::new(file)).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();

    let parent_commit = repo
        .head()
        .ok()
        .and_then(|head| head.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent_commit.iter().collect();

    let sig = signature();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap()
}

/// Creates `branch` at the current HEAD commit and checks it out.
pub fn create_branch(repo: &Repository, branch: &str) {
    let head = repo.head().unwrap().peel_to_commit().unwrap();
    repo.branch(branch, &head, false).unwrap();
    checkout(repo, branch);
}

/// Checks out an existing branch, updating the worktree.
pub fn checkout(repo: &Repository, branch: &str) {
    repo.set_head(&format!("refs/heads/{branch}")).unwrap();
    let mut opts = git2::build::CheckoutBuilder::new();
    opts.force();
    repo.checkout_head(Some(&mut opts)).unwrap();
}

/// The tip revision of `branch`, as a hex string.
pub fn tip(repo: &Repository, branch: &str) -> String {
    repo.find_branch(branch, git2::BranchType::Local)
        .unwrap()
        .get()
        .target()
        .unwrap()
        .to_string()
}

/// Commit summaries reachable from `branch`, newest first.
pub fn log_messages(repo: &Repository, branch: &str) -> Vec<String> {
    let mut walk = repo.revwalk().unwrap();
    walk.push_ref(&format!("refs/heads/{branch}")).unwrap();
    walk.map(|oid| {
        repo.find_commit(oid.unwrap())
            .unwrap()
            .summary()
            .unwrap()
            .to_string()
    })
    .collect()
}
