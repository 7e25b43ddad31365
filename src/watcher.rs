//! Filesystem change notification for a repository session.
//!
//! Raw events are classified into change kinds and debounced: a burst of
//! events collapses into a single dispatch per kind. No payload is trusted;
//! a dispatch only tells the session *what* to re-fetch, never carries data.

use crate::constants::WATCH_DEBOUNCE;
use crate::errors::StrataResult;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::mpsc;

/// What changed on disk, and therefore what should be re-fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    UncommittedChanges,
    Commits,
    MergeConflicts,
    Everything,
}

/// Callback invoked once per coalesced change kind.
pub type ChangeCallback = Arc<dyn Fn(ChangeKind) + Send + Sync>;

/// Watches a repository's worktree and dispatches debounced change kinds.
pub struct ChangeWatcher {
    // Held so the OS watch stays registered for the watcher's lifetime.
    _watcher: RecommendedWatcher,
    force_tx: mpsc::UnboundedSender<ChangeKind>,
    task: tokio::task::JoinHandle<()>,
}

impl ChangeWatcher {
    /// Starts watching `repo_root` (recursively), dispatching to `on_change`.
    pub fn new(repo_root: &Path, on_change: ChangeCallback) -> StrataResult<Self> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (force_tx, force_rx) = mpsc::unbounded_channel();

        let root = repo_root.to_path_buf();
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                let event = match result {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(%err, "filesystem watcher error");
                        return;
                    }
                };
                if !should_process_event(&event) {
                    return;
                }
                for kind in classify_paths(&root, &event.paths) {
                    let _ = raw_tx.send(kind);
                }
            },
            notify::Config::default(),
        )?;
        watcher.watch(repo_root, RecursiveMode::Recursive)?;

        let task = tokio::spawn(dispatch_loop(raw_rx, force_rx, on_change));

        Ok(Self {
            _watcher: watcher,
            force_tx,
            task,
        })
    }

    /// Bypasses the debounce and dispatches a full re-fetch immediately.
    /// Used after an operation exits so the session is never left showing
    /// stale optimistic state once ground truth is available.
    pub fn poll_force(&self) {
        let _ = self.force_tx.send(ChangeKind::Everything);
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Debounce-and-coalesce loop: collect kinds while events keep arriving,
/// dispatch each kind once when the burst goes quiet. Forced polls skip the
/// wait entirely.
async fn dispatch_loop(
    mut raw_rx: mpsc::UnboundedReceiver<ChangeKind>,
    mut force_rx: mpsc::UnboundedReceiver<ChangeKind>,
    on_change: ChangeCallback,
) {
    let mut pending: HashSet<ChangeKind> = HashSet::new();
    loop {
        if pending.is_empty() {
            tokio::select! {
                kind = raw_rx.recv() => match kind {
                    Some(kind) => { pending.insert(kind); }
                    None => break,
                },
                kind = force_rx.recv() => match kind {
                    Some(kind) => on_change(kind),
                    None => break,
                },
            }
        } else {
            tokio::select! {
                kind = raw_rx.recv() => match kind {
                    // The burst continues; keep collecting.
                    Some(kind) => { pending.insert(kind); }
                    None => break,
                },
                kind = force_rx.recv() => match kind {
                    Some(kind) => {
                        pending.clear();
                        on_change(kind);
                    }
                    None => break,
                },
                _ = tokio::time::sleep(WATCH_DEBOUNCE) => {
                    for kind in pending.drain() {
                        on_change(kind);
                    }
                }
            }
        }
    }
}

fn should_process_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Maps changed paths to the change kinds they imply.
fn classify_paths(root: &Path, paths: &[PathBuf]) -> HashSet<ChangeKind> {
    let mut kinds = HashSet::new();
    for path in paths {
        let relative = path.strip_prefix(root).unwrap_or(path);
        let mut components = relative.components().map(|c| c.as_os_str().to_string_lossy());
        match components.next().as_deref() {
            Some(".git") => match components.next().as_deref() {
                Some("rebase-merge") | Some("rebase-apply") | Some("MERGE_HEAD")
                | Some("MERGE_MSG") => {
                    kinds.insert(ChangeKind::MergeConflicts);
                }
                Some("refs") | Some("HEAD") | Some("packed-refs") | Some("logs") => {
                    kinds.insert(ChangeKind::Commits);
                }
                Some("index") => {
                    kinds.insert(ChangeKind::UncommittedChanges);
                }
                // Lock files, object writes and our own metadata are noise.
                _ => {}
            },
            Some(_) => {
                kinds.insert(ChangeKind::UncommittedChanges);
            }
            None => {}
        }
    }
    kinds
}

#[cfg(test)]
mod test {
    use super::*;
    use std::{sync::Mutex, time::Duration};

    fn collecting_callback() -> (ChangeCallback, Arc<Mutex<Vec<ChangeKind>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ChangeCallback = Arc::new(move |kind| {
            sink.lock().unwrap().push(kind);
        });
        (callback, seen)
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..40 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[test]
    fn classifies_worktree_and_git_paths() {
        let root = Path::new("/repo");
        let kinds = classify_paths(
            root,
            &[
                PathBuf::from("/repo/src/lib.rs"),
                PathBuf::from("/repo/.git/refs/heads/main"),
                PathBuf::from("/repo/.git/rebase-merge/done"),
                PathBuf::from("/repo/.git/objects/ab/cdef"),
            ],
        );
        assert!(kinds.contains(&ChangeKind::UncommittedChanges));
        assert!(kinds.contains(&ChangeKind::Commits));
        assert!(kinds.contains(&ChangeKind::MergeConflicts));
        assert_eq!(kinds.len(), 3);
    }

    #[tokio::test]
    async fn bursts_coalesce_into_one_dispatch_per_kind() {
        let dir = tempfile::tempdir().unwrap();
        let (callback, seen) = collecting_callback();
        let _watcher = ChangeWatcher::new(dir.path(), callback).unwrap();

        for i in 0..5 {
            std::fs::write(dir.path().join(format!("f{i}.txt")), "x").unwrap();
        }

        assert!(
            wait_for(|| !seen.lock().unwrap().is_empty()).await,
            "no change dispatched"
        );
        // Allow the debounce window to fully drain, then check coalescing.
        tokio::time::sleep(WATCH_DEBOUNCE * 3).await;
        let dispatched = seen.lock().unwrap().clone();
        let uncommitted = dispatched
            .iter()
            .filter(|kind| **kind == ChangeKind::UncommittedChanges)
            .count();
        assert!(uncommitted >= 1 && uncommitted < 5, "got {dispatched:?}");
    }

    #[tokio::test]
    async fn forced_polls_skip_the_debounce() {
        let dir = tempfile::tempdir().unwrap();
        let (callback, seen) = collecting_callback();
        let watcher = ChangeWatcher::new(dir.path(), callback).unwrap();

        watcher.poll_force();
        assert!(
            wait_for(|| seen.lock().unwrap().contains(&ChangeKind::Everything)).await,
            "forced poll not dispatched"
        );
    }
}
