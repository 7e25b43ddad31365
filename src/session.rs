//! Long-lived repository sessions: snapshot fetchers, subscriptions, the
//! operation queue, and the optimistic overlay, all owned per repository
//! root.
//!
//! A session may be shared by multiple observers; cache lookups go through
//! [SessionCache] so watcher subscriptions and status/log fetches are never
//! duplicated for the same repository.

use crate::{
    config::RepoConfig,
    engine::{CommandArg, Engine},
    errors::{StrataError, StrataResult},
    graph::StackGraph,
    overlay::{self, BranchSnapshot, ChangeStatus, ChangedFile, SpeculativeView, StackOp},
    queue::{
        now_millis, OperationExit, OperationQueue, OperationRunner, ProgressSender,
        RunnableOperation,
    },
    store::BranchMetadataStore,
    watcher::{ChangeCallback, ChangeKind, ChangeWatcher},
};
use git2::Repository;
use once_cell::sync::Lazy;
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
};
use tokio::sync::{broadcast, Semaphore};

/// Status codes `git status --porcelain` uses for unmerged paths.
static UNMERGED_CODES: Lazy<HashSet<&'static str>> =
    Lazy::new(|| HashSet::from(["DD", "AU", "UD", "UA", "DU", "AA", "UU"]));

/// A snapshot produced by one fetch, carrying its fetch window and either the
/// value or a stringified error.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub fetch_started_at: u64,
    pub fetch_completed_at: u64,
    pub result: Result<T, String>,
}

/// Merge-conflict state as shown to subscribers.
///
/// [None] at the session level means "confirmed no conflicts"; `Loading`
/// means conflicts were detected but the file list is still being fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeConflicts {
    Loading,
    Loaded {
        files: Vec<ChangedFile>,
        fetch_started_at: u64,
        fetch_completed_at: u64,
    },
}

#[derive(Default)]
struct Snapshots {
    uncommitted: Option<Fetched<Vec<ChangedFile>>>,
    commits: Option<Fetched<Vec<BranchSnapshot>>>,
    conflicts: Option<MergeConflicts>,
}

/// Serializes one fetch kind against itself. A caller that arrives while a
/// fetch is in flight waits for it and reuses its result instead of spawning
/// a duplicate process.
#[derive(Default)]
struct FetchGate {
    lock: tokio::sync::Mutex<()>,
    seq: AtomicU64,
}

struct PendingOperation {
    id: String,
    op: StackOp,
}

/// A long-lived session for one repository root.
///
/// Owns its own queue, snapshot caches, pending-operation list, and (once
/// [Self::start_watching] is called) watcher subscription. No globals;
/// multiple sessions for different roots coexist freely.
pub struct RepoSession {
    repo_root: PathBuf,
    dot_git: PathBuf,
    /// Engine for read-side fetches (status and friends).
    engine: Engine,
    /// Serialization point for all mutating operations.
    queue: OperationQueue,
    runtime: tokio::runtime::Handle,
    watcher: Mutex<Option<ChangeWatcher>>,
    snapshots: Mutex<Snapshots>,
    pending: Mutex<Vec<PendingOperation>>,
    status_gate: FetchGate,
    commits_gate: FetchGate,
    conflicts_gate: FetchGate,
    cat_limiter: Semaphore,
    op_counter: AtomicU64,
    uncommitted_tx: broadcast::Sender<Fetched<Vec<ChangedFile>>>,
    commits_tx: broadcast::Sender<Fetched<Vec<BranchSnapshot>>>,
    conflicts_tx: broadcast::Sender<Option<MergeConflicts>>,
}

impl RepoSession {
    /// Opens a session for the repository containing `path`, spawning the
    /// current executable for session-level operations.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(path: &Path) -> StrataResult<Arc<Self>> {
        let primary = std::env::current_exe()
            .map(|exe| exe.display().to_string())
            .unwrap_or_else(|_| "strata".to_string());
        Self::open_with_primary(path, &primary)
    }

    /// Opens a session whose queue spawns `primary_binary` for operations.
    pub fn open_with_primary(path: &Path, primary_binary: &str) -> StrataResult<Arc<Self>> {
        let repository = Repository::discover(path)?;
        let repo_root = repository
            .workdir()
            .ok_or_else(|| StrataError::CorruptStack("repository has no worktree".to_string()))?
            .to_path_buf();
        let dot_git = repository.path().to_path_buf();
        let config = RepoConfig::try_load(&repository)?.ok_or(StrataError::NotInitialized)?;

        let engine = Engine::new(config.engine_binary(), repo_root.clone());
        let review_engine = config
            .review_binary
            .as_deref()
            .map(|binary| Engine::new(binary, repo_root.clone()));
        let queue = OperationQueue::new(
            Engine::new(primary_binary, repo_root.clone()),
            review_engine,
            repo_root.clone(),
        );

        let (uncommitted_tx, _) = broadcast::channel(32);
        let (commits_tx, _) = broadcast::channel(32);
        let (conflicts_tx, _) = broadcast::channel(32);

        Ok(Arc::new(Self {
            repo_root,
            dot_git,
            engine,
            queue,
            runtime: tokio::runtime::Handle::current(),
            watcher: Mutex::new(None),
            snapshots: Mutex::new(Snapshots::default()),
            pending: Mutex::new(Vec::new()),
            status_gate: FetchGate::default(),
            commits_gate: FetchGate::default(),
            conflicts_gate: FetchGate::default(),
            cat_limiter: Semaphore::new(crate::constants::MAX_SIMULTANEOUS_CAT_CALLS),
            op_counter: AtomicU64::new(0),
            uncommitted_tx,
            commits_tx,
            conflicts_tx,
        }))
    }

    /// The repository root this session serves.
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Starts the filesystem watcher and performs the initial fetches (the
    /// repository may already be mid-conflict on startup).
    pub fn start_watching(self: &Arc<Self>) -> StrataResult<()> {
        let weak = Arc::downgrade(self);
        let handle = self.runtime.clone();
        let callback: ChangeCallback = Arc::new(move |kind| {
            let Some(session) = weak.upgrade() else {
                return;
            };
            handle.spawn(async move {
                session.handle_change(kind).await;
            });
        });

        let watcher = ChangeWatcher::new(&self.repo_root, callback)?;
        *self.watcher.lock().expect("watcher lock poisoned") = Some(watcher);

        let session = Arc::clone(self);
        self.runtime.spawn(async move {
            session.refresh_all().await;
        });
        Ok(())
    }

    async fn handle_change(&self, kind: ChangeKind) {
        tracing::debug!(?kind, "change notification");
        match kind {
            ChangeKind::UncommittedChanges => {
                self.fetch_uncommitted_changes().await;
            }
            ChangeKind::Commits => {
                self.fetch_smartlog_commits().await;
            }
            ChangeKind::MergeConflicts => {
                self.check_merge_conflicts().await;
            }
            ChangeKind::Everything => {
                self.refresh_all().await;
            }
        }
    }

    /// Re-fetches every snapshot kind concurrently.
    pub async fn refresh_all(&self) {
        tokio::join!(
            self.fetch_uncommitted_changes(),
            self.fetch_smartlog_commits(),
            self.check_merge_conflicts(),
        );
    }

    /* Subscriptions */

    pub fn subscribe_uncommitted_changes(
        &self,
    ) -> broadcast::Receiver<Fetched<Vec<ChangedFile>>> {
        self.uncommitted_tx.subscribe()
    }

    pub fn subscribe_smartlog_commits(&self) -> broadcast::Receiver<Fetched<Vec<BranchSnapshot>>> {
        self.commits_tx.subscribe()
    }

    pub fn subscribe_merge_conflicts(&self) -> broadcast::Receiver<Option<MergeConflicts>> {
        self.conflicts_tx.subscribe()
    }

    /// The latest confirmed merge-conflict state.
    pub fn merge_conflicts(&self) -> Option<MergeConflicts> {
        self.snapshots
            .lock()
            .expect("snapshot lock poisoned")
            .conflicts
            .clone()
    }

    /* Fetchers */

    /// Fetches the uncommitted-changes snapshot through the engine.
    pub async fn fetch_uncommitted_changes(&self) -> Fetched<Vec<ChangedFile>> {
        let observed = self.status_gate.seq.load(Ordering::Acquire);
        let _guard = self.status_gate.lock.lock().await;
        if self.status_gate.seq.load(Ordering::Acquire) != observed {
            // Someone completed a fetch while we waited; reuse it.
            if let Some(snapshot) = self
                .snapshots
                .lock()
                .expect("snapshot lock poisoned")
                .uncommitted
                .clone()
            {
                return snapshot;
            }
        }

        let fetch_started_at = now_millis();
        let result = self
            .read_status()
            .await
            .map(|status| status.files)
            .map_err(|err| {
                tracing::error!(%err, "error fetching uncommitted changes");
                err.to_string()
            });
        let fetched = Fetched {
            fetch_started_at,
            fetch_completed_at: now_millis(),
            result,
        };

        if fetched.result.is_ok() {
            self.snapshots
                .lock()
                .expect("snapshot lock poisoned")
                .uncommitted = Some(fetched.clone());
        }
        self.status_gate.seq.fetch_add(1, Ordering::Release);
        let _ = self.uncommitted_tx.send(fetched.clone());
        fetched
    }

    /// Rebuilds the smartlog snapshot from refs and metadata.
    pub async fn fetch_smartlog_commits(&self) -> Fetched<Vec<BranchSnapshot>> {
        let observed = self.commits_gate.seq.load(Ordering::Acquire);
        let _guard = self.commits_gate.lock.lock().await;
        if self.commits_gate.seq.load(Ordering::Acquire) != observed {
            if let Some(snapshot) = self
                .snapshots
                .lock()
                .expect("snapshot lock poisoned")
                .commits
                .clone()
            {
                return snapshot;
            }
        }

        let fetch_started_at = now_millis();
        let result = self.load_commits().map_err(|err| {
            tracing::error!(%err, "error fetching commits");
            err.to_string()
        });
        let fetched = Fetched {
            fetch_started_at,
            fetch_completed_at: now_millis(),
            result,
        };

        if fetched.result.is_ok() {
            self.snapshots
                .lock()
                .expect("snapshot lock poisoned")
                .commits = Some(fetched.clone());
        }
        self.commits_gate.seq.fetch_add(1, Ordering::Release);
        let _ = self.commits_tx.send(fetched.clone());
        fetched
    }

    /// Polls the merge-conflict state.
    ///
    /// A fetch failure degrades to "no conflicts" rather than wedging
    /// subscribers in a permanent loading state.
    pub async fn check_merge_conflicts(&self) -> Option<MergeConflicts> {
        let observed = self.conflicts_gate.seq.load(Ordering::Acquire);
        let _guard = self.conflicts_gate.lock.lock().await;
        if self.conflicts_gate.seq.load(Ordering::Acquire) != observed {
            return self.merge_conflicts();
        }

        let was_in_conflicts = self.merge_conflicts().is_some();
        // Fast path: nothing suggests a conflict and we were not in one.
        if !was_in_conflicts && !self.in_conflict_state() {
            self.conflicts_gate.seq.fetch_add(1, Ordering::Release);
            return None;
        }

        if !was_in_conflicts {
            // Let subscribers know full details are loading.
            self.set_conflicts(Some(MergeConflicts::Loading));
        }

        let fetch_started_at = now_millis();
        let status = match self.read_status().await {
            Ok(status) => status,
            Err(err) => {
                tracing::error!(%err, "failed to check for merge conflicts");
                // Degrade to "no conflict" so the UI is never stuck loading.
                self.set_conflicts(None);
                self.conflicts_gate.seq.fetch_add(1, Ordering::Release);
                return None;
            }
        };

        let unresolved: Vec<String> = status
            .files
            .iter()
            .filter(|file| file.status == ChangeStatus::Unresolved)
            .map(|file| file.path.clone())
            .collect();

        let next = if !self.in_conflict_state() && unresolved.is_empty() {
            None
        } else {
            let previous = self.merge_conflicts();
            Some(MergeConflicts::Loaded {
                files: merge_conflict_files(previous.as_ref(), &unresolved),
                fetch_started_at,
                fetch_completed_at: now_millis(),
            })
        };
        tracing::info!(
            in_conflicts = next.is_some(),
            "merge conflict state refreshed"
        );
        self.set_conflicts(next.clone());
        self.conflicts_gate.seq.fetch_add(1, Ordering::Release);
        next
    }

    fn set_conflicts(&self, conflicts: Option<MergeConflicts>) {
        self.snapshots
            .lock()
            .expect("snapshot lock poisoned")
            .conflicts = conflicts.clone();
        let _ = self.conflicts_tx.send(conflicts);
    }

    /// Whether git's own state says a rebase or merge is underway.
    fn in_conflict_state(&self) -> bool {
        self.dot_git.join("rebase-merge").exists()
            || self.dot_git.join("rebase-apply").exists()
            || self.dot_git.join("MERGE_HEAD").exists()
    }

    async fn read_status(&self) -> StrataResult<StatusOutput> {
        let output = self.engine.run(&["status", "--porcelain"]).await?;
        if !output.success() {
            return Err(StrataError::EngineFailure {
                command: "status --porcelain".to_string(),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(parse_status(&output.stdout))
    }

    fn load_commits(&self) -> StrataResult<Vec<BranchSnapshot>> {
        let repository = Repository::open(&self.repo_root)?;
        let config = RepoConfig::try_load(&repository)?.ok_or(StrataError::NotInitialized)?;
        let store = BranchMetadataStore::new(&repository);
        let graph = StackGraph::build(&repository, &store, &config)?;
        let current = graph.current_branch().map(str::to_string);

        let mut commits = Vec::new();
        for name in graph.branches() {
            let Some(node) = graph.get(&name) else {
                continue;
            };
            let commit = repository.find_commit(git2::Oid::from_str(&node.revision)?)?;
            let message = commit.message().unwrap_or_default();
            let (title, description) = message.split_once('\n').unwrap_or((message, ""));
            commits.push(BranchSnapshot {
                name: name.clone(),
                title: title.trim().to_string(),
                description: description.trim().to_string(),
                author: commit.author().name().unwrap_or_default().to_string(),
                date_millis: commit.time().seconds() * 1000,
                parent: node.parent.clone(),
                is_head: current.as_deref() == Some(name.as_str()),
                is_trunk: graph.is_trunk(&name),
                needs_restack: graph.needs_restack(&name),
            });
        }
        Ok(commits)
    }

    /* Operations */

    /// Queues a mutating operation. The returned id can abort it; the future
    /// resolves when the operation exits (or is aborted in queue), after the
    /// forced re-poll of on-disk state.
    pub async fn run_operation(
        &self,
        op: StackOp,
        progress: ProgressSender,
    ) -> StrataResult<OperationExit> {
        let id = self.next_operation_id();
        let runnable = RunnableOperation {
            id: id.clone(),
            args: op.args(),
            stdin: None,
            runner: op.runner(),
        };
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .push(PendingOperation { id: id.clone(), op });
        self.run_runnable(runnable, progress).await
    }

    /// Hook for code-review-provider integrations: queues an operation that
    /// runs through the configured review binary instead of the primary
    /// engine. No speculation is composed for these.
    pub async fn run_review_operation(
        &self,
        args: Vec<CommandArg>,
        progress: ProgressSender,
    ) -> StrataResult<OperationExit> {
        let runnable = RunnableOperation {
            id: self.next_operation_id(),
            args,
            stdin: None,
            runner: OperationRunner::ExternalReviewProvider,
        };
        self.run_runnable(runnable, progress).await
    }

    fn next_operation_id(&self) -> String {
        format!("op-{}", self.op_counter.fetch_add(1, Ordering::Relaxed) + 1)
    }

    async fn run_runnable(
        &self,
        runnable: RunnableOperation,
        progress: ProgressSender,
    ) -> StrataResult<OperationExit> {
        let id = runnable.id.clone();
        let result = self.queue.run_or_queue(runnable, progress).await;

        // Force an immediate re-poll so the session never shows stale
        // optimistic state once ground truth is available.
        if !matches!(result, Ok(OperationExit::AbortedInQueue)) {
            self.refresh_all().await;
        }
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .retain(|pending| pending.id != id);
        result
    }

    /// Aborts a running or queued operation by id.
    pub fn abort_operation(&self, operation_id: &str) {
        self.queue.abort(operation_id);
    }

    /// Asks the watcher for an immediate, debounce-free re-fetch.
    pub fn poll_force(&self) {
        if let Some(watcher) = self
            .watcher
            .lock()
            .expect("watcher lock poisoned")
            .as_ref()
        {
            watcher.poll_force();
        }
    }

    /// Ids of the running and queued operations, in order.
    pub fn pending_operation_ids(&self) -> Vec<String> {
        self.queue.pending_ids()
    }

    /// The speculative view: the last confirmed snapshots with every pending
    /// operation's prediction applied in submission order.
    pub fn speculative_view(&self) -> SpeculativeView {
        let (commits, uncommitted) = {
            let snapshots = self.snapshots.lock().expect("snapshot lock poisoned");
            (
                snapshots
                    .commits
                    .as_ref()
                    .and_then(|fetched| fetched.result.as_ref().ok().cloned())
                    .unwrap_or_default(),
                snapshots
                    .uncommitted
                    .as_ref()
                    .and_then(|fetched| fetched.result.as_ref().ok().cloned())
                    .unwrap_or_default(),
            )
        };
        let ops: Vec<StackOp> = self
            .pending
            .lock()
            .expect("pending lock poisoned")
            .iter()
            .map(|pending| pending.op.clone())
            .collect();
        overlay::speculate(&commits, &uncommitted, &ops)
    }

    /// Returns file content at a revision through the engine. Bounded by a
    /// small fixed concurrency ceiling.
    pub async fn cat(&self, path: &str, revision: Option<&str>) -> StrataResult<String> {
        let _permit = match self.cat_limiter.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return Err(StrataError::EngineFailure {
                    command: "show".to_string(),
                    stderr: "session closed".to_string(),
                })
            }
        };
        let spec = format!("{}:{path}", revision.unwrap_or("HEAD"));
        let output = self.engine.run(&["show", spec.as_str()]).await?;
        if !output.success() {
            return Err(StrataError::EngineFailure {
                command: format!("show {spec}"),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

/// Reference-counted cache of sessions keyed by repository root. Not a
/// singleton; embedders create as many caches as they need.
#[derive(Default)]
pub struct SessionCache {
    sessions: Mutex<HashMap<PathBuf, Weak<RepoSession>>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live session for the repository containing `path`,
    /// creating one if none exists. Dropped sessions fall out of the cache.
    pub fn get_or_create(&self, path: &Path) -> StrataResult<Arc<RepoSession>> {
        let canonical = path.canonicalize()?;
        let mut sessions = self.sessions.lock().expect("session cache lock poisoned");
        if let Some(existing) = sessions.get(&canonical).and_then(Weak::upgrade) {
            return Ok(existing);
        }
        let session = RepoSession::open(&canonical)?;
        sessions.insert(canonical, Arc::downgrade(&session));
        Ok(session)
    }
}

struct StatusOutput {
    files: Vec<ChangedFile>,
}

/// Parses `git status --porcelain` output.
fn parse_status(stdout: &str) -> StatusOutput {
    let mut files = Vec::new();
    for line in stdout.lines() {
        if line.len() < 4 {
            continue;
        }
        let code = &line[..2];
        let rest = &line[3..];
        // Renames list both sides; the new path is the interesting one.
        let path = rest.split(" -> ").last().unwrap_or(rest).to_string();

        let status = if UNMERGED_CODES.contains(code) {
            ChangeStatus::Unresolved
        } else if code == "??" {
            ChangeStatus::Untracked
        } else {
            match code.trim().chars().next() {
                Some('A') => ChangeStatus::Added,
                Some('D') => ChangeStatus::Removed,
                Some('R') => ChangeStatus::Renamed,
                Some('C') => ChangeStatus::Copied,
                _ => ChangeStatus::Modified,
            }
        };
        files.push(ChangedFile { path, status });
    }
    StatusOutput { files }
}

/// Builds the next conflict file list, preserving the previous ordering so a
/// file keeps its position after flipping to RESOLVED.
fn merge_conflict_files(
    previous: Option<&MergeConflicts>,
    unresolved: &[String],
) -> Vec<ChangedFile> {
    let unresolved_set: HashSet<&str> = unresolved.iter().map(String::as_str).collect();
    match previous {
        Some(MergeConflicts::Loaded { files, .. }) if !files.is_empty() => files
            .iter()
            .map(|file| ChangedFile {
                path: file.path.clone(),
                status: if unresolved_set.contains(file.path.as_str()) {
                    ChangeStatus::Unresolved
                } else {
                    ChangeStatus::Resolved
                },
            })
            .collect(),
        _ => unresolved
            .iter()
            .map(|path| ChangedFile {
                path: path.clone(),
                status: ChangeStatus::Unresolved,
            })
            .collect(),
    }
}
