//! Serializes mutating operations against a single external-process slot.
//!
//! At most one operation runs per repository session; the rest wait in FIFO
//! order. Queued operations report their position, can be aborted before they
//! ever spawn, and resolve their placeholder arguments only when dequeued so
//! they act on the repository state as of execution time.

use crate::{
    engine::{resolve_args, CommandArg, Engine, EngineEvent},
    errors::{StrataError, StrataResult},
};
use std::{
    collections::VecDeque,
    path::PathBuf,
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Which process executes an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationRunner {
    /// The primary stack engine.
    PrimaryEngine,
    /// The configured external review provider, if any.
    ExternalReviewProvider,
}

/// A request to mutate the repository. Never reused after it exits.
#[derive(Debug, Clone)]
pub struct RunnableOperation {
    /// Unique per request.
    pub id: String,
    /// Argument tokens; placeholders resolve at dequeue time.
    pub args: Vec<CommandArg>,
    /// Optional text piped to the process's stdin.
    pub stdin: Option<String>,
    /// Which binary runs this operation.
    pub runner: OperationRunner,
}

/// Progress events streamed while an operation is queued and running.
#[derive(Debug, Clone)]
pub enum OperationProgress {
    /// Another operation is running; this one has been queued. Carries the
    /// full queue state.
    Queue { id: String, queue: Vec<String> },
    /// The process has been started. Also serves as the dequeue notification.
    Spawn { id: String, queue: Vec<String> },
    Stdout { id: String, message: String },
    Stderr { id: String, message: String },
    Exit { id: String, exit_code: i32, timestamp: u64 },
    /// The process failed to start.
    Error { id: String, error: String },
}

/// How an operation left the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationExit {
    /// The process ran and exited (including after an abort signal).
    Completed { exit_code: i32 },
    /// The operation was aborted while still queued; no process was spawned.
    AbortedInQueue,
}

/// Sink for [OperationProgress] events.
pub type ProgressSender = mpsc::UnboundedSender<OperationProgress>;

struct RunningOperation {
    id: String,
    cancel: CancellationToken,
}

struct QueuedOperation {
    id: String,
    start: oneshot::Sender<()>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    running: Option<RunningOperation>,
    queued: VecDeque<QueuedOperation>,
}

impl QueueState {
    fn queued_ids(&self) -> Vec<String> {
        self.queued.iter().map(|entry| entry.id.clone()).collect()
    }
}

/// The single serialization point for mutating commands in a session.
pub struct OperationQueue {
    engine: Engine,
    review_engine: Option<Engine>,
    repo_root: PathBuf,
    state: Mutex<QueueState>,
}

impl OperationQueue {
    /// Creates a queue dispatching to `engine`, with an optional review
    /// provider binary.
    pub fn new(engine: Engine, review_engine: Option<Engine>, repo_root: PathBuf) -> Self {
        Self {
            engine,
            review_engine,
            repo_root,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Runs `operation` immediately if the slot is free, otherwise queues it.
    /// Resolves once the process exits or the operation is aborted.
    pub async fn run_or_queue(
        &self,
        operation: RunnableOperation,
        progress: ProgressSender,
    ) -> StrataResult<OperationExit> {
        let cancel = CancellationToken::new();

        let wait = {
            let mut state = self.state.lock().expect("queue lock poisoned");
            if state.running.is_none() {
                state.running = Some(RunningOperation {
                    id: operation.id.clone(),
                    cancel: cancel.clone(),
                });
                None
            } else {
                let (start, started) = oneshot::channel();
                state.queued.push_back(QueuedOperation {
                    id: operation.id.clone(),
                    start,
                    cancel: cancel.clone(),
                });
                let _ = progress.send(OperationProgress::Queue {
                    id: operation.id.clone(),
                    queue: state.queued_ids(),
                });
                Some(started)
            }
        };

        if let Some(started) = wait {
            if started.await.is_err() {
                // Our start sender was dropped: aborted while queued. The
                // process is never spawned.
                tracing::info!(id = %operation.id, "operation aborted while queued");
                return Ok(OperationExit::AbortedInQueue);
            }
        }

        let result = self.execute(&operation, &cancel, &progress).await;
        self.finish();
        result
    }

    /// Aborts the operation with the given id, whether running or queued.
    ///
    /// A running operation has its process signalled; the awaiting caller
    /// resolves with whatever exit code the termination produced. A queued
    /// operation is removed without ever spawning.
    pub fn abort(&self, operation_id: &str) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        if let Some(running) = &state.running {
            if running.id == operation_id {
                tracing::info!(id = %operation_id, "aborting running operation");
                running.cancel.cancel();
                return;
            }
        }
        // Dropping the entry drops its start sender, which resolves the
        // caller's future as aborted.
        state.queued.retain(|entry| entry.id != operation_id);
    }

    /// Ids of the running operation (first) and everything queued behind it.
    pub fn pending_ids(&self) -> Vec<String> {
        let state = self.state.lock().expect("queue lock poisoned");
        let mut ids: Vec<String> = state
            .running
            .as_ref()
            .map(|running| running.id.clone())
            .into_iter()
            .collect();
        ids.extend(state.queued_ids());
        ids
    }

    async fn execute(
        &self,
        operation: &RunnableOperation,
        cancel: &CancellationToken,
        progress: &ProgressSender,
    ) -> StrataResult<OperationExit> {
        let engine = match operation.runner {
            OperationRunner::PrimaryEngine => &self.engine,
            OperationRunner::ExternalReviewProvider => match &self.review_engine {
                Some(engine) => engine,
                None => {
                    let _ = progress.send(OperationProgress::Error {
                        id: operation.id.clone(),
                        error: StrataError::NoReviewProvider.to_string(),
                    });
                    return Err(StrataError::NoReviewProvider);
                }
            },
        };

        // Placeholders reflect the state of the repository as of execution,
        // not as of the original request.
        let args = resolve_args(&operation.args, engine.cwd(), &self.repo_root);

        let queue = {
            let state = self.state.lock().expect("queue lock poisoned");
            state.queued_ids()
        };
        let _ = progress.send(OperationProgress::Spawn {
            id: operation.id.clone(),
            queue,
        });

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let forwarder = {
            let progress = progress.clone();
            let id = operation.id.clone();
            tokio::spawn(async move {
                while let Some(event) = events_rx.recv().await {
                    let event = match event {
                        EngineEvent::Stdout(message) => OperationProgress::Stdout {
                            id: id.clone(),
                            message,
                        },
                        EngineEvent::Stderr(message) => OperationProgress::Stderr {
                            id: id.clone(),
                            message,
                        },
                    };
                    let _ = progress.send(event);
                }
            })
        };

        let result = engine
            .execute(&args, operation.stdin.as_deref(), cancel, Some(events_tx))
            .await;
        // Drain the stream before reporting the exit so output events are
        // never observed after it.
        let _ = forwarder.await;

        match result {
            Ok(output) => {
                let _ = progress.send(OperationProgress::Exit {
                    id: operation.id.clone(),
                    exit_code: output.exit_code,
                    timestamp: now_millis(),
                });
                Ok(OperationExit::Completed {
                    exit_code: output.exit_code,
                })
            }
            Err(err) => {
                let _ = progress.send(OperationProgress::Error {
                    id: operation.id.clone(),
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Releases the running slot and promotes the next queued operation.
    fn finish(&self) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        state.running = None;
        if let Some(next) = state.queued.pop_front() {
            state.running = Some(RunningOperation {
                id: next.id.clone(),
                cancel: next.cancel.clone(),
            });
            let _ = next.start.send(());
        }
    }
}

/// Milliseconds since the epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod test {
    use super::*;
    use std::{sync::Arc, time::Duration};

    fn shell_queue() -> OperationQueue {
        let dir = std::env::temp_dir();
        OperationQueue::new(Engine::new("sh", dir.clone()), None, dir)
    }

    fn shell_op(id: &str, script: String) -> RunnableOperation {
        RunnableOperation {
            id: id.to_string(),
            args: vec![CommandArg::plain("-c"), CommandArg::plain(script)],
            stdin: None,
            runner: OperationRunner::PrimaryEngine,
        }
    }

    #[tokio::test]
    async fn executes_in_submission_order() {
        let queue = Arc::new(shell_queue());
        let marker = tempfile::NamedTempFile::new().unwrap();
        let path = marker.path().display().to_string();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handles = Vec::new();
        for id in ["x", "y", "z"] {
            let queue = Arc::clone(&queue);
            let op = shell_op(id, format!("echo {id} >> {path}; sleep 0.05"));
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                queue.run_or_queue(op, tx).await.unwrap()
            }));
            // Give each submission time to register before the next.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), OperationExit::Completed { exit_code: 0 });
        }

        let order = std::fs::read_to_string(marker.path()).unwrap();
        assert_eq!(order, "x\ny\nz\n");

        // y saw a queue event before its spawn event.
        drop(tx);
        let mut y_events = Vec::new();
        while let Some(event) = rx.recv().await {
            let about_y = match &event {
                OperationProgress::Queue { id, .. } | OperationProgress::Spawn { id, .. } => {
                    id == "y"
                }
                _ => false,
            };
            if about_y {
                y_events.push(event);
            }
        }
        assert!(matches!(y_events.first(), Some(OperationProgress::Queue { .. })));
        assert!(matches!(y_events.last(), Some(OperationProgress::Spawn { .. })));
    }

    #[tokio::test]
    async fn aborting_a_queued_operation_never_spawns_it() {
        let queue = Arc::new(shell_queue());
        let marker = std::env::temp_dir().join(format!("strata-queue-test-{}", now_millis()));
        let path = marker.display().to_string();

        let (tx, _rx) = mpsc::unbounded_channel();
        let running = {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            tokio::spawn(async move {
                queue
                    .run_or_queue(shell_op("x", "sleep 0.3".to_string()), tx)
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let queued = {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            tokio::spawn(async move {
                queue
                    .run_or_queue(shell_op("y", format!("echo ran >> {path}")), tx)
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        queue.abort("y");
        assert_eq!(queued.await.unwrap(), OperationExit::AbortedInQueue);
        assert_eq!(running.await.unwrap(), OperationExit::Completed { exit_code: 0 });
        // y's process never ran.
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn aborting_the_running_operation_resolves_with_its_exit_code() {
        let queue = Arc::new(shell_queue());
        let (tx, _rx) = mpsc::unbounded_channel();

        let running = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .run_or_queue(shell_op("slow", "sleep 30".to_string()), tx)
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        queue.abort("slow");
        match tokio::time::timeout(Duration::from_secs(5), running).await {
            Ok(Ok(OperationExit::Completed { exit_code })) => assert_ne!(exit_code, 0),
            other => panic!("unexpected abort result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn review_runner_without_provider_errors_without_running() {
        let queue = shell_queue();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut op = shell_op("review", "echo nope".to_string());
        op.runner = OperationRunner::ExternalReviewProvider;
        let err = queue.run_or_queue(op, tx).await.unwrap_err();
        assert!(matches!(err, StrataError::NoReviewProvider));
        assert!(matches!(rx.recv().await, Some(OperationProgress::Error { .. })));
    }
}
