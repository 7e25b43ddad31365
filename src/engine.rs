//! The process boundary: spawning the external engine binary, streaming its
//! output, and resolving typed argument placeholders.
//!
//! Everything that mutates the repository goes through [Engine::execute]; the
//! rest of the application only ever sees the captured output and exit code.

use crate::errors::{StrataError, StrataResult};
use std::{
    path::{Component, Path, PathBuf},
    process::Stdio,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::Command,
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;

/// A single argument to an engine command.
///
/// Most arguments are literal strings. File paths and revsets are carried as
/// typed placeholders and resolved at execution time, not at enqueue time, so
/// queued operations act on the state of the repository as of when they run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandArg {
    /// A literal argument token.
    Plain(String),
    /// A path relative to the repository root, rewritten to be relative to
    /// the execution cwd when the command is spawned.
    RepoRelativeFile(PathBuf),
    /// A revset rewritten to the latest successor of that revset, evaluated
    /// by the engine itself. This lets queued commands act on optimistic
    /// revisions without knowing their final hashes.
    SucceedableRevset(String),
}

impl CommandArg {
    /// Shorthand for a literal argument.
    pub fn plain(arg: impl Into<String>) -> Self {
        Self::Plain(arg.into())
    }
}

impl From<&str> for CommandArg {
    fn from(arg: &str) -> Self {
        Self::Plain(arg.to_string())
    }
}

/// Resolves placeholder arguments into literal argv tokens.
///
/// Called when an operation is dequeued, immediately before spawning.
pub fn resolve_args(args: &[CommandArg], cwd: &Path, repo_root: &Path) -> Vec<String> {
    args.iter()
        .map(|arg| match arg {
            CommandArg::Plain(s) => s.clone(),
            CommandArg::RepoRelativeFile(path) => {
                relative_path(cwd, &repo_root.join(path)).display().to_string()
            }
            CommandArg::SucceedableRevset(revset) => format!("max(successors({revset}))"),
        })
        .collect()
}

/// Computes `target` relative to `base`. Both paths must be absolute.
fn relative_path(base: &Path, target: &Path) -> PathBuf {
    let base_components: Vec<Component> = base.components().collect();
    let target_components: Vec<Component> = target.components().collect();

    let shared = base_components
        .iter()
        .zip(target_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in shared..base_components.len() {
        relative.push("..");
    }
    for component in &target_components[shared..] {
        relative.push(component);
    }
    relative
}

/// A line of output streamed from a running engine process.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Stdout(String),
    Stderr(String),
}

/// Captured result of a completed engine process.
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl EngineOutput {
    /// Whether the process exited with status zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Handle for spawning one particular external binary against one repository.
#[derive(Debug, Clone)]
pub struct Engine {
    /// The binary to spawn, e.g. `git` or the stack CLI itself.
    binary: String,
    /// Working directory commands are spawned in.
    cwd: PathBuf,
}

impl Engine {
    /// Creates an engine handle for `binary`, running commands in `cwd`.
    pub fn new(binary: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            cwd: cwd.into(),
        }
    }

    /// The working directory commands are spawned in.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Spawns the engine with `args`, streaming output lines into `events`
    /// as they arrive and returning the captured output once the process
    /// exits.
    ///
    /// Cancelling `cancel` kills the process; the call still resolves with
    /// whatever exit code the termination produced rather than erroring.
    /// A failure to spawn at all surfaces as [StrataError::ProcessSpawn].
    pub async fn execute(
        &self,
        args: &[String],
        stdin: Option<&str>,
        cancel: &CancellationToken,
        events: Option<mpsc::UnboundedSender<EngineEvent>>,
    ) -> StrataResult<EngineOutput> {
        tracing::debug!(binary = %self.binary, ?args, "spawning engine command");

        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .current_dir(&self.cwd)
            // Keep the engine non-interactive even when the user's git config
            // would open an editor mid-rebase.
            .env("GIT_EDITOR", "true")
            .env("LANG", "en_US.utf-8")
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| StrataError::ProcessSpawn {
            command: format!("{} {}", self.binary, args.join(" ")),
            source,
        })?;

        if let Some(input) = stdin {
            if let Some(mut handle) = child.stdin.take() {
                handle.write_all(input.as_bytes()).await?;
                // Dropping the handle closes the pipe so the child sees EOF.
            }
        }

        let stdout_task = child.stdout.take().map(|stdout| {
            let events = events.clone();
            tokio::spawn(read_stream(stdout, events, false))
        });
        let stderr_task = child.stderr.take().map(|stderr| {
            let events = events.clone();
            tokio::spawn(read_stream(stderr, events, true))
        });

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                tracing::info!(binary = %self.binary, "killing engine command on abort");
                let _ = child.kill().await;
                child.wait().await?
            }
        };

        let stdout = match stdout_task {
            Some(task) => task.await.map_err(std::io::Error::other)?,
            None => String::new(),
        };
        let stderr = match stderr_task {
            Some(task) => task.await.map_err(std::io::Error::other)?,
            None => String::new(),
        };

        let exit_code = status.code().unwrap_or(-1);
        tracing::debug!(binary = %self.binary, exit_code, "engine command exited");

        Ok(EngineOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    /// Convenience wrapper for plain, non-streamed, non-cancellable calls.
    pub async fn run(&self, args: &[&str]) -> StrataResult<EngineOutput> {
        let args: Vec<String> = args.iter().map(ToString::to_string).collect();
        self.execute(&args, None, &CancellationToken::new(), None).await
    }
}

/// Reads a child stream to EOF, forwarding each line and collecting the full
/// text.
async fn read_stream<R>(
    stream: R,
    events: Option<mpsc::UnboundedSender<EngineEvent>>,
    is_stderr: bool,
) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    let mut collected = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(events) = &events {
            let event = if is_stderr {
                EngineEvent::Stderr(line.clone())
            } else {
                EngineEvent::Stdout(line.clone())
            };
            // A closed receiver just means nobody is listening anymore.
            let _ = events.send(event);
        }
        collected.push_str(&line);
        collected.push('\n');
    }
    collected
}
