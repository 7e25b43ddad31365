//! `watch` subcommand: a live, self-refreshing view of the stack.
//!
//! Subscribes to the session's snapshot streams and re-renders whenever
//! ground truth changes. Simple commands on stdin are queued as operations,
//! so their predicted effect shows up immediately and is replaced by the real
//! tree once the engine process exits.

use crate::{
    constants::{COLORS, EMPTY_CIRCLE, FILLED_CIRCLE},
    ctx::StrataContext,
    engine::CommandArg,
    overlay::{BranchSnapshot, ChangeStatus, SpeculativeView, StackOp},
    queue::OperationProgress,
    session::{MergeConflicts, RepoSession, SessionCache},
};
use anyhow::{anyhow, Result};
use clap::Args;
use nu_ansi_term::Color;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

const COMMANDS: &str = "commands: checkout <branch> | create <title> | amend <title> | \
                        restack [branch] | onto <base> [branch] | fold [branch] [--keep] | \
                        delete <branch> | review <args> | abort <op-id> | refresh | quit";

/// CLI arguments for the `watch` subcommand.
#[derive(Debug, Clone, Eq, PartialEq, Args)]
pub struct WatchCmd;

impl WatchCmd {
    /// Run the `watch` subcommand.
    pub async fn run(self, ctx: StrataContext<'_>) -> Result<()> {
        let workdir = ctx
            .repository
            .workdir()
            .ok_or_else(|| anyhow!("Repository has no worktree."))?
            .to_path_buf();

        let cache = SessionCache::new();
        let session = cache.get_or_create(&workdir)?;
        session.start_watching()?;

        let mut commits_rx = session.subscribe_smartlog_commits();
        let mut changes_rx = session.subscribe_uncommitted_changes();
        let mut conflicts_rx = session.subscribe_merge_conflicts();
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();

        println!("Watching `{}`. {COMMANDS}", workdir.display());

        loop {
            tokio::select! {
                result = commits_rx.recv() => {
                    if let Ok(fetched) = result {
                        tracing::debug!(
                            elapsed_ms = fetched.fetch_completed_at.saturating_sub(fetched.fetch_started_at),
                            "commits refreshed"
                        );
                        render(&session);
                    }
                }
                result = changes_rx.recv() => {
                    if let Ok(fetched) = result {
                        tracing::debug!(
                            elapsed_ms = fetched.fetch_completed_at.saturating_sub(fetched.fetch_started_at),
                            "uncommitted changes refreshed"
                        );
                        render(&session);
                    }
                }
                result = conflicts_rx.recv() => {
                    if result.is_ok() {
                        render(&session);
                    }
                }
                line = stdin.next_line() => {
                    match line? {
                        None => break,
                        Some(line) => {
                            if !handle_command(&session, line.trim()) {
                                break;
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Parses one stdin command. Returns `false` when the watch loop should exit.
fn handle_command(session: &Arc<RepoSession>, line: &str) -> bool {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let op = match tokens.as_slice() {
        [] => return true,
        ["quit"] | ["q"] => return false,
        ["refresh"] => {
            session.poll_force();
            return true;
        }
        ["abort", id] => {
            session.abort_operation(id);
            return true;
        }
        ["review", args @ ..] if !args.is_empty() => {
            // `file:` and `revset:` prefixes become typed placeholders, so
            // the provider sees cwd-relative paths and resolved revsets.
            let args: Vec<CommandArg> = args
                .iter()
                .map(|arg| {
                    if let Some(path) = arg.strip_prefix("file:") {
                        CommandArg::RepoRelativeFile(std::path::PathBuf::from(path))
                    } else if let Some(revset) = arg.strip_prefix("revset:") {
                        CommandArg::SucceedableRevset(revset.to_string())
                    } else {
                        CommandArg::plain(*arg)
                    }
                })
                .collect();
            let session = Arc::clone(session);
            tokio::spawn(async move {
                let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
                let printer = tokio::spawn(async move {
                    while let Some(progress) = rx.recv().await {
                        if let OperationProgress::Stdout { message, .. } = progress {
                            println!("{message}");
                        }
                    }
                });
                if let Err(err) = session.run_review_operation(args, tx).await {
                    eprintln!("{}", Color::Red.paint(err.to_string()));
                }
                let _ = printer.await;
            });
            return true;
        }
        ["checkout", branch] | ["co", branch] => StackOp::Goto {
            branch: (*branch).to_string(),
        },
        ["create", title @ ..] if !title.is_empty() => {
            let Some(original_head) = current_head(session) else {
                return true;
            };
            StackOp::CreateBranch {
                title: title.join(" "),
                original_head,
            }
        }
        ["amend", title @ ..] if !title.is_empty() => StackOp::Amend {
            title: Some(title.join(" ")),
            description: None,
        },
        ["restack"] => match current_head(session) {
            Some(branch) => StackOp::Restack { branch },
            None => return true,
        },
        ["restack", branch] => StackOp::Restack {
            branch: (*branch).to_string(),
        },
        ["onto", onto] => match current_head(session) {
            Some(branch) => StackOp::RestackOnto {
                branch,
                onto: (*onto).to_string(),
            },
            None => return true,
        },
        ["onto", onto, branch] => StackOp::RestackOnto {
            branch: (*branch).to_string(),
            onto: (*onto).to_string(),
        },
        ["fold", rest @ ..] => {
            let keep = rest.contains(&"--keep");
            let branch = rest
                .iter()
                .find(|token| !token.starts_with("--"))
                .map(|token| (*token).to_string())
                .or_else(|| current_head(session));
            match branch {
                Some(branch) => StackOp::Fold { branch, keep },
                None => return true,
            }
        }
        ["delete", branch] => StackOp::DeleteBranch {
            branch: (*branch).to_string(),
        },
        _ => {
            println!("Unknown command: `{line}`. {COMMANDS}");
            return true;
        }
    };

    // Queue the operation and render its speculation right away; the queue
    // resolves it in the background.
    let session = Arc::clone(session);
    tokio::spawn(async move {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let printer = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                while let Some(progress) = rx.recv().await {
                    match progress {
                        OperationProgress::Queue { id, queue } => {
                            println!(
                                "operation {id} queued behind {}",
                                queue.len().saturating_sub(1)
                            )
                        }
                        // The operation is registered by now; show its
                        // speculation immediately.
                        OperationProgress::Spawn { .. } => render(&session),
                        OperationProgress::Stderr { message, .. } => {
                            eprintln!("{}", Color::Red.paint(message))
                        }
                        OperationProgress::Exit { id, exit_code, .. } => {
                            println!("operation {id} exited with {exit_code}")
                        }
                        _ => {}
                    }
                }
            })
        };
        if let Err(err) = session.run_operation(op, tx).await {
            eprintln!("{}", Color::Red.paint(err.to_string()));
        }
        let _ = printer.await;
        render(&session);
    });
    true
}

fn current_head(session: &Arc<RepoSession>) -> Option<String> {
    session
        .speculative_view()
        .commits
        .iter()
        .find(|commit| commit.is_head)
        .map(|commit| commit.name.clone())
}

/// Renders the speculative view: the confirmed tree plus any predictions for
/// operations still in flight.
fn render(session: &Arc<RepoSession>) {
    let view = session.speculative_view();
    println!();
    for root in view.commits.iter().filter(|commit| commit.is_trunk) {
        print_subtree(&view, root, 0);
    }

    match session.merge_conflicts() {
        Some(MergeConflicts::Loading) => {
            println!("{}", Color::Yellow.paint("conflicts: loading..."))
        }
        Some(MergeConflicts::Loaded {
            files,
            fetch_started_at,
            fetch_completed_at,
        }) => {
            tracing::debug!(
                elapsed_ms = fetch_completed_at.saturating_sub(fetch_started_at),
                "conflicts refreshed"
            );
            for file in files {
                let label = match file.status {
                    ChangeStatus::Unresolved => Color::Red.paint("U"),
                    _ => Color::Green.paint("R"),
                };
                println!("{label} {}", file.path);
            }
        }
        None => {}
    }
    if !view.uncommitted.is_empty() {
        println!("{} uncommitted change(s)", view.uncommitted.len());
    }
    let pending = session.pending_operation_ids();
    if !pending.is_empty() {
        println!("pending: {}", pending.join(", "));
    }
}

fn print_subtree(view: &SpeculativeView, commit: &BranchSnapshot, depth: usize) {
    let icon = if commit.is_head {
        FILLED_CIRCLE
    } else {
        EMPTY_CIRCLE
    };
    let color = COLORS[depth % COLORS.len()];
    let annotation = if commit.needs_restack {
        " (needs restack)"
    } else {
        ""
    };
    println!(
        "{:indent$}{} {}{annotation}",
        "",
        color.paint(icon.to_string()),
        color.paint(format!("{}: {}", commit.name, commit.title)),
        indent = depth * 2
    );
    for child in view
        .commits
        .iter()
        .filter(|candidate| candidate.parent.as_deref() == Some(commit.name.as_str()))
    {
        print_subtree(view, child, depth + 1);
    }
}
