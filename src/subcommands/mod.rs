//! The subcommands for the `strata` application.

use crate::ctx::{RestackReport, RestackStatus, StrataContext};
use anyhow::Result;
use clap::Subcommand;
use nu_ansi_term::Color;

mod amend;
mod cat;
mod checkout;
mod create;
mod delete;
mod fix;
mod fold;
mod log;
mod onto;
mod restack;
mod track;
mod validate;
mod watch;

#[derive(Debug, Clone, Eq, PartialEq, Subcommand)]
pub enum Subcommands {
    /// Create a new branch stacked on top of the current branch.
    #[clap(alias = "c")]
    Create(create::CreateCmd),
    /// Start tracking the current branch by picking its stack parent.
    #[clap(alias = "tr")]
    Track(track::TrackCmd),
    /// Checkout a branch that is tracked with `strata`.
    #[clap(alias = "co")]
    Checkout(checkout::CheckoutCmd),
    /// Print a tree of all tracked stacks.
    #[clap(aliases = ["l", "ls"])]
    Log(log::LogCmd),
    /// Delete a branch, splicing its children onto its parent.
    #[clap(alias = "d")]
    Delete(delete::DeleteCmd),
    /// Rebase a branch and its descendants onto its tracked parent.
    #[clap(alias = "r")]
    Restack(restack::RestackCmd),
    /// Move a branch (and its descendants) onto a new base branch.
    Onto(onto::OntoCmd),
    /// Fold a branch's commits into its parent.
    Fold(fold::FoldCmd),
    /// Amend the current branch's tip commit and restack its descendants.
    #[clap(alias = "a")]
    Amend(amend::AmendCmd),
    /// Check that the tracked stack matches the repository's real ancestry.
    Validate(validate::ValidateCmd),
    /// Repair tracked metadata from the repository's real ancestry.
    Fix(fix::FixCmd),
    /// Print file contents at a revision.
    Cat(cat::CatCmd),
    /// Watch the repository and live-render the stack as it changes.
    #[clap(alias = "w")]
    Watch(watch::WatchCmd),
}

impl Subcommands {
    /// Run the subcommand with the given context.
    pub async fn run(self, ctx: StrataContext<'_>) -> Result<()> {
        match self {
            Self::Create(cmd) => cmd.run(ctx).await,
            Self::Track(cmd) => cmd.run(ctx),
            Self::Checkout(cmd) => cmd.run(ctx),
            Self::Log(cmd) => cmd.run(ctx),
            Self::Delete(cmd) => cmd.run(ctx).await,
            Self::Restack(cmd) => cmd.run(ctx).await,
            Self::Onto(cmd) => cmd.run(ctx).await,
            Self::Fold(cmd) => cmd.run(ctx).await,
            Self::Amend(cmd) => cmd.run(ctx).await,
            Self::Validate(cmd) => cmd.run(ctx),
            Self::Fix(cmd) => cmd.run(ctx),
            Self::Cat(cmd) => cmd.run(ctx).await,
            Self::Watch(cmd) => cmd.run(ctx).await,
        }
    }
}

/// Prints per-branch outcomes and converts the first failure, if any, into
/// the process's error.
pub(crate) fn finish_report(report: &RestackReport) -> Result<()> {
    for outcome in &report.outcomes {
        let label = match &outcome.status {
            RestackStatus::Restacked => Color::Green.paint("restacked"),
            RestackStatus::UpToDate => Color::Blue.paint("up to date"),
            RestackStatus::Failed(_) => Color::Red.bold().paint("conflict"),
            RestackStatus::Skipped => Color::Yellow.paint("skipped"),
        };
        match &outcome.status {
            RestackStatus::Failed(message) => {
                println!("{label}  {} ({message})", outcome.branch)
            }
            _ => println!("{label}  {}", outcome.branch),
        }
    }
    if let Some(err) = report.error() {
        return Err(err.into());
    }
    Ok(())
}

/// Restores the originally checked-out branch if it still exists.
pub(crate) fn restore_checkout(ctx: &StrataContext<'_>, original: &str) -> Result<()> {
    use crate::git::RepositoryExt;
    if ctx.graph().get(original).is_some() {
        ctx.repository.checkout_branch(original)?;
    }
    Ok(())
}
