//! `fold` subcommand.

use super::{finish_report, restore_checkout};
use crate::ctx::StrataContext;
use anyhow::Result;
use clap::Args;

/// CLI arguments for the `fold` subcommand.
#[derive(Debug, Clone, Eq, PartialEq, Args)]
pub struct FoldCmd {
    /// The branch to fold. Defaults to the current branch.
    #[clap(index = 1)]
    branch_name: Option<String>,
    /// Keep the folded branch's name; its parent's name is retired instead.
    #[clap(long)]
    keep: bool,
}

impl FoldCmd {
    /// Run the `fold` subcommand.
    pub async fn run(self, mut ctx: StrataContext<'_>) -> Result<()> {
        let original = ctx.current_branch_name()?;
        let branch = match self.branch_name {
            Some(name) => name,
            None => original.clone(),
        };

        let report = ctx.fold(&branch, self.keep).await?;
        if report.succeeded() {
            restore_checkout(&ctx, &original)?;
        }
        finish_report(&report)
    }
}
