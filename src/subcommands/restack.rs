//! `restack` subcommand.

use super::{finish_report, restore_checkout};
use crate::ctx::StrataContext;
use anyhow::Result;
use clap::Args;

/// CLI arguments for the `restack` subcommand.
#[derive(Debug, Clone, Eq, PartialEq, Args)]
pub struct RestackCmd {
    /// The branch to restack. Defaults to the current branch.
    #[clap(index = 1)]
    branch_name: Option<String>,
}

impl RestackCmd {
    /// Run the `restack` subcommand.
    pub async fn run(self, mut ctx: StrataContext<'_>) -> Result<()> {
        let original = ctx.current_branch_name()?;
        let branch = match self.branch_name {
            Some(name) => name,
            None => original.clone(),
        };

        let report = ctx.restack(&branch).await?;
        if report.succeeded() {
            restore_checkout(&ctx, &original)?;
        }
        finish_report(&report)
    }
}
