//! `onto` subcommand.

use super::{finish_report, restore_checkout};
use crate::ctx::StrataContext;
use anyhow::Result;
use clap::Args;

/// CLI arguments for the `onto` subcommand.
#[derive(Debug, Clone, Eq, PartialEq, Args)]
pub struct OntoCmd {
    /// The branch to move onto.
    #[clap(index = 1)]
    onto: String,
    /// The branch to move. Defaults to the current branch.
    #[clap(index = 2)]
    branch_name: Option<String>,
}

impl OntoCmd {
    /// Run the `onto` subcommand.
    pub async fn run(self, mut ctx: StrataContext<'_>) -> Result<()> {
        let original = ctx.current_branch_name()?;
        let branch = match self.branch_name {
            Some(name) => name,
            None => original.clone(),
        };

        let report = ctx.restack_onto(&branch, &self.onto).await?;
        if report.succeeded() {
            restore_checkout(&ctx, &original)?;
        }
        finish_report(&report)
    }
}
