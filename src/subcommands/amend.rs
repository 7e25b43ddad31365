//! `amend` subcommand.

use super::{finish_report, restore_checkout};
use crate::ctx::StrataContext;
use anyhow::Result;
use clap::Args;

/// CLI arguments for the `amend` subcommand.
#[derive(Debug, Clone, Eq, PartialEq, Args)]
pub struct AmendCmd {
    /// Replace the tip commit's message.
    #[clap(short = 'm', long)]
    message: Option<String>,
}

impl AmendCmd {
    /// Run the `amend` subcommand.
    pub async fn run(self, mut ctx: StrataContext<'_>) -> Result<()> {
        let original = ctx.current_branch_name()?;
        let report = ctx.amend_current(self.message.as_deref()).await?;
        if report.succeeded() {
            restore_checkout(&ctx, &original)?;
        }
        finish_report(&report)
    }
}
