//! `fix` subcommand.

use crate::ctx::StrataContext;
use anyhow::Result;
use clap::Args;
use nu_ansi_term::Color::Blue;

/// CLI arguments for the `fix` subcommand.
#[derive(Debug, Clone, Eq, PartialEq, Args)]
pub struct FixCmd {
    /// Repair only this branch and its descendants. Defaults to everything.
    #[clap(index = 1)]
    branch_name: Option<String>,
}

impl FixCmd {
    /// Run the `fix` subcommand.
    pub fn run(self, mut ctx: StrataContext<'_>) -> Result<()> {
        let repaired = ctx.fix(self.branch_name.as_deref())?;
        if repaired.is_empty() {
            println!("Nothing to repair.");
        } else {
            for branch in repaired {
                println!("Repaired metadata for `{}`.", Blue.paint(branch));
            }
        }
        Ok(())
    }
}
