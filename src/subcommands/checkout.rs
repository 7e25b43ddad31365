//! `checkout` subcommand.

use crate::{ctx::StrataContext, git::RepositoryExt};
use anyhow::Result;
use clap::Args;

/// CLI arguments for the `checkout` subcommand.
#[derive(Debug, Clone, Eq, PartialEq, Args)]
pub struct CheckoutCmd {
    /// The branch to check out. Prompted for when omitted.
    #[clap(index = 1)]
    branch_name: Option<String>,
}

impl CheckoutCmd {
    /// Run the `checkout` subcommand.
    pub fn run(self, ctx: StrataContext<'_>) -> Result<()> {
        let branch_name = match self.branch_name {
            Some(name) => name,
            None => {
                let branches = ctx.display_branches()?;
                inquire::Select::new("Select a branch to checkout", branches)
                    .with_formatter(&|f| f.value.branch_name.clone())
                    .prompt()?
                    .branch_name
            }
        };

        ctx.graph().expect(&branch_name)?;
        ctx.repository.checkout_branch(&branch_name)?;
        Ok(())
    }
}
