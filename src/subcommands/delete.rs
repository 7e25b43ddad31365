//! `delete` subcommand.

use crate::ctx::StrataContext;
use anyhow::Result;
use clap::Args;
use nu_ansi_term::Color;

/// CLI arguments for the `delete` subcommand.
#[derive(Debug, Clone, Eq, PartialEq, Args)]
pub struct DeleteCmd {
    /// Name of the branch to delete. Prompted for when omitted.
    #[clap(index = 1)]
    branch_name: Option<String>,
    /// Skip the confirmation prompt.
    #[clap(long)]
    force: bool,
}

impl DeleteCmd {
    /// Run the `delete` subcommand.
    pub async fn run(self, mut ctx: StrataContext<'_>) -> Result<()> {
        // Prompt the user for the name of the branch to delete, or use the
        // provided name.
        let branch_name = match self.branch_name {
            Some(name) => name,
            None => {
                let display_branches = ctx.display_branches()?;
                inquire::Select::new("Select a branch to delete", display_branches)
                    .with_formatter(&|f| f.value.branch_name.clone())
                    .prompt()?
                    .branch_name
            }
        };

        // Ask for confirmation to prevent accidental deletion of local refs.
        if !self.force {
            let confirm = inquire::Confirm::new(
                format!(
                    "Are you sure you want to delete branch `{}`?",
                    Color::Blue.paint(&branch_name)
                )
                .as_str(),
            )
            .with_default(false)
            .prompt()?;
            if !confirm {
                return Ok(());
            }
        }

        ctx.delete_branch(&branch_name).await?;
        println!(
            "Deleted branch `{}`.",
            Color::Blue.paint(&branch_name)
        );
        Ok(())
    }
}
