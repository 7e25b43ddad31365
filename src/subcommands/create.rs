//! `create` subcommand.

use crate::ctx::StrataContext;
use anyhow::Result;
use clap::Args;
use nu_ansi_term::Color::Blue;

/// CLI arguments for the `create` subcommand.
#[derive(Debug, Clone, Eq, PartialEq, Args)]
pub struct CreateCmd {
    /// Name of the new branch. Prompted for when omitted.
    #[clap(index = 1)]
    branch_name: Option<String>,
    /// Commit all pending changes onto the new branch with this message.
    #[clap(short = 'm', long)]
    message: Option<String>,
}

impl CreateCmd {
    /// Run the `create` subcommand.
    pub async fn run(self, mut ctx: StrataContext<'_>) -> Result<()> {
        let parent = ctx.current_branch_name()?;

        let branch_name = match self.branch_name {
            Some(name) => name,
            None => inquire::Text::new("Name of new branch:").prompt()?,
        };

        ctx.create_branch(&branch_name)?;
        println!(
            "Created and tracked new branch `{}` on top of `{}`.",
            Blue.paint(&branch_name),
            Blue.paint(&parent)
        );

        if let Some(message) = self.message {
            let output = ctx
                .engine()
                .run(&["commit", "-a", "-m", message.as_str()])
                .await?;
            if output.success() {
                println!("Committed pending changes to `{}`.", Blue.paint(&branch_name));
            } else {
                tracing::warn!(stderr = %output.stderr.trim(), "nothing committed");
                println!("No changes to commit.");
            }
        }

        Ok(())
    }
}
