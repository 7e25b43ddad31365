//! `track` subcommand.

use crate::ctx::StrataContext;
use anyhow::Result;
use clap::Args;
use nu_ansi_term::Color::Blue;

/// CLI arguments for the `track` subcommand.
#[derive(Debug, Clone, Eq, PartialEq, Args)]
pub struct TrackCmd {
    /// The parent branch to stack the current branch on. Prompted for when
    /// omitted.
    #[clap(index = 1)]
    parent: Option<String>,
}

impl TrackCmd {
    /// Run the `track` subcommand.
    pub fn run(self, mut ctx: StrataContext<'_>) -> Result<()> {
        let current = ctx.current_branch_name()?;

        // Check if the current branch is already being tracked.
        if ctx.graph().get(&current).is_some() {
            anyhow::bail!(
                "Already tracking `{current}`. Use `strata checkout` to switch branches."
            );
        }

        // Prompt the user to select the parent branch if not provided.
        let parent = match self.parent {
            Some(parent) => parent,
            None => {
                let branches = ctx.display_branches()?;
                let prompt = format!("Select the parent of `{}`", Blue.paint(&current));
                inquire::Select::new(prompt.as_str(), branches)
                    .with_formatter(&|f| f.value.branch_name.clone())
                    .prompt()?
                    .branch_name
            }
        };

        ctx.track_branch(&current, &parent)?;
        println!(
            "Tracking `{}` on top of `{}`.",
            Blue.paint(&current),
            Blue.paint(&parent)
        );
        if ctx.needs_restack(&current) {
            println!("`{current}` is not based on `{parent}`'s tip; run `strata restack`.");
        }
        Ok(())
    }
}
