//! `cat` subcommand.

use crate::{ctx::StrataContext, session::RepoSession};
use anyhow::{anyhow, Result};
use clap::Args;

/// CLI arguments for the `cat` subcommand.
#[derive(Debug, Clone, Eq, PartialEq, Args)]
pub struct CatCmd {
    /// Repo-relative path of the file to print.
    #[clap(index = 1)]
    path: String,
    /// The revision to read the file at. Defaults to `HEAD`.
    #[clap(long)]
    rev: Option<String>,
}

impl CatCmd {
    /// Run the `cat` subcommand.
    pub async fn run(self, ctx: StrataContext<'_>) -> Result<()> {
        let workdir = ctx
            .repository
            .workdir()
            .ok_or_else(|| anyhow!("Repository has no worktree."))?;
        let session = RepoSession::open(workdir)?;
        let contents = session.cat(&self.path, self.rev.as_deref()).await?;
        print!("{contents}");
        Ok(())
    }
}
