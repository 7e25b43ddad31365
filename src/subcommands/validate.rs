//! `validate` subcommand.

use crate::{ctx::StrataContext, graph::Scope};
use anyhow::Result;
use clap::{Args, ValueEnum};
use nu_ansi_term::Color::Green;

/// Which slice of the stack to validate.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum ScopeArg {
    Upstack,
    Downstack,
    Fullstack,
}

impl From<ScopeArg> for Scope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::Upstack => Scope::Upstack,
            ScopeArg::Downstack => Scope::Downstack,
            ScopeArg::Fullstack => Scope::Fullstack,
        }
    }
}

/// CLI arguments for the `validate` subcommand.
#[derive(Debug, Clone, Eq, PartialEq, Args)]
pub struct ValidateCmd {
    /// The branch to validate around. Defaults to the current branch.
    #[clap(index = 1)]
    branch_name: Option<String>,
    /// The slice of the stack to check.
    #[clap(long, value_enum, default_value = "fullstack")]
    scope: ScopeArg,
}

impl ValidateCmd {
    /// Run the `validate` subcommand.
    pub fn run(self, ctx: StrataContext<'_>) -> Result<()> {
        let branch = match self.branch_name {
            Some(name) => name,
            None => ctx.current_branch_name()?,
        };
        ctx.validate(&branch, self.scope.into())?;
        println!("{} the tracked stack matches the repository.", Green.paint("ok:"));
        Ok(())
    }
}
