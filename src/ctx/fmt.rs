//! Contains the formatting logic for the [StrataContext] struct.

use super::StrataContext;
use crate::constants::{
    BOTTOM_LEFT_BOX, COLORS, EMPTY_CIRCLE, FILLED_CIRCLE, HORIZONTAL_BOX, LEFT_FORK_BOX,
    VERTICAL_BOX,
};
use crate::errors::StrataResult;
use std::fmt::{Display, Write};

impl<'a> StrataContext<'a> {
    /// Gathers an in-order list of [DisplayBranch]es, containing the log-line
    /// and branch name.
    ///
    /// This function is particularly useful when creating prompts with
    /// [inquire::Select].
    pub fn display_branches(&self) -> StrataResult<Vec<DisplayBranch>> {
        let branches = self.graph().branches();

        let mut buf = String::new();
        self.write_tree(&mut buf)?;

        // Pair the log-lines with the branches; both walks share the same
        // pre-order, so they line up one to one.
        let display_branches = branches
            .into_iter()
            .zip(buf.trim_end().lines())
            .map(|(branch, log_line)| DisplayBranch {
                display_value: log_line.to_string(),
                branch_name: branch,
            })
            .collect();
        Ok(display_branches)
    }

    /// Prints the tree of branches contained within the [StrataContext].
    pub fn print_tree(&self) -> StrataResult<()> {
        let mut buf = String::new();
        self.write_tree(&mut buf)?;
        print!("{buf}");
        Ok(())
    }

    /// Writes the tree of branches contained within the [StrataContext] to
    /// the given [Write]r.
    pub fn write_tree<W: Write>(&self, w: &mut W) -> StrataResult<()> {
        for trunk in self.graph().trunks().to_vec() {
            if self.graph().get(&trunk).is_some() {
                self.write_tree_recursive(w, &trunk, 0, "", "", true)?;
            }
        }
        Ok(())
    }

    /// Writes the subtree rooted at `branch` to the given writer.
    fn write_tree_recursive<W: Write>(
        &self,
        w: &mut W,
        branch: &str,
        depth: usize,
        prefix: &str,
        connection: &str,
        is_parent_last_child: bool,
    ) -> StrataResult<()> {
        let checked_out = self.graph().current_branch().unwrap_or_default();

        // Form the log-line for the current branch.
        let checked_out_icon = if branch == checked_out {
            FILLED_CIRCLE
        } else {
            EMPTY_CIRCLE
        };
        let rendered_branch = COLORS[depth % COLORS.len()]
            .paint(format!("{connection}{checked_out_icon} {branch}"));
        let annotation = if self.needs_restack(branch) {
            " (needs restack)"
        } else {
            ""
        };

        writeln!(w, "{prefix}{rendered_branch}{annotation}")?;

        // Write the children of the branch recursively.
        let children = self.graph().children(branch).to_vec();
        let mut children = children.iter().peekable();
        while let Some(child) = children.next() {
            // Form the connection between the previous log-line and this one.
            let is_last_child = children.peek().is_none();
            let connection = format!(
                "{}{}",
                if is_last_child { BOTTOM_LEFT_BOX } else { LEFT_FORK_BOX },
                HORIZONTAL_BOX
            );

            // Form the prefix for the child's log-line.
            let prefix = if depth > 0 {
                let color = COLORS[depth % COLORS.len()];
                if is_parent_last_child {
                    format!("{prefix}  ")
                } else {
                    format!("{prefix}{} ", color.paint(VERTICAL_BOX.to_string()))
                }
            } else {
                prefix.to_string()
            };

            self.write_tree_recursive(
                w,
                child,
                depth + 1,
                prefix.as_str(),
                connection.as_str(),
                is_last_child,
            )?;
        }

        Ok(())
    }
}

/// A pair of a log-line and a branch name, which implements [Display].
#[derive(Debug)]
pub struct DisplayBranch {
    /// The log-line to display.
    pub(crate) display_value: String,
    /// The branch name corresponding to the log-line.
    pub(crate) branch_name: String,
}

impl Display for DisplayBranch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_value)
    }
}

#[cfg(test)]
mod test {
    use crate::{ctx::StrataContext, testutil};

    #[test]
    fn renders_one_line_per_branch() {
        let (_dir, repo) = testutil::init_repo();
        let mut ctx = StrataContext::fresh(&repo, "main".to_string()).unwrap();
        ctx.create_branch("a").unwrap();
        ctx.create_branch("b").unwrap();

        let lines = ctx.display_branches().unwrap();
        let names: Vec<&str> = lines.iter().map(|l| l.branch_name.as_str()).collect();
        assert_eq!(names, ["main", "a", "b"]);
        assert!(lines[2].display_value.contains("b"));
    }
}
