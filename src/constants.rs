//! Constants for the `strata` application.

use nu_ansi_term::Color;
use std::time::Duration;

/// Ref namespace that holds one metadata blob per tracked branch.
pub(crate) const METADATA_REF_NAMESPACE: &str = "refs/strata/metadata";

/// Directory inside `.git` that holds repository-level configuration.
pub(crate) const STRATA_DIR_NAME: &str = "strata";

/// File name of the repository-level configuration record.
pub(crate) const CONFIG_FILE_NAME: &str = "config.toml";

/// Quiet period before a burst of filesystem events is collapsed into a
/// single re-fetch per change kind.
pub(crate) const WATCH_DEBOUNCE: Duration = Duration::from_millis(200);

/// Upper bound on simultaneous file-content reads through the engine.
pub(crate) const MAX_SIMULTANEOUS_CAT_CALLS: usize = 4;

pub(crate) const COLORS: [Color; 6] = [
    Color::Blue,
    Color::Cyan,
    Color::Green,
    Color::Red,
    Color::Yellow,
    Color::Purple,
];

pub(crate) const FILLED_CIRCLE: char = '●';
pub(crate) const EMPTY_CIRCLE: char = '○';
pub(crate) const BOTTOM_LEFT_BOX: char = '└';
pub(crate) const LEFT_FORK_BOX: char = '├';
pub(crate) const VERTICAL_BOX: char = '│';
pub(crate) const HORIZONTAL_BOX: char = '─';
