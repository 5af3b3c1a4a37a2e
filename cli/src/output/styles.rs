//! Stylesheet for terminal output.
//!
//! Styles default to plain and only gain color when `colorize` runs, so a
//! `Styles::default()` is the no-color mode.

use owo_colors::Style;

#[derive(Default, Clone)]
pub struct Styles {
    /// Completed-action markers (green)
    pub success: Style,
    /// Informational notes (blue)
    pub info: Style,
    /// Secondary text such as keys in key-value listings
    pub dim: Style,
    /// Section titles (bold cyan)
    pub header: Style,
}

impl Styles {
    pub fn colorize(&mut self) {
        self.success = Style::new().green();
        self.info = Style::new().blue();
        self.dim = Style::new().dimmed();
        self.header = Style::new().bold().cyan();
    }
}
