//! `TerminalReporter` — Presentation-layer implementation of `ProgressReporter`.
//!
//! Owns its `OutputContext` so it can be shared with application services as
//! an `Arc<dyn ProgressReporter>` without borrowing presentation state.

use owo_colors::OwoColorize as _;

use crate::application::ports::ProgressReporter;
use crate::output::OutputContext;

/// Terminal progress reporter.
///
/// - `step()` prints `"  → {message}"` (suppressed when quiet)
/// - `success()` prints `"  ✓ {message}"` (suppressed when quiet)
/// - `warn()` prints `"  ! {message}"` (suppressed when quiet)
/// - `debug()` prints `"  · {message}"` only at debug level
pub struct TerminalReporter {
    ctx: OutputContext,
    debug: bool,
}

impl TerminalReporter {
    #[must_use]
    pub fn new(ctx: OutputContext, debug: bool) -> Self {
        Self { ctx, debug }
    }
}

impl ProgressReporter for TerminalReporter {
    fn step(&self, message: &str) {
        if !self.ctx.quiet {
            println!("  {} {message}", "→".cyan());
        }
    }

    fn success(&self, message: &str) {
        if !self.ctx.quiet {
            println!("  {} {message}", "✓".green());
        }
    }

    fn warn(&self, message: &str) {
        if !self.ctx.quiet {
            println!("  {} {message}", "!".yellow());
        }
    }

    fn debug(&self, message: &str) {
        if self.debug && !self.ctx.quiet {
            println!("  {} {message}", "·".dimmed());
        }
    }
}
