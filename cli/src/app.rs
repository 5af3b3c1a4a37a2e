//! Application context — unified state passed to every command handler.
//!
//! Constructed once in `Cli::run()` from the global flags; holds the output
//! context plus the shared service dependencies every lifecycle client
//! needs.

use std::sync::Arc;

use anyhow::Result;

use crate::application::services::{Client, Shared};
use crate::infra::{BinaryResolver, ContextPaths, FsWorkspaceStore, SshConfigManager, TokioCommandRunner};
use crate::output::{OutputContext, TerminalReporter};

/// The production dependency set behind every lifecycle client.
pub type AppShared = Shared<TokioCommandRunner, FsWorkspaceStore, SshConfigManager>;
/// A lifecycle client wired with production dependencies.
pub type AppClient = Client<TokioCommandRunner, FsWorkspaceStore, SshConfigManager>;

/// Flags passed from the top-level CLI to `AppContext::new`.
pub struct AppFlags {
    /// Context all state is scoped under.
    pub context: String,
    /// Suppress non-error output.
    pub quiet: bool,
    /// Disable ANSI color output.
    pub no_color: bool,
    /// Emit debug output and run provider commands at debug level.
    pub debug: bool,
    /// Skip interactive prompts (also set by `CI` / `BERTH_YES` env vars).
    pub yes: bool,
}

/// Unified application context passed to every command handler.
pub struct AppContext {
    /// Terminal output context (colors, quiet mode).
    pub output: OutputContext,
    /// Context name all state is scoped under.
    pub context: String,
    /// Debug log level.
    pub debug: bool,
    /// When `true`, skip interactive prompts and use defaults.
    pub non_interactive: bool,
    shared: Arc<AppShared>,
}

impl AppContext {
    /// Construct an `AppContext` from top-level CLI flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new(flags: &AppFlags) -> Result<Self> {
        let ci_env = std::env::var("CI").is_ok() || std::env::var("BERTH_YES").is_ok();
        let non_interactive = flags.yes || ci_env;

        let output = OutputContext::new(flags.no_color, flags.quiet);
        let reporter = Arc::new(TerminalReporter::new(output.clone(), flags.debug));
        let store = FsWorkspaceStore::new(ContextPaths::new(&flags.context)?);
        let shared = Arc::new(Shared {
            runner: TokioCommandRunner::default(),
            store,
            ssh: SshConfigManager::new()?,
            resolver: BinaryResolver::default(),
            reporter,
            debug: flags.debug,
            interactive: output.is_tty && !non_interactive,
        });

        Ok(Self {
            output,
            context: flags.context.clone(),
            debug: flags.debug,
            non_interactive,
            shared,
        })
    }

    /// The shared service dependencies.
    #[must_use]
    pub fn shared(&self) -> Arc<AppShared> {
        Arc::clone(&self.shared)
    }

    /// Connect a lifecycle client to an existing workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace or its provider cannot be loaded,
    /// or the provider declarations are invalid.
    pub async fn connect(&self, workspace_id: &str) -> Result<AppClient> {
        Client::connect(self.shared(), workspace_id).await
    }

    /// Ask the user for confirmation.
    ///
    /// When `non_interactive` is `true` (CI, `--yes` flag, or `BERTH_YES`
    /// env), returns `default` immediately without prompting.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal prompt fails (e.g. no TTY available).
    pub fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        if self.non_interactive {
            return Ok(default);
        }
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()?;
        Ok(confirmed)
    }
}
