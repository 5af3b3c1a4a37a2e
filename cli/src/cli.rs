//! CLI argument parsing with clap derive

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::app::{AppContext, AppFlags};
use crate::commands;

/// Remote development workspaces on any backend
#[derive(Parser)]
#[command(
    name = "berth",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Context to operate in
    #[arg(long, global = true, env = "BERTH_CONTEXT", default_value = "default")]
    pub context: String,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Skip interactive prompts
    #[arg(short, long, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create or resume a workspace and bring it to Running
    Up(commands::up::UpArgs),

    /// Stop a workspace (preserves state)
    Stop(commands::stop::StopArgs),

    /// Delete a workspace
    Delete(commands::delete::DeleteArgs),

    /// Show workspace status
    Status(commands::status::StatusArgs),

    /// Show or change workspace provider options
    Options(commands::options::OptionsArgs),

    /// Show version
    Version(commands::version::VersionArgs),
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn run(self) -> Result<()> {
        let Cli {
            context,
            quiet,
            no_color,
            debug,
            yes,
            command,
        } = self;

        // Version needs no context or filesystem access.
        if let Command::Version(args) = &command {
            commands::version::run(args);
            return Ok(());
        }

        let app = AppContext::new(&AppFlags {
            context,
            quiet,
            no_color,
            debug,
            yes,
        })?;

        match command {
            Command::Up(args) => commands::up::run(&app, &args).await,
            Command::Stop(args) => commands::stop::run(&app, &args).await,
            Command::Delete(args) => commands::delete::run(&app, &args).await,
            Command::Status(args) => commands::status::run(&app, &args).await,
            Command::Options(args) => commands::options::run(&app, &args).await,
            Command::Version(args) => {
                commands::version::run(&args);
                Ok(())
            }
        }
    }
}
