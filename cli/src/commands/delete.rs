//! Delete command

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::application::services::lifecycle::{DeleteOptions, LifecycleClient as _};

#[derive(Args)]
pub struct DeleteArgs {
    /// Workspace to delete
    pub workspace: String,

    /// Ignore remote teardown failures and clean up anyway
    #[arg(long)]
    pub force: bool,

    /// Bound for the remote teardown, in seconds
    #[arg(long)]
    pub grace_period: Option<u64>,
}

/// Run the delete command.
///
/// # Errors
///
/// Returns an error if the workspace cannot be locked, or remote teardown
/// fails without `--force`.
pub async fn run(app: &AppContext, args: &DeleteArgs) -> Result<()> {
    let confirmed = app.non_interactive
        || app.confirm(
            &format!("Delete workspace '{}'?", args.workspace),
            false,
        )?;
    if !confirmed {
        app.output.info("aborted");
        return Ok(());
    }

    let client = app.connect(&args.workspace).await?;
    client.lock().await?;
    let result = client
        .delete(&DeleteOptions {
            force: args.force,
            grace_period_secs: args.grace_period,
        })
        .await;
    client.unlock().await;
    result?;

    app.output
        .success(&format!("workspace {} deleted", args.workspace));
    Ok(())
}
