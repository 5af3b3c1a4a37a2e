//! Stop command

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::application::services::lifecycle::{LifecycleClient as _, StopOptions};

#[derive(Args)]
pub struct StopArgs {
    /// Workspace to stop
    pub workspace: String,
}

/// Run the stop command.
///
/// # Errors
///
/// Returns an error if the workspace cannot be locked or stopped.
pub async fn run(app: &AppContext, args: &StopArgs) -> Result<()> {
    let client = app.connect(&args.workspace).await?;
    client.lock().await?;
    let result = client.stop(&StopOptions::default()).await;
    client.unlock().await;
    result?;

    app.output
        .success(&format!("workspace {} stopped", args.workspace));
    Ok(())
}
