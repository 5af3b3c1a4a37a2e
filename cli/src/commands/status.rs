//! Status command

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::application::services::lifecycle::{LifecycleClient as _, StatusOptions};

#[derive(Args)]
pub struct StatusArgs {
    /// Workspace to query
    pub workspace: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Probe the container inside the machine, not just the machine
    #[arg(long)]
    pub container: bool,
}

/// Run the status command. Status is read-only: no lock is taken.
///
/// # Errors
///
/// Returns an error if the status probe fails or its output is malformed.
pub async fn run(app: &AppContext, args: &StatusArgs) -> Result<()> {
    let client = app.connect(&args.workspace).await?;
    let status = client
        .status(&StatusOptions {
            container_status: args.container,
        })
        .await?;

    if args.json {
        let payload = serde_json::json!({
            "id": client.workspace_id(),
            "context": client.context(),
            "provider": client.provider().name,
            "machine": client.machine_id(),
            "status": status,
        });
        println!("{payload}");
    } else {
        app.output.header(&format!("workspace {}", args.workspace));
        app.output.kv("provider", &client.provider().name);
        if let Some(machine) = client.machine_id() {
            app.output.kv("machine ", machine);
        }
        app.output.kv("status  ", &status.to_string());
    }
    Ok(())
}
