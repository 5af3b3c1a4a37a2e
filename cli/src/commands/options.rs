//! Options command — inspect or change workspace provider options.

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::application::services::lifecycle::LifecycleClient as _;

#[derive(Args)]
pub struct OptionsArgs {
    /// Workspace to inspect or change
    pub workspace: String,

    /// Set an option (KEY=value, repeatable)
    #[arg(short = 'o', long = "option")]
    pub set: Vec<String>,

    /// Push the changed options to the remote platform (proxy providers)
    #[arg(long)]
    pub reconfigure: bool,
}

/// Run the options command.
///
/// With no `-o` assignments the current values are listed; otherwise the
/// assignments are resolved against the provider schema and persisted.
///
/// # Errors
///
/// Returns an error on unknown option keys, malformed assignments, missing
/// required values, or a failed remote reconfigure.
pub async fn run(app: &AppContext, args: &OptionsArgs) -> Result<()> {
    let client = app.connect(&args.workspace).await?;

    if args.set.is_empty() && !args.reconfigure {
        let workspace = client.workspace().await;
        let schema = &client.provider().options;
        app.output.header(&format!(
            "options for workspace {} (provider {})",
            args.workspace,
            client.provider().name
        ));
        for (key, option) in schema {
            let value = match workspace.provider.options.get(key) {
                Some(_) if option.secret => "********".to_string(),
                Some(value) => value.clone(),
                None => "(unset)".to_string(),
            };
            let description = option.description.as_deref().unwrap_or("");
            app.output.kv(key, &format!("{value}  {description}"));
        }
        return Ok(());
    }

    client.lock().await?;
    let result = client.refresh_options(&args.set, args.reconfigure).await;
    client.unlock().await;
    result?;

    app.output
        .success(&format!("options for workspace {} updated", args.workspace));
    Ok(())
}
