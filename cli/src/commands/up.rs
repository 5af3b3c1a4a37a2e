//! Up command — create or resume a workspace and bring it to Running.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::Utc;
use clap::Args;

use crate::app::{AppClient, AppContext};
use crate::application::ports::WorkspaceStore as _;
use crate::application::services::lifecycle::LifecycleClient as _;
use crate::application::services::{agent, converge};
use crate::domain::options;
use crate::domain::provider::ProviderKind;
use crate::domain::workspace::{
    Machine, MachineRef, ProviderRef, Workspace, id_from_origin, validate_id,
};
use crate::output::progress;

#[derive(Args)]
pub struct UpArgs {
    /// Workspace ID, or a source folder / repository to create one from
    pub workspace: String,

    /// Provider to create new workspaces with
    #[arg(long)]
    pub provider: Option<String>,

    /// Provider option override (KEY=value, repeatable)
    #[arg(short = 'o', long = "option")]
    pub options: Vec<String>,
}

/// Run the up command.
///
/// # Errors
///
/// Returns an error if the workspace cannot be created, locked, or brought
/// to Running.
pub async fn run(app: &AppContext, args: &UpArgs) -> Result<()> {
    let id = resolve_workspace(app, args).await?;

    let pb = app
        .output
        .show_progress()
        .then(|| progress::spinner("preparing provider..."));
    let client = app.connect(&id).await;
    if let Some(pb) = &pb {
        progress::finish_ok(pb, "provider ready");
    }
    let client = client?;

    if !args.options.is_empty() {
        client.refresh_options(&args.options, false).await?;
    }

    client.lock().await?;
    let result = bring_up(app, &client).await;
    client.unlock().await;
    result?;

    app.output.success(&format!("workspace {id} is up"));
    Ok(())
}

/// Resolve the target workspace, creating its records on first contact.
async fn resolve_workspace(app: &AppContext, args: &UpArgs) -> Result<String> {
    let shared = app.shared();

    // An existing ID wins over origin derivation.
    if validate_id(&args.workspace).is_ok()
        && shared.store.load_workspace(&args.workspace).await?.is_some()
    {
        return Ok(args.workspace.clone());
    }

    let id = id_from_origin(&args.workspace);
    validate_id(&id)?;
    if shared.store.load_workspace(&id).await?.is_some() {
        return Ok(id);
    }

    let provider_name = args.provider.clone().ok_or_else(|| {
        anyhow::anyhow!("workspace '{id}' does not exist; pass --provider to create it")
    })?;
    let provider = shared.store.load_provider(&provider_name).await?;
    let overrides = options::parse_assignments(&args.options)?;
    let resolved = options::resolve(&provider.options, &BTreeMap::new(), &overrides)?;

    let machine = if provider.kind()? == ProviderKind::Machine {
        let machine = Machine {
            id: id.clone(),
            context: app.context.clone(),
            provider: ProviderRef {
                name: provider_name.clone(),
                options: resolved.clone(),
            },
            created_at: Utc::now(),
        };
        shared.store.save_machine(&machine).await?;
        Some(MachineRef {
            id: id.clone(),
            auto_delete: true,
        })
    } else {
        None
    };

    let workspace = Workspace {
        id: id.clone(),
        context: app.context.clone(),
        origin: args.workspace.clone(),
        machine,
        provider: ProviderRef {
            name: provider_name,
            options: resolved,
        },
        ssh_config_path: None,
        created_at: Utc::now(),
    };
    shared.store.save_workspace(&workspace).await?;
    app.output.info(&format!(
        "created workspace {id} with provider {}",
        workspace.provider.name
    ));
    Ok(id)
}

/// Converge to Running, register the SSH alias, and provision through the
/// agent when the provider has a command channel.
async fn bring_up(app: &AppContext, client: &AppClient) -> Result<()> {
    let shared = app.shared();
    converge::ensure_running(client, shared.reporter.as_ref(), true).await?;
    client.register_ssh().await?;

    // Proxy providers provision through their own `up` exec; direct and
    // machine providers hand the workspace to the agent.
    let provider = client.provider();
    if provider.proxy.is_none() && provider.exec.command.is_some() {
        let result = agent::inject(client, shared.reporter.as_ref(), "up", app.debug).await?;
        if let Some(container) = result.container_id {
            shared
                .reporter
                .debug(&format!("agent set up container {container}"));
        }
    }
    Ok(())
}
