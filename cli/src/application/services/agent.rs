//! Agent injection: bootstrap the agent inside the target environment and
//! bridge it to the local tunnel server.
//!
//! The whole workspace description travels as one command-line argument
//! (JSON, gzipped, base64). Two tasks run concurrently: the bootstrap
//! command with its stdio bridged, and the tunnel server. A shared
//! cancellation token links them; the first to finish cancels the other.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::application::ports::ProgressReporter;
use crate::application::services::lifecycle::{CommandOptions, LifecycleClient};
use crate::application::services::tunnel;
use crate::domain::agent::{
    AgentConfig, AgentResult, AgentWorkspaceInfo, DEFAULT_INJECT_TIMEOUT_SECS, agent_command,
    pack_workspace_info,
};
use crate::domain::options::secret_keys;
use crate::domain::provider::ProviderConfig;
use crate::domain::workspace::{Machine, Workspace};

/// How long the bootstrap command gets to exit after the tunnel completes.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Build the per-invocation workspace snapshot for the agent.
#[must_use]
pub fn build_workspace_info(
    workspace: &Workspace,
    machine: Option<Machine>,
    _provider: &ProviderConfig,
) -> AgentWorkspaceInfo {
    AgentWorkspaceInfo {
        workspace: workspace.clone(),
        machine,
        devcontainer_config: None,
        cli_options: std::collections::BTreeMap::new(),
        agent: AgentConfig::default(),
        inject_timeout_secs: DEFAULT_INJECT_TIMEOUT_SECS,
        registry_cache: None,
    }
}

/// Inject the agent for `verb` and return its reported result.
///
/// For proxy providers the payload transits a third-party platform, so
/// secret option values are stripped first.
///
/// # Errors
///
/// Once the agent has reported a result over the tunnel, the command's exit
/// code no longer matters. Otherwise a command-side failure (nonzero exit,
/// timeout) wins over the tunnel's read error, because it carries the
/// agent's stderr.
pub async fn inject<C: LifecycleClient>(
    client: &C,
    reporter: &dyn ProgressReporter,
    verb: &str,
    debug: bool,
) -> Result<AgentResult> {
    let workspace = client.workspace().await;
    let machine = client.machine().await;
    let mut info = build_workspace_info(&workspace, machine, client.provider());
    if client.provider().proxy.is_some() {
        info.strip_secrets(&secret_keys(&client.provider().options));
    }
    bootstrap(client, reporter, &info, verb, debug).await
}

/// Run one bootstrap round with an explicit snapshot (tests inject their
/// own timeouts and credential flags through it).
pub async fn bootstrap<C: LifecycleClient>(
    client: &C,
    reporter: &dyn ProgressReporter,
    info: &AgentWorkspaceInfo,
    verb: &str,
    debug: bool,
) -> Result<AgentResult> {
    let payload = pack_workspace_info(info)?;
    let command = agent_command(&info.agent.path, verb, &payload, debug);
    let mut child = client.spawn_command(&CommandOptions { command }).await?;

    let stdout = child
        .stdout
        .take()
        .context("bootstrap command has no stdout pipe")?;
    let stdin = child
        .stdin
        .take()
        .context("bootstrap command has no stdin pipe")?;
    let stderr = child.stderr.take();

    let cancel = CancellationToken::new();
    let timeout = Duration::from_secs(info.inject_timeout_secs);

    let tunnel_side = async {
        let out = tunnel::serve(stdout, stdin, info, reporter, cancel.clone()).await;
        cancel.cancel();
        out
    };
    let command_side = async {
        let out = drive_child(&mut child, stderr, timeout, &cancel).await;
        cancel.cancel();
        out
    };
    let (tunnel_result, command_result) = tokio::join!(tunnel_side, command_side);

    match (tunnel_result, command_result) {
        (Ok(result), _) => Ok(result),
        // The command error carries the agent's stderr; the tunnel error it
        // races against is usually just "cancelled" or an EOF.
        (Err(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
    }
}

/// Wait out the bootstrap command, bounded by the injection timeout.
///
/// On cancellation (the tunnel finished first) the child gets a short grace
/// to exit and is killed afterward. A nonzero exit within the grace is still
/// reported; the caller decides whether it matters.
async fn drive_child(
    child: &mut tokio::process::Child,
    stderr: Option<tokio::process::ChildStderr>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    // Stderr is drained concurrently so a chatty agent cannot deadlock on a
    // full pipe while we wait for it to exit.
    let stderr_task = tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_string(&mut buf).await;
        }
        buf
    });

    let status = tokio::select! {
        status = child.wait() => status.context("waiting for the bootstrap command")?,
        () = cancel.cancelled() => {
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(status) => status.context("waiting for the bootstrap command")?,
                Err(_) => {
                    child.kill().await.ok();
                    stderr_task.abort();
                    return Ok(());
                }
            }
        }
        () = tokio::time::sleep(timeout) => {
            child.kill().await.ok();
            stderr_task.abort();
            anyhow::bail!("agent injection timed out after {}s", timeout.as_secs())
        }
    };

    if status.success() {
        return Ok(());
    }
    let stderr = stderr_task.await.unwrap_or_default();
    anyhow::bail!(
        "agent bootstrap command failed ({status}): {}",
        stderr.trim()
    )
}
