//! Lifecycle clients: the uniform capability surface over provider backends.
//!
//! A client is constructed once per workspace via [`Client::connect`], which
//! classifies the provider from its declarations and picks exactly one of
//! three strategies: workspace-direct, machine-backed, or proxy-delegated.
//! The caller never chooses the strategy.

pub mod machine;
pub mod proxy;
pub mod workspace;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::application::ports::{CommandRunner, ExecSpec, ProgressReporter, SshRegistry, WorkspaceStore};
use crate::domain::command::CommandSpec;
use crate::domain::error::ProviderError;
use crate::domain::provider::{ProviderConfig, ProviderKind};
use crate::domain::status::Status;
use crate::domain::workspace::Workspace;
use crate::infra::binaries::BinaryResolver;

pub use machine::MachineClient;
pub use proxy::ProxyClient;
pub use workspace::WorkspaceClient;

/// How often a long-running lifecycle command emits a heartbeat line.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

// ── Per-verb options ──────────────────────────────────────────────────────────
//
// Serde derives are load-bearing: proxy clients forward these structs as
// compact JSON through the per-verb flag environment variables.

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOptions {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOptions {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopOptions {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOptions {
    /// Swallow remote teardown errors and report success anyway.
    #[serde(default)]
    pub force: bool,
    /// Bound for the remote teardown, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusOptions {
    /// Probe the container inside a running machine, not just the machine.
    #[serde(default)]
    pub container_status: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOptions {
    /// Shell command line handed to the provider's generic command exec.
    pub command: String,
}

// ── Capability surface ────────────────────────────────────────────────────────

/// The uniform lifecycle surface every strategy implements.
#[allow(async_fn_in_trait)]
pub trait LifecycleClient {
    /// The provider descriptor governing this client.
    fn provider(&self) -> &ProviderConfig;
    /// The workspace this client addresses.
    fn workspace_id(&self) -> &str;
    /// The backing machine, when the strategy has one.
    fn machine_id(&self) -> Option<&str>;
    /// The context the workspace belongs to.
    fn context(&self) -> &str;

    /// A deep-cloned snapshot of the workspace record.
    async fn workspace(&self) -> Workspace;

    /// A deep-cloned snapshot of the backing machine record, if any.
    async fn machine(&self) -> Option<crate::domain::workspace::Machine>;

    /// Re-resolve option values from raw `KEY=value` assignments and persist
    /// the updated record wholesale.
    async fn refresh_options(&self, raw: &[String], reconfigure: bool) -> Result<()>;

    /// Register the workspace's SSH host alias and persist the config path
    /// on the record. Returns the path of the config file written.
    async fn register_ssh(&self) -> Result<PathBuf>;

    async fn create(&self, options: &CreateOptions) -> Result<()>;
    async fn start(&self, options: &StartOptions) -> Result<()>;
    async fn stop(&self, options: &StopOptions) -> Result<()>;
    async fn delete(&self, options: &DeleteOptions) -> Result<()>;
    async fn status(&self, options: &StatusOptions) -> Result<Status>;

    /// Run the generic command exec and capture its output.
    async fn run_command(&self, options: &CommandOptions) -> Result<Output>;
    /// Spawn the generic command exec with piped stdio for tunnel bridging.
    async fn spawn_command(&self, options: &CommandOptions) -> Result<tokio::process::Child>;

    /// Acquire the client's advisory file lock(s).
    async fn lock(&self) -> Result<()>;
    /// Release the client's advisory file lock(s). Never fails.
    async fn unlock(&self);
}

// ── Shared dependencies ───────────────────────────────────────────────────────

/// Dependencies every client strategy shares, injected once at construction.
pub struct Shared<R, S, G> {
    pub runner: R,
    pub store: S,
    pub ssh: G,
    pub resolver: BinaryResolver,
    pub reporter: Arc<dyn ProgressReporter>,
    /// Emit `BERTH_DEBUG=true` into provider commands.
    pub debug: bool,
    /// Whether stdin is an interactive terminal.
    pub interactive: bool,
}

impl<R, S, G> Shared<R, S, G>
where
    S: WorkspaceStore,
{
    /// Install the provider's declared binaries for the running platform and
    /// return the `NAME=path` bindings. Blocking work runs off the runtime.
    pub(crate) async fn resolve_binaries(
        &self,
        provider: &ProviderConfig,
    ) -> Result<BTreeMap<String, PathBuf>> {
        if provider.binaries.is_empty() {
            return Ok(BTreeMap::new());
        }
        let resolver = self.resolver.clone();
        let binaries = provider.binaries.clone();
        let target_dir = self.store.binaries_dir(&provider.name);
        let reporter = Arc::clone(&self.reporter);
        tokio::task::spawn_blocking(move || {
            resolver.download_binaries(&binaries, &target_dir, reporter.as_ref())
        })
        .await
        .context("binary resolution task panicked")?
    }
}

// ── Strategy dispatch ─────────────────────────────────────────────────────────

/// A lifecycle client with the strategy already chosen.
pub enum Client<R, S, G> {
    Workspace(WorkspaceClient<R, S, G>),
    Proxy(ProxyClient<R, S, G>),
}

impl<R, S, G> Client<R, S, G>
where
    R: CommandRunner,
    S: WorkspaceStore,
    G: SshRegistry,
{
    /// Load the workspace and its provider, classify the provider, and build
    /// the matching client.
    ///
    /// # Errors
    ///
    /// Fails when the workspace does not exist, its provider config is
    /// missing or invalid, or a machine provider's machine ref does not
    /// resolve to a persisted machine record.
    pub async fn connect(shared: Arc<Shared<R, S, G>>, workspace_id: &str) -> Result<Self> {
        let workspace = shared
            .store
            .load_workspace(workspace_id)
            .await?
            .ok_or_else(|| crate::domain::error::WorkspaceError::NotFound(workspace_id.into()))?;
        let provider = shared.store.load_provider(&workspace.provider.name).await?;

        match provider.kind()? {
            ProviderKind::Proxy => Ok(Self::Proxy(ProxyClient::new(shared, workspace, provider)?)),
            ProviderKind::Workspace => Ok(Self::Workspace(WorkspaceClient::direct(
                shared, workspace, provider,
            ))),
            ProviderKind::Machine => {
                let machine_ref = workspace.machine.clone().ok_or_else(|| {
                    anyhow::anyhow!(
                        "workspace '{}' uses machine provider '{}' but has no machine reference",
                        workspace.id,
                        provider.name
                    )
                })?;
                let machine = shared
                    .store
                    .load_machine(&machine_ref.id)
                    .await?
                    .ok_or_else(|| ProviderError::MissingMachine {
                        workspace: workspace.id.clone(),
                        machine: machine_ref.id.clone(),
                    })?;
                Ok(Self::Workspace(WorkspaceClient::machine_backed(
                    shared,
                    workspace,
                    provider,
                    machine,
                    machine_ref.auto_delete,
                )))
            }
        }
    }
}

impl<R, S, G> LifecycleClient for Client<R, S, G>
where
    R: CommandRunner,
    S: WorkspaceStore,
    G: SshRegistry,
{
    fn provider(&self) -> &ProviderConfig {
        match self {
            Self::Workspace(c) => c.provider(),
            Self::Proxy(c) => c.provider(),
        }
    }

    fn workspace_id(&self) -> &str {
        match self {
            Self::Workspace(c) => c.workspace_id(),
            Self::Proxy(c) => c.workspace_id(),
        }
    }

    fn machine_id(&self) -> Option<&str> {
        match self {
            Self::Workspace(c) => c.machine_id(),
            Self::Proxy(c) => c.machine_id(),
        }
    }

    fn context(&self) -> &str {
        match self {
            Self::Workspace(c) => c.context(),
            Self::Proxy(c) => c.context(),
        }
    }

    async fn workspace(&self) -> Workspace {
        match self {
            Self::Workspace(c) => c.workspace().await,
            Self::Proxy(c) => c.workspace().await,
        }
    }

    async fn machine(&self) -> Option<crate::domain::workspace::Machine> {
        match self {
            Self::Workspace(c) => c.machine().await,
            Self::Proxy(_) => None,
        }
    }

    async fn refresh_options(&self, raw: &[String], reconfigure: bool) -> Result<()> {
        match self {
            Self::Workspace(c) => c.refresh_options(raw, reconfigure).await,
            Self::Proxy(c) => c.refresh_options(raw, reconfigure).await,
        }
    }

    async fn register_ssh(&self) -> Result<PathBuf> {
        match self {
            Self::Workspace(c) => c.register_ssh().await,
            Self::Proxy(c) => c.register_ssh().await,
        }
    }

    async fn create(&self, options: &CreateOptions) -> Result<()> {
        match self {
            Self::Workspace(c) => c.create(options).await,
            Self::Proxy(c) => c.create(options).await,
        }
    }

    async fn start(&self, options: &StartOptions) -> Result<()> {
        match self {
            Self::Workspace(c) => c.start(options).await,
            Self::Proxy(c) => c.start(options).await,
        }
    }

    async fn stop(&self, options: &StopOptions) -> Result<()> {
        match self {
            Self::Workspace(c) => c.stop(options).await,
            Self::Proxy(c) => c.stop(options).await,
        }
    }

    async fn delete(&self, options: &DeleteOptions) -> Result<()> {
        match self {
            Self::Workspace(c) => c.delete(options).await,
            Self::Proxy(c) => c.delete(options).await,
        }
    }

    async fn status(&self, options: &StatusOptions) -> Result<Status> {
        match self {
            Self::Workspace(c) => c.status(options).await,
            Self::Proxy(c) => c.status(options).await,
        }
    }

    async fn run_command(&self, options: &CommandOptions) -> Result<Output> {
        match self {
            Self::Workspace(c) => c.run_command(options).await,
            Self::Proxy(c) => c.run_command(options).await,
        }
    }

    async fn spawn_command(&self, options: &CommandOptions) -> Result<tokio::process::Child> {
        match self {
            Self::Workspace(c) => c.spawn_command(options).await,
            Self::Proxy(c) => c.spawn_command(options).await,
        }
    }

    async fn lock(&self) -> Result<()> {
        match self {
            Self::Workspace(c) => c.lock().await,
            Self::Proxy(c) => c.lock().await,
        }
    }

    async fn unlock(&self) {
        match self {
            Self::Workspace(c) => c.unlock().await,
            Self::Proxy(c) => c.unlock().await,
        }
    }
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// Shape a declared verb template into an executable spec.
///
/// Missing or empty templates are a provider contract error naming the verb.
pub(crate) fn shape_exec(
    provider: &ProviderConfig,
    verb: &str,
    template: Option<&Vec<String>>,
    env: BTreeMap<String, String>,
) -> Result<ExecSpec> {
    let missing = || ProviderError::MissingCommand {
        name: provider.name.clone(),
        verb: verb.to_string(),
    };
    let template = template.ok_or_else(missing)?;
    let spec = CommandSpec::from_template(template).ok_or_else(missing)?;
    Ok(ExecSpec::new(&spec, env))
}

/// Fail with captured output embedded when a provider command exits nonzero.
pub(crate) fn ensure_success(action: &str, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    anyhow::bail!(
        "{action} failed ({}): {}{}{}",
        output.status,
        stdout.trim(),
        if stdout.trim().is_empty() || stderr.trim().is_empty() {
            ""
        } else {
            "; "
        },
        stderr.trim(),
    )
}

/// Parse a status command's stdout into the status grammar.
pub(crate) fn parse_status(action: &str, output: &Output) -> Result<Status> {
    ensure_success(action, output)?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let status = stdout
        .parse::<Status>()
        .with_context(|| format!("{action} returned an unparseable status"))?;
    Ok(status)
}

/// Drive `future` to completion, emitting `message` through the reporter on a
/// fixed interval while it runs.
pub(crate) async fn with_heartbeat<F, T>(
    reporter: &dyn ProgressReporter,
    message: &str,
    future: F,
) -> T
where
    F: Future<Output = T>,
{
    tokio::pin!(future);
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    ticker.tick().await; // the first tick fires immediately
    loop {
        tokio::select! {
            out = &mut future => return out,
            _ = ticker.tick() => reporter.step(message),
        }
    }
}

/// The teardown bound for a delete, from its options.
pub(crate) fn grace_period(options: &DeleteOptions, default: Duration) -> Duration {
    options
        .grace_period_secs
        .map_or(default, Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    fn output(code: i32, stdout: &str, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn ensure_success_passes_zero_exit() {
        ensure_success("status", &output(0, "Running", "")).expect("ok");
    }

    #[test]
    fn ensure_success_embeds_captured_output() {
        let err = ensure_success("status for machine dev", &output(1, "", "no such host"))
            .expect_err("expected Err");
        let msg = err.to_string();
        assert!(msg.contains("status for machine dev"), "got: {msg}");
        assert!(msg.contains("no such host"), "got: {msg}");
    }

    #[test]
    fn parse_status_reads_stdout() {
        let status = parse_status("status", &output(0, " Running\n", "")).expect("status");
        assert_eq!(status, Status::Running);
    }

    #[test]
    fn parse_status_rejects_garbage_stdout() {
        assert!(parse_status("status", &output(0, "wedged", "")).is_err());
    }

    #[test]
    fn shape_exec_rejects_missing_and_empty_templates() {
        let provider = ProviderConfig {
            name: "docker".into(),
            version: "0.1.0".into(),
            description: None,
            options: BTreeMap::new(),
            env: BTreeMap::new(),
            exec: crate::domain::provider::ProviderExec::default(),
            proxy: None,
            binaries: BTreeMap::new(),
        };
        assert!(shape_exec(&provider, "stop", None, BTreeMap::new()).is_err());
        assert!(shape_exec(&provider, "stop", Some(&vec![]), BTreeMap::new()).is_err());
        let spec = shape_exec(
            &provider,
            "stop",
            Some(&vec!["docker stop".into()]),
            BTreeMap::new(),
        )
        .expect("spec");
        assert_eq!(spec.program, "sh");
    }

    #[test]
    fn grace_period_prefers_explicit_seconds() {
        let default = Duration::from_secs(600);
        assert_eq!(grace_period(&DeleteOptions::default(), default), default);
        assert_eq!(
            grace_period(
                &DeleteOptions {
                    force: false,
                    grace_period_secs: Some(30)
                },
                default
            ),
            Duration::from_secs(30)
        );
    }
}
