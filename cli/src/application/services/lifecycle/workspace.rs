//! The workspace-direct and machine-backed lifecycle strategies.
//!
//! Both are one type: a `WorkspaceClient` without a nested machine client
//! acts on the workspace directly; with one, create/start/stop delegate to
//! the machine while container-level verbs go through the provider's
//! generic command exec.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;

use crate::application::ports::{
    CommandRunner, ExecSpec, SshRegistry, WorkspaceStore,
};
use crate::application::services::agent;
use crate::domain::agent::{agent_command, pack_workspace_info};
use crate::domain::command::{ENV_COMMAND, EnvSources, build_env};
use crate::domain::options;
use crate::domain::provider::ProviderConfig;
use crate::domain::status::Status;
use crate::domain::workspace::{Machine, Workspace};
use crate::infra::locks::{FileLock, workspace_lock_path};

use super::{
    CommandOptions, CreateOptions, DeleteOptions, MachineClient, Shared, StartOptions,
    StatusOptions, StopOptions, ensure_success, grace_period, parse_status, shape_exec,
    with_heartbeat,
};

const DEFAULT_GRACE: Duration = Duration::from_secs(10 * 60);

/// Lifecycle client for direct and machine-backed providers.
pub struct WorkspaceClient<R, S, G> {
    shared: Arc<Shared<R, S, G>>,
    id: String,
    context: String,
    workspace: Mutex<Workspace>,
    provider: ProviderConfig,
    machine: Option<MachineClient<R, S, G>>,
    /// Whether deleting the workspace tears the machine down too.
    auto_delete: bool,
    lock: FileLock,
    binaries: Mutex<Option<BTreeMap<String, PathBuf>>>,
}

impl<R, S, G> WorkspaceClient<R, S, G>
where
    R: CommandRunner,
    S: WorkspaceStore,
    G: SshRegistry,
{
    pub fn direct(
        shared: Arc<Shared<R, S, G>>,
        workspace: Workspace,
        provider: ProviderConfig,
    ) -> Self {
        Self::build(shared, workspace, provider, None, true)
    }

    pub fn machine_backed(
        shared: Arc<Shared<R, S, G>>,
        workspace: Workspace,
        provider: ProviderConfig,
        machine: Machine,
        auto_delete: bool,
    ) -> Self {
        let machine = MachineClient::new(Arc::clone(&shared), machine, provider.clone());
        Self::build(shared, workspace, provider, Some(machine), auto_delete)
    }

    fn build(
        shared: Arc<Shared<R, S, G>>,
        workspace: Workspace,
        provider: ProviderConfig,
        machine: Option<MachineClient<R, S, G>>,
        auto_delete: bool,
    ) -> Self {
        let lock = FileLock::new(
            workspace_lock_path(&shared.store.locks_dir(), &workspace.id),
            format!("workspace {}", workspace.id),
        );
        Self {
            shared,
            id: workspace.id.clone(),
            context: workspace.context.clone(),
            workspace: Mutex::new(workspace),
            provider,
            machine,
            auto_delete,
            lock,
            binaries: Mutex::new(None),
        }
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    pub fn workspace_id(&self) -> &str {
        &self.id
    }

    pub fn machine_id(&self) -> Option<&str> {
        self.machine.as_ref().map(MachineClient::id)
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub async fn workspace(&self) -> Workspace {
        self.workspace.lock().await.clone()
    }

    pub async fn machine(&self) -> Option<Machine> {
        self.machine.as_ref().map(|m| m.record().clone())
    }

    /// Re-resolve options against the provider schema and persist the
    /// updated record wholesale.
    pub async fn refresh_options(&self, raw: &[String], _reconfigure: bool) -> Result<()> {
        let overrides = options::parse_assignments(raw)?;
        let mut workspace = self.workspace.lock().await;
        workspace.provider.options = options::resolve(
            &self.provider.options,
            &workspace.provider.options,
            &overrides,
        )?;
        self.shared.store.save_workspace(&workspace).await
    }

    /// Register the SSH alias; the persisted record and the live snapshot
    /// both pick up the config path.
    pub async fn register_ssh(&self) -> Result<PathBuf> {
        let mut workspace = self.workspace.lock().await;
        let path = self.shared.ssh.register(&workspace).await?;
        if workspace.ssh_config_path.as_deref() != Some(path.as_path()) {
            workspace.ssh_config_path = Some(path.clone());
            self.shared.store.save_workspace(&workspace).await?;
        }
        Ok(path)
    }

    pub async fn create(&self, options: &CreateOptions) -> Result<()> {
        match &self.machine {
            Some(machine) => machine.create(options).await,
            // Direct providers have nothing to provision ahead of the agent.
            None => Ok(()),
        }
    }

    pub async fn start(&self, options: &StartOptions) -> Result<()> {
        match &self.machine {
            Some(machine) => machine.start(options).await,
            None => Ok(()),
        }
    }

    pub async fn stop(&self, options: &StopOptions) -> Result<()> {
        match &self.machine {
            Some(machine) if self.auto_delete => machine.stop(options).await,
            // Keep the machine up; stop only the container inside it.
            _ => {
                if self.provider.exec.command.is_none() {
                    // No command channel, so nothing runs remotely.
                    return Ok(());
                }
                self.shared
                    .reporter
                    .step(&format!("stopping workspace {}", self.id));
                let action = format!("stop for workspace {}", self.id);
                let output = with_heartbeat(
                    self.shared.reporter.as_ref(),
                    &format!("still running {action}..."),
                    self.agent_exec("stop", None),
                )
                .await?;
                ensure_success(&action, &output)
            }
        }
    }

    pub async fn delete(&self, options: &DeleteOptions) -> Result<()> {
        let remote = self.delete_remote(options).await;

        if let Err(e) = self.shared.ssh.deregister(&self.id).await {
            self.shared
                .reporter
                .warn(&format!("could not remove SSH entry for {}: {e:#}", self.id));
        }
        if let Err(e) = self.shared.store.delete_workspace(&self.id).await {
            self.shared.reporter.warn(&format!(
                "could not remove local workspace directory for {}: {e:#}",
                self.id
            ));
        }

        match remote {
            Err(e) if options.force => {
                self.shared.reporter.warn(&format!(
                    "remote delete of workspace {} failed, continuing (--force): {e:#}",
                    self.id
                ));
                Ok(())
            }
            other => other,
        }
    }

    async fn delete_remote(&self, options: &DeleteOptions) -> Result<()> {
        self.shared
            .reporter
            .step(&format!("deleting workspace {}", self.id));
        match &self.machine {
            // The machine client removes its own local directory and applies
            // force semantics to the machine teardown.
            Some(machine) if self.auto_delete => machine.delete(options).await,
            _ => {
                if self.provider.exec.command.is_none() {
                    return Ok(());
                }
                let grace = grace_period(options, DEFAULT_GRACE);
                let action = format!("delete for workspace {}", self.id);
                let output = with_heartbeat(
                    self.shared.reporter.as_ref(),
                    &format!("still running {action}..."),
                    self.agent_exec("delete", Some(grace)),
                )
                .await?;
                ensure_success(&action, &output)
            }
        }
    }

    pub async fn status(&self, options: &StatusOptions) -> Result<Status> {
        match &self.machine {
            Some(machine) => {
                let status = machine.status().await?;
                if status == Status::Running
                    && options.container_status
                    && self.provider.exec.command.is_some()
                {
                    let output = self.agent_exec("status", None).await?;
                    return parse_status(&format!("status for workspace {}", self.id), &output);
                }
                Ok(status)
            }
            None => self.direct_status().await,
        }
    }

    /// Direct providers without a status exec fall back to the workspace
    /// directory's existence.
    async fn direct_status(&self) -> Result<Status> {
        let Some(template) = self
            .provider
            .exec
            .status
            .as_ref()
            .filter(|t| !t.is_empty())
        else {
            let exists = self.shared.store.workspace_dir_exists(&self.id);
            return Ok(if exists {
                Status::Running
            } else {
                Status::NotFound
            });
        };
        let spec = shape_exec(&self.provider, "status", Some(template), self.env().await?)?;
        let output = self.shared.runner.run(&spec).await?;
        parse_status(&format!("status for workspace {}", self.id), &output)
    }

    pub async fn run_command(&self, options: &CommandOptions) -> Result<Output> {
        let spec = self.command_spec(&options.command).await?;
        self.shared.runner.run(&spec).await
    }

    pub async fn spawn_command(&self, options: &CommandOptions) -> Result<tokio::process::Child> {
        let spec = self.command_spec(&options.command).await?;
        self.shared.runner.spawn(&spec)
    }

    pub async fn lock(&self) -> Result<()> {
        self.lock.lock(self.shared.reporter.as_ref()).await?;
        if let Some(machine) = &self.machine {
            machine.lock().await?;
        }
        Ok(())
    }

    pub async fn unlock(&self) {
        if let Some(machine) = &self.machine {
            machine.unlock().await;
        }
        self.lock.unlock(self.shared.reporter.as_ref()).await;
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    async fn binaries(&self) -> Result<BTreeMap<String, PathBuf>> {
        let mut cached = self.binaries.lock().await;
        if let Some(resolved) = cached.as_ref() {
            return Ok(resolved.clone());
        }
        let resolved = self.shared.resolve_binaries(&self.provider).await?;
        *cached = Some(resolved.clone());
        Ok(resolved)
    }

    async fn env(&self) -> Result<BTreeMap<String, String>> {
        let binaries = self.binaries().await?;
        let workspace = self.workspace.lock().await.clone();
        let workspace_dir = self.shared.store.workspace_dir(&self.id);
        let machine_dir = self
            .machine
            .as_ref()
            .map(|m| self.shared.store.machine_dir(m.id()));
        Ok(build_env(&EnvSources {
            workspace: Some(&workspace),
            machine: self.machine.as_ref().map(MachineClient::record),
            provider: &self.provider,
            workspace_dir: Some(&workspace_dir),
            machine_dir: machine_dir.as_deref(),
            binaries: &binaries,
            debug: self.shared.debug,
        }))
    }

    async fn command_spec(&self, command: &str) -> Result<ExecSpec> {
        let mut env = self.env().await?;
        env.insert(ENV_COMMAND.to_string(), command.to_string());
        shape_exec(
            &self.provider,
            "command",
            self.provider.exec.command.as_ref(),
            env,
        )
    }

    /// Run a constructed agent invocation through the generic command exec.
    async fn agent_exec(&self, verb: &str, timeout: Option<Duration>) -> Result<Output> {
        let workspace = self.workspace.lock().await.clone();
        let machine = self.machine.as_ref().map(|m| m.record().clone());
        let info = agent::build_workspace_info(&workspace, machine, &self.provider);
        let payload = pack_workspace_info(&info)?;
        let command = agent_command(&info.agent.path, verb, &payload, self.shared.debug);
        let spec = self.command_spec(&command).await?;
        match timeout {
            Some(timeout) => self.shared.runner.run_with_timeout(&spec, timeout).await,
            None => self.shared.runner.run(&spec).await,
        }
    }
}
