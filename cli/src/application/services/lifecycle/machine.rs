//! Machine operations for machine-backed workspaces.
//!
//! A `MachineClient` drives the provider's direct exec table against the
//! machine record. It is always nested inside a `WorkspaceClient`; the
//! workspace strategy decides which verbs delegate here.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;

use crate::application::ports::{CommandRunner, SshRegistry, WorkspaceStore};
use crate::domain::command::{EnvSources, build_env};
use crate::domain::provider::ProviderConfig;
use crate::domain::status::Status;
use crate::domain::workspace::Machine;
use crate::infra::locks::{FileLock, machine_lock_path};

use super::{
    CreateOptions, DeleteOptions, Shared, StartOptions, StopOptions, ensure_success,
    grace_period, parse_status, shape_exec, with_heartbeat,
};

/// Drives provider execs against one machine.
pub struct MachineClient<R, S, G> {
    shared: Arc<Shared<R, S, G>>,
    machine: Machine,
    provider: ProviderConfig,
    lock: FileLock,
    binaries: Mutex<Option<BTreeMap<String, PathBuf>>>,
}

impl<R, S, G> MachineClient<R, S, G>
where
    R: CommandRunner,
    S: WorkspaceStore,
    G: SshRegistry,
{
    pub fn new(shared: Arc<Shared<R, S, G>>, machine: Machine, provider: ProviderConfig) -> Self {
        let lock = FileLock::new(
            machine_lock_path(&shared.store.locks_dir(), &machine.id),
            format!("machine {}", machine.id),
        );
        Self {
            shared,
            machine,
            provider,
            lock,
            binaries: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.machine.id
    }

    pub fn record(&self) -> &Machine {
        &self.machine
    }

    /// Resolve declared binaries once per client and reuse the bindings.
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
        let machine_dir = self.shared.store.machine_dir(&self.machine.id);
        Ok(build_env(&EnvSources {
            workspace: None,
            machine: Some(&self.machine),
            provider: &self.provider,
            workspace_dir: None,
            machine_dir: Some(&machine_dir),
            binaries: &binaries,
            debug: self.shared.debug,
        }))
    }

    async fn run_verb(&self, verb: &str, template: Option<&Vec<String>>) -> Result<()> {
        let spec = shape_exec(&self.provider, verb, template, self.env().await?)?;
        let action = format!("{verb} for machine {}", self.machine.id);
        let output = with_heartbeat(
            self.shared.reporter.as_ref(),
            &format!("still running {action}..."),
            self.shared.runner.run(&spec),
        )
        .await?;
        ensure_success(&action, &output)
    }

    pub async fn create(&self, _options: &CreateOptions) -> Result<()> {
        self.shared
            .reporter
            .step(&format!("creating machine {}", self.machine.id));
        self.run_verb("create", self.provider.exec.create.as_ref())
            .await
    }

    pub async fn start(&self, _options: &StartOptions) -> Result<()> {
        self.shared
            .reporter
            .step(&format!("starting machine {}", self.machine.id));
        self.run_verb("start", self.provider.exec.start.as_ref())
            .await
    }

    pub async fn stop(&self, _options: &StopOptions) -> Result<()> {
        self.shared
            .reporter
            .step(&format!("stopping machine {}", self.machine.id));
        self.run_verb("stop", self.provider.exec.stop.as_ref())
            .await
    }

    /// Tear the machine down remotely, then remove its local directory.
    ///
    /// Local cleanup always runs; the remote error is returned unless
    /// `force` is set.
    pub async fn delete(&self, options: &DeleteOptions) -> Result<()> {
        self.shared
            .reporter
            .step(&format!("deleting machine {}", self.machine.id));
        let remote = self.delete_remote(options).await;

        if let Err(e) = self.shared.store.delete_machine(&self.machine.id).await {
            self.shared.reporter.warn(&format!(
                "could not remove local machine directory for {}: {e:#}",
                self.machine.id
            ));
        }

        match remote {
            Err(e) if options.force => {
                self.shared.reporter.warn(&format!(
                    "remote delete of machine {} failed, continuing (--force): {e:#}",
                    self.machine.id
                ));
                Ok(())
            }
            other => other,
        }
    }

    async fn delete_remote(&self, options: &DeleteOptions) -> Result<()> {
        let spec = shape_exec(
            &self.provider,
            "delete",
            self.provider.exec.delete.as_ref(),
            self.env().await?,
        )?;
        let action = format!("delete for machine {}", self.machine.id);
        let grace = grace_period(options, Duration::from_secs(10 * 60));
        let output = with_heartbeat(
            self.shared.reporter.as_ref(),
            &format!("still running {action}..."),
            self.shared.runner.run_with_timeout(&spec, grace),
        )
        .await?;
        ensure_success(&action, &output)
    }

    /// Current machine status.
    ///
    /// Providers without a status exec fall back to the machine directory's
    /// existence.
    pub async fn status(&self) -> Result<Status> {
        let Some(template) = self
            .provider
            .exec
            .status
            .as_ref()
            .filter(|t| !t.is_empty())
        else {
            let exists = self.shared.store.machine_dir(&self.machine.id).exists();
            return Ok(if exists {
                Status::Running
            } else {
                Status::NotFound
            });
        };
        let spec = shape_exec(&self.provider, "status", Some(template), self.env().await?)?;
        let output = self.shared.runner.run(&spec).await?;
        parse_status(&format!("status for machine {}", self.machine.id), &output)
    }

    pub async fn lock(&self) -> Result<()> {
        self.lock.lock(self.shared.reporter.as_ref()).await
    }

    pub async fn unlock(&self) {
        self.lock.unlock(self.shared.reporter.as_ref()).await;
    }
}
