//! The proxy-delegated lifecycle strategy.
//!
//! Proxy providers hand every verb to a remote management platform through
//! one `proxy.*` exec. Options travel as compact JSON in per-verb flag
//! environment variables, and status responses come back as a JSON envelope
//! interleaved with line-oriented JSON logs on stdout.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::application::ports::{
    CommandRunner, ExecSpec, ProgressReporter, SshRegistry, WorkspaceStore,
};
use crate::domain::command::{ENV_COMMAND, EnvSources, build_env};
use crate::domain::error::StatusError;
use crate::domain::flags::{encode_options, flags_var};
use crate::domain::options;
use crate::domain::provider::{ProviderConfig, ProxyExec};
use crate::domain::status::Status;
use crate::domain::workspace::Workspace;
use crate::infra::locks::{FileLock, workspace_lock_path};

use super::{
    CommandOptions, CreateOptions, DeleteOptions, Shared, StartOptions, StatusOptions,
    StopOptions, ensure_success, grace_period, shape_exec, with_heartbeat,
};

const DEFAULT_GRACE: Duration = Duration::from_secs(10 * 60);

/// Lifecycle client for proxy providers.
pub struct ProxyClient<R, S, G> {
    shared: Arc<Shared<R, S, G>>,
    id: String,
    context: String,
    workspace: Mutex<Workspace>,
    provider: ProviderConfig,
    proxy: ProxyExec,
    lock: FileLock,
    binaries: Mutex<Option<BTreeMap<String, PathBuf>>>,
}

impl<R, S, G> ProxyClient<R, S, G>
where
    R: CommandRunner,
    S: WorkspaceStore,
    G: SshRegistry,
{
    pub fn new(
        shared: Arc<Shared<R, S, G>>,
        workspace: Workspace,
        provider: ProviderConfig,
    ) -> Result<Self> {
        let proxy = provider
            .proxy
            .clone()
            .with_context(|| format!("provider '{}' declares no proxy commands", provider.name))?;
        let lock = FileLock::new(
            workspace_lock_path(&shared.store.locks_dir(), &workspace.id),
            format!("workspace {}", workspace.id),
        );
        Ok(Self {
            shared,
            id: workspace.id.clone(),
            context: workspace.context.clone(),
            workspace: Mutex::new(workspace),
            provider,
            proxy,
            lock,
            binaries: Mutex::new(None),
        })
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    pub fn workspace_id(&self) -> &str {
        &self.id
    }

    pub fn machine_id(&self) -> Option<&str> {
        None
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub async fn workspace(&self) -> Workspace {
        self.workspace.lock().await.clone()
    }

    /// Re-resolve options and persist. With `reconfigure` the change is also
    /// pushed to the remote platform, which requires an interactive terminal.
    pub async fn refresh_options(&self, raw: &[String], reconfigure: bool) -> Result<()> {
        let overrides = options::parse_assignments(raw)?;
        {
            let mut workspace = self.workspace.lock().await;
            workspace.provider.options = options::resolve(
                &self.provider.options,
                &workspace.provider.options,
                &overrides,
            )?;
            self.shared.store.save_workspace(&workspace).await?;
        }
        if reconfigure {
            if !self.shared.interactive {
                anyhow::bail!(
                    "reconfiguring workspace {} through provider '{}' requires an interactive terminal",
                    self.id,
                    self.provider.name
                );
            }
            let output = self
                .proxy_exec("update", self.proxy.update.as_ref(), &(), None)
                .await?;
            ensure_success(&format!("update for workspace {}", self.id), &output)?;
        }
        Ok(())
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
        self.shared
            .reporter
            .step(&format!("creating workspace {}", self.id));
        self.run_up("create", options).await
    }

    pub async fn start(&self, options: &StartOptions) -> Result<()> {
        self.shared
            .reporter
            .step(&format!("starting workspace {}", self.id));
        self.run_up("start", options).await
    }

    pub async fn stop(&self, options: &StopOptions) -> Result<()> {
        self.shared
            .reporter
            .step(&format!("stopping workspace {}", self.id));
        let action = format!("stop for workspace {}", self.id);
        let output = with_heartbeat(
            self.shared.reporter.as_ref(),
            &format!("still running {action}..."),
            self.proxy_exec("stop", self.proxy.stop.as_ref(), options, None),
        )
        .await?;
        ensure_success(&action, &output)
    }

    pub async fn delete(&self, options: &DeleteOptions) -> Result<()> {
        self.shared
            .reporter
            .step(&format!("deleting workspace {}", self.id));
        let grace = grace_period(options, DEFAULT_GRACE);
        let action = format!("delete for workspace {}", self.id);
        let remote = async {
            let output = with_heartbeat(
                self.shared.reporter.as_ref(),
                &format!("still running {action}..."),
                self.proxy_exec("delete", self.proxy.delete.as_ref(), options, Some(grace)),
            )
            .await?;
            ensure_success(&action, &output)
        }
        .await;

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

    pub async fn status(&self, options: &StatusOptions) -> Result<Status> {
        let output = self
            .proxy_exec("status", self.proxy.status.as_ref(), options, None)
            .await?;
        ensure_success(&format!("status for workspace {}", self.id), &output)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        demux_status(&stdout, self.shared.reporter.as_ref())
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
        self.lock.lock(self.shared.reporter.as_ref()).await
    }

    pub async fn unlock(&self) {
        self.lock.unlock(self.shared.reporter.as_ref()).await;
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Create and start both map onto the platform's single `up` verb.
    async fn run_up<T: Serialize>(&self, action: &str, options: &T) -> Result<()> {
        let action = format!("{action} for workspace {}", self.id);
        let output = with_heartbeat(
            self.shared.reporter.as_ref(),
            &format!("still running {action}..."),
            self.proxy_exec("up", self.proxy.up.as_ref(), options, None),
        )
        .await?;
        ensure_success(&action, &output)
    }

    async fn proxy_exec<T: Serialize>(
        &self,
        verb: &str,
        template: Option<&Vec<String>>,
        options: &T,
        timeout: Option<Duration>,
    ) -> Result<Output> {
        let mut env = self.env().await?;
        env.insert(flags_var(verb), encode_options(options)?);
        let spec = shape_exec(&self.provider, &format!("proxy.{verb}"), template, env)?;
        match timeout {
            Some(timeout) => self.shared.runner.run_with_timeout(&spec, timeout).await,
            None => self.shared.runner.run(&spec).await,
        }
    }

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
        Ok(build_env(&EnvSources {
            workspace: Some(&workspace),
            machine: None,
            provider: &self.provider,
            workspace_dir: Some(&workspace_dir),
            machine_dir: None,
            binaries: &binaries,
            debug: self.shared.debug,
        }))
    }

    async fn command_spec(&self, command: &str) -> Result<ExecSpec> {
        let mut env = self.env().await?;
        env.insert(ENV_COMMAND.to_string(), command.to_string());
        shape_exec(
            &self.provider,
            "proxy.command",
            self.proxy.command.as_ref(),
            env,
        )
    }
}

/// Separate the status envelope from the embedded JSON log stream.
///
/// Lines carrying a `level` key are routed to the reporter; the last line
/// carrying a `state` key is the envelope. Anything else is a protocol
/// violation.
fn demux_status(stdout: &str, reporter: &dyn ProgressReporter) -> Result<Status> {
    let mut state: Option<String> = None;
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let value: serde_json::Value = serde_json::from_str(line)
            .map_err(|_| StatusError::Malformed(line.to_string()))?;
        if let Some(level) = value.get("level").and_then(|l| l.as_str()) {
            let message = value
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or(line);
            match level {
                "error" | "warn" => reporter.warn(message),
                "debug" => reporter.debug(message),
                _ => reporter.step(message),
            }
            continue;
        }
        if let Some(s) = value.get("state").and_then(|s| s.as_str()) {
            state = Some(s.to_string());
            continue;
        }
        return Err(StatusError::Malformed(line.to_string()).into());
    }
    let state = state.ok_or(StatusError::Empty)?;
    Ok(state.parse()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingReporter {
        warns: StdMutex<Vec<String>>,
        steps: StdMutex<Vec<String>>,
    }

    impl ProgressReporter for RecordingReporter {
        fn step(&self, message: &str) {
            self.steps.lock().expect("lock").push(message.to_string());
        }
        fn success(&self, _message: &str) {}
        fn warn(&self, message: &str) {
            self.warns.lock().expect("lock").push(message.to_string());
        }
    }

    #[test]
    fn demux_picks_the_state_envelope_out_of_logs() {
        let reporter = RecordingReporter::default();
        let stdout = concat!(
            "{\"level\":\"info\",\"message\":\"contacting platform\"}\n",
            "{\"level\":\"warn\",\"message\":\"slow response\"}\n",
            "{\"state\":\"Running\"}\n",
        );
        let status = demux_status(stdout, &reporter).expect("status");
        assert_eq!(status, Status::Running);
        assert_eq!(
            *reporter.steps.lock().expect("lock"),
            vec!["contacting platform"]
        );
        assert_eq!(*reporter.warns.lock().expect("lock"), vec!["slow response"]);
    }

    #[test]
    fn demux_uses_the_last_state_line() {
        let reporter = RecordingReporter::default();
        let stdout = "{\"state\":\"Busy\"}\n{\"state\":\"Stopped\"}\n";
        assert_eq!(
            demux_status(stdout, &reporter).expect("status"),
            Status::Stopped
        );
    }

    #[test]
    fn demux_rejects_non_json_output() {
        let reporter = RecordingReporter::default();
        assert!(demux_status("plain text\n", &reporter).is_err());
    }

    #[test]
    fn demux_rejects_json_without_state_or_level() {
        let reporter = RecordingReporter::default();
        assert!(demux_status("{\"unexpected\":true}\n", &reporter).is_err());
    }

    #[test]
    fn demux_with_only_logs_reports_missing_state() {
        let reporter = RecordingReporter::default();
        let err = demux_status("{\"level\":\"info\",\"message\":\"hi\"}\n", &reporter)
            .expect_err("expected Err");
        assert!(err.to_string().contains("empty status"), "got: {err}");
    }

    #[test]
    fn demux_rejects_unknown_state_strings() {
        let reporter = RecordingReporter::default();
        assert!(demux_status("{\"state\":\"Sideways\"}\n", &reporter).is_err());
    }
}
