//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain` — never from `crate::infra`,
//! `crate::commands`, or `crate::output`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;

use anyhow::Result;

use crate::domain::provider::ProviderConfig;
use crate::domain::workspace::{Machine, Workspace};

// ── Value Types ───────────────────────────────────────────────────────────────

/// A fully prepared external command: program, arguments, and the merged
/// environment the provider contract requires.
#[derive(Debug, Clone, Default)]
pub struct ExecSpec {
    /// Program to spawn.
    pub program: String,
    /// Arguments, already shaped (shell emulation resolved by the caller).
    pub args: Vec<String>,
    /// Environment variables injected on top of the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl ExecSpec {
    /// Build a spec from a shaped command and a prepared environment.
    #[must_use]
    pub fn new(
        spec: &crate::domain::command::CommandSpec,
        env: BTreeMap<String, String>,
    ) -> Self {
        let (program, args) = spec.argv();
        Self { program, args, env }
    }
}

// ── Command Runner Port ───────────────────────────────────────────────────────

/// Abstracts process execution so infrastructure can be swapped or mocked.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run a command and capture its output.
    ///
    /// Implementations should delegate to `run_with_timeout` using the
    /// instance's configured default timeout.
    async fn run(&self, spec: &ExecSpec) -> Result<Output>;

    /// Run a command with a custom timeout override.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or exceeds `timeout`.
    /// On timeout, the child process must be killed (not left orphaned).
    async fn run_with_timeout(&self, spec: &ExecSpec, timeout: Duration) -> Result<Output>;

    /// Spawn a command with piped stdin/stdout for STDIO bridging.
    ///
    /// Stderr is piped as well so callers can surface it on failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned.
    fn spawn(&self, spec: &ExecSpec) -> Result<tokio::process::Child>;
}

// ── Progress Reporting Port ───────────────────────────────────────────────────

/// Abstracts progress reporting so services can emit events without
/// depending on the Presentation layer. Sync trait — no async needed.
///
/// `Send + Sync` is part of the contract: reporters cross task boundaries
/// (blocking download tasks, lock holders), so every implementation must be
/// shareable.
///
/// Best-effort side-channel failures (cache writes, SSH cleanup, unlock)
/// are routed through `warn` rather than propagated as errors.
pub trait ProgressReporter: Send + Sync {
    /// Emit an in-progress step message.
    fn step(&self, message: &str);
    /// Emit a success message.
    fn success(&self, message: &str);
    /// Emit a warning message.
    fn warn(&self, message: &str);
    /// Emit a debug-level message. Default: dropped.
    fn debug(&self, _message: &str) {}
}

// ── Workspace Store Port ──────────────────────────────────────────────────────

/// Abstracts per-context persistence of workspaces, machines, and provider
/// configurations.
#[allow(async_fn_in_trait)]
pub trait WorkspaceStore {
    /// Load a workspace record, returning `None` if it does not exist.
    async fn load_workspace(&self, id: &str) -> Result<Option<Workspace>>;
    /// Persist a workspace record, replacing any previous one wholesale.
    async fn save_workspace(&self, workspace: &Workspace) -> Result<()>;
    /// Remove the workspace directory and everything under it.
    async fn delete_workspace(&self, id: &str) -> Result<()>;
    /// Whether the workspace directory exists. This is the status fallback
    /// signal for providers without a status command.
    fn workspace_dir_exists(&self, id: &str) -> bool;
    /// Directory holding the workspace record.
    fn workspace_dir(&self, id: &str) -> PathBuf;

    /// Load a machine record, returning `None` if it does not exist.
    async fn load_machine(&self, id: &str) -> Result<Option<Machine>>;
    /// Persist a machine record.
    async fn save_machine(&self, machine: &Machine) -> Result<()>;
    /// Remove the machine directory and everything under it.
    async fn delete_machine(&self, id: &str) -> Result<()>;
    /// Directory holding the machine record.
    fn machine_dir(&self, id: &str) -> PathBuf;

    /// Load and validate a provider configuration by name.
    async fn load_provider(&self, name: &str) -> Result<ProviderConfig>;
    /// Directory where a provider's resolved binaries are installed.
    fn binaries_dir(&self, provider: &str) -> PathBuf;
    /// Directory holding the per-context lock files.
    fn locks_dir(&self) -> PathBuf;
}

// ── SSH Registry Port ─────────────────────────────────────────────────────────

/// Abstracts SSH config registration so workspaces get a stable host alias.
#[allow(async_fn_in_trait)]
pub trait SshRegistry {
    /// Add or replace the managed config block for a workspace.
    /// Returns the path of the config file written.
    async fn register(&self, workspace: &Workspace) -> Result<PathBuf>;
    /// Remove the managed config block for a workspace. Idempotent.
    async fn deregister(&self, workspace_id: &str) -> Result<()>;
}
