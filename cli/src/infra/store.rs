//! Infrastructure implementation of the `WorkspaceStore` port.
//!
//! `FsWorkspaceStore` persists workspace and machine records as JSON under
//! the per-context directory, using `tokio::task::spawn_blocking` with
//! atomic writes (temp file + rename) to prevent state corruption.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::application::ports::WorkspaceStore;
use crate::domain::error::ProviderError;
use crate::domain::provider::ProviderConfig;
use crate::domain::workspace::{Machine, Workspace, validate_id};

const WORKSPACE_FILENAME: &str = "workspace.json";
const MACHINE_FILENAME: &str = "machine.json";
const PROVIDER_FILENAME: &str = "provider.yaml";

/// Filesystem layout of one berth context.
///
/// Everything berth persists for a context lives under
/// `~/.berth/contexts/<context>/`.
#[derive(Debug, Clone)]
pub struct ContextPaths {
    root: PathBuf,
}

impl ContextPaths {
    /// Paths under the default root (`~/.berth/contexts/<context>`).
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new(context: &str) -> Result<Self> {
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Ok(Self::with_root(
            home.join(".berth").join("contexts").join(context),
        ))
    }

    /// Paths under an explicit root (used in tests).
    #[must_use]
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn workspace_dir(&self, id: &str) -> PathBuf {
        self.root.join("workspaces").join(id)
    }

    #[must_use]
    pub fn machine_dir(&self, id: &str) -> PathBuf {
        self.root.join("machines").join(id)
    }

    #[must_use]
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    #[must_use]
    pub fn provider_dir(&self, name: &str) -> PathBuf {
        self.root.join("providers").join(name)
    }

    #[must_use]
    pub fn binaries_dir(&self, provider: &str) -> PathBuf {
        self.root.join("binaries").join(provider)
    }
}

/// Per-context store — implements `WorkspaceStore` for the infra layer.
#[derive(Clone)]
pub struct FsWorkspaceStore {
    paths: ContextPaths,
}

impl FsWorkspaceStore {
    #[must_use]
    pub fn new(paths: ContextPaths) -> Self {
        Self { paths }
    }

    #[must_use]
    pub fn paths(&self) -> &ContextPaths {
        &self.paths
    }

    /// Synchronous JSON load — used by the async port methods via `spawn_blocking`.
    fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let value =
            serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(value))
    }

    /// Atomic JSON save via temp file then rename.
    fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(value).context("serializing record")?;

        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, &content)
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("setting permissions on {}", temp_path.display()))?;
        }

        std::fs::rename(&temp_path, path)
            .with_context(|| format!("finalizing {}", path.display()))?;
        Ok(())
    }

    fn remove_dir(dir: PathBuf) -> Result<()> {
        if dir.exists() {
            std::fs::remove_dir_all(&dir)
                .with_context(|| format!("removing {}", dir.display()))?;
        }
        Ok(())
    }

    fn load_provider_sync(path: &Path, name: &str) -> Result<ProviderConfig> {
        if !path.exists() {
            return Err(ProviderError::NotFound(name.to_string()).into());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: ProviderConfig =
            serde_yaml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        anyhow::ensure!(
            config.name == name,
            "provider manifest {} declares name '{}', expected '{name}'",
            path.display(),
            config.name
        );
        config.validate()?;
        Ok(config)
    }
}

impl WorkspaceStore for FsWorkspaceStore {
    async fn load_workspace(&self, id: &str) -> Result<Option<Workspace>> {
        validate_id(id)?;
        let path = self.paths.workspace_dir(id).join(WORKSPACE_FILENAME);
        tokio::task::spawn_blocking(move || Self::load_json(&path))
            .await
            .context("workspace load task panicked")?
    }

    async fn save_workspace(&self, workspace: &Workspace) -> Result<()> {
        validate_id(&workspace.id)?;
        let path = self
            .paths
            .workspace_dir(&workspace.id)
            .join(WORKSPACE_FILENAME);
        let workspace = workspace.clone();
        tokio::task::spawn_blocking(move || Self::save_json(&path, &workspace))
            .await
            .context("workspace save task panicked")?
    }

    async fn delete_workspace(&self, id: &str) -> Result<()> {
        validate_id(id)?;
        let dir = self.paths.workspace_dir(id);
        tokio::task::spawn_blocking(move || Self::remove_dir(dir))
            .await
            .context("workspace delete task panicked")?
    }

    fn workspace_dir_exists(&self, id: &str) -> bool {
        self.paths.workspace_dir(id).exists()
    }

    fn workspace_dir(&self, id: &str) -> PathBuf {
        self.paths.workspace_dir(id)
    }

    async fn load_machine(&self, id: &str) -> Result<Option<Machine>> {
        validate_id(id)?;
        let path = self.paths.machine_dir(id).join(MACHINE_FILENAME);
        tokio::task::spawn_blocking(move || Self::load_json(&path))
            .await
            .context("machine load task panicked")?
    }

    async fn save_machine(&self, machine: &Machine) -> Result<()> {
        validate_id(&machine.id)?;
        let path = self.paths.machine_dir(&machine.id).join(MACHINE_FILENAME);
        let machine = machine.clone();
        tokio::task::spawn_blocking(move || Self::save_json(&path, &machine))
            .await
            .context("machine save task panicked")?
    }

    async fn delete_machine(&self, id: &str) -> Result<()> {
        validate_id(id)?;
        let dir = self.paths.machine_dir(id);
        tokio::task::spawn_blocking(move || Self::remove_dir(dir))
            .await
            .context("machine delete task panicked")?
    }

    fn machine_dir(&self, id: &str) -> PathBuf {
        self.paths.machine_dir(id)
    }

    async fn load_provider(&self, name: &str) -> Result<ProviderConfig> {
        let path = self.paths.provider_dir(name).join(PROVIDER_FILENAME);
        let name = name.to_string();
        tokio::task::spawn_blocking(move || Self::load_provider_sync(&path, &name))
            .await
            .context("provider load task panicked")?
    }

    fn binaries_dir(&self, provider: &str) -> PathBuf {
        self.paths.binaries_dir(provider)
    }

    fn locks_dir(&self) -> PathBuf {
        self.paths.locks_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::workspace::ProviderRef;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn store(dir: &tempfile::TempDir) -> FsWorkspaceStore {
        FsWorkspaceStore::new(ContextPaths::with_root(dir.path().to_path_buf()))
    }

    fn workspace(id: &str) -> Workspace {
        Workspace {
            id: id.into(),
            context: "default".into(),
            origin: "/src/demo".into(),
            machine: None,
            provider: ProviderRef {
                name: "docker".into(),
                options: BTreeMap::new(),
            },
            ssh_config_path: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn workspace_save_load_delete_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir);

        assert!(store.load_workspace("demo").await.expect("load").is_none());
        assert!(!store.workspace_dir_exists("demo"));

        let ws = workspace("demo");
        store.save_workspace(&ws).await.expect("save");
        assert!(store.workspace_dir_exists("demo"));
        let loaded = store
            .load_workspace("demo")
            .await
            .expect("load")
            .expect("some");
        assert_eq!(loaded, ws);

        store.delete_workspace("demo").await.expect("delete");
        assert!(!store.workspace_dir_exists("demo"));
    }

    #[tokio::test]
    async fn machine_save_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir);
        let machine = Machine {
            id: "demo-machine".into(),
            context: "default".into(),
            provider: ProviderRef {
                name: "cloudhost".into(),
                options: BTreeMap::new(),
            },
            created_at: Utc::now(),
        };
        store.save_machine(&machine).await.expect("save");
        let loaded = store
            .load_machine("demo-machine")
            .await
            .expect("load")
            .expect("some");
        assert_eq!(loaded, machine);
    }

    #[tokio::test]
    async fn load_rejects_path_hostile_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir);
        assert!(store.load_workspace("../escape").await.is_err());
        assert!(store.load_machine("UPPER").await.is_err());
    }

    #[tokio::test]
    async fn load_provider_parses_and_validates_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir);
        let provider_dir = store.paths().provider_dir("docker");
        std::fs::create_dir_all(&provider_dir).expect("mkdir");
        std::fs::write(
            provider_dir.join("provider.yaml"),
            "name: docker\nversion: 0.1.0\nexec:\n  status: ['true']\n",
        )
        .expect("write");

        let config = store.load_provider("docker").await.expect("load");
        assert_eq!(config.name, "docker");
    }

    #[tokio::test]
    async fn load_provider_missing_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir);
        let err = store.load_provider("ghost").await.expect_err("expected Err");
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn load_provider_rejects_name_mismatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir);
        let provider_dir = store.paths().provider_dir("docker");
        std::fs::create_dir_all(&provider_dir).expect("mkdir");
        std::fs::write(
            provider_dir.join("provider.yaml"),
            "name: podman\nversion: 0.1.0\n",
        )
        .expect("write");
        assert!(store.load_provider("docker").await.is_err());
    }
}
