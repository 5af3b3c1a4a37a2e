//! Infrastructure implementation of the `SshRegistry` port.
//!
//! `SshConfigManager` owns a berth-managed SSH config file and maintains one
//! marker-delimited block per workspace, so entries can be added and removed
//! without touching anything the user wrote by hand.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::application::ports::SshRegistry;
use crate::domain::workspace::Workspace;

const BLOCK_START: &str = "# BERTH START";
const BLOCK_END: &str = "# BERTH END";

/// Manages `~/.berth/ssh/config` with one block per workspace.
pub struct SshConfigManager {
    path: PathBuf,
}

impl SshConfigManager {
    /// Creates a manager pointing at `~/.berth/ssh/config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self> {
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Ok(Self::with_path(
            home.join(".berth").join("ssh").join("config"),
        ))
    }

    /// Creates a manager pointing at an arbitrary path (for testing).
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// The managed config block for one workspace.
    fn block(workspace: &Workspace) -> String {
        let id = &workspace.id;
        format!(
            "{BLOCK_START} {id}\n\
             Host {id}.berth\n  \
               HostName {id}\n  \
               User berth\n  \
               StrictHostKeyChecking no\n  \
               ProxyCommand berth ssh-proxy --context {} {id}\n\
             {BLOCK_END} {id}\n",
            workspace.context
        )
    }

    /// Current file content with the block for `id` removed.
    fn without_block(content: &str, id: &str) -> String {
        let start_marker = format!("{BLOCK_START} {id}");
        let end_marker = format!("{BLOCK_END} {id}");
        let mut out = String::with_capacity(content.len());
        let mut skipping = false;
        for line in content.lines() {
            if line.trim_end() == start_marker {
                skipping = true;
                continue;
            }
            if skipping {
                if line.trim_end() == end_marker {
                    skipping = false;
                }
                continue;
            }
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    fn read(path: &Path) -> Result<String> {
        if path.exists() {
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
        } else {
            Ok(String::new())
        }
    }

    fn write(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
            set_permissions(parent, 0o700)?;
        }
        std::fs::write(path, content).with_context(|| format!("write {}", path.display()))?;
        set_permissions(path, 0o600)?;
        Ok(())
    }

    fn register_sync(path: &Path, workspace: &Workspace) -> Result<()> {
        let content = Self::read(path)?;
        let mut cleaned = Self::without_block(&content, &workspace.id);
        if !cleaned.is_empty() && !cleaned.ends_with('\n') {
            cleaned.push('\n');
        }
        cleaned.push_str(&Self::block(workspace));
        Self::write(path, &cleaned)
    }

    fn deregister_sync(path: &Path, id: &str) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let content = Self::read(path)?;
        let cleaned = Self::without_block(&content, id);
        if cleaned == content {
            return Ok(());
        }
        Self::write(path, &cleaned)
    }
}

impl SshRegistry for SshConfigManager {
    async fn register(&self, workspace: &Workspace) -> Result<PathBuf> {
        let path = self.path.clone();
        let workspace = workspace.clone();
        tokio::task::spawn_blocking(move || {
            Self::register_sync(&path, &workspace).map(|()| path)
        })
        .await
        .context("ssh register task panicked")?
    }

    async fn deregister(&self, workspace_id: &str) -> Result<()> {
        let path = self.path.clone();
        let id = workspace_id.to_string();
        tokio::task::spawn_blocking(move || Self::deregister_sync(&path, &id))
            .await
            .context("ssh deregister task panicked")?
    }
}

#[cfg(unix)]
fn set_permissions(path: &std::path::Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn set_permissions(_path: &std::path::Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::workspace::ProviderRef;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn manager_in(dir: &tempfile::TempDir) -> SshConfigManager {
        SshConfigManager::with_path(dir.path().join("ssh").join("config"))
    }

    fn workspace(id: &str) -> Workspace {
        Workspace {
            id: id.into(),
            context: "default".into(),
            origin: "/src".into(),
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
    async fn register_writes_a_managed_block() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = manager_in(&dir);
        let path = mgr.register(&workspace("demo")).await.expect("register");
        let content = std::fs::read_to_string(&path).expect("read");
        assert!(content.contains("# BERTH START demo"));
        assert!(content.contains("Host demo.berth"));
        assert!(content.contains("# BERTH END demo"));
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = manager_in(&dir);
        mgr.register(&workspace("demo")).await.expect("first");
        let path = mgr.register(&workspace("demo")).await.expect("second");
        let content = std::fs::read_to_string(&path).expect("read");
        assert_eq!(content.matches("Host demo.berth").count(), 1);
    }

    #[tokio::test]
    async fn deregister_removes_only_the_target_block() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = manager_in(&dir);
        mgr.register(&workspace("one")).await.expect("register one");
        let path = mgr.register(&workspace("two")).await.expect("register two");

        mgr.deregister("one").await.expect("deregister");
        let content = std::fs::read_to_string(&path).expect("read");
        assert!(!content.contains("Host one.berth"));
        assert!(content.contains("Host two.berth"));
    }

    #[tokio::test]
    async fn deregister_missing_file_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = manager_in(&dir);
        mgr.deregister("ghost").await.expect("deregister");
    }
}
