//! Workspace and machine domain types plus pure validation functions.
//!
//! This module is intentionally free of I/O, async, and external layer imports.
//! All functions take data in and return data out.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::WorkspaceError;

/// Reference to the provider backing a workspace or machine, with the
/// resolved option values the provider's commands receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRef {
    /// Provider name, e.g. `"docker"` or `"cloudhost"`.
    pub name: String,
    /// Resolved option values (defaults applied, overrides merged).
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// Reference from a workspace to the machine hosting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineRef {
    /// Machine identifier.
    pub id: String,
    /// Whether deleting the workspace also deletes the machine.
    #[serde(default = "default_auto_delete")]
    pub auto_delete: bool,
}

fn default_auto_delete() -> bool {
    true
}

/// Workspace record persisted to `<context-dir>/workspaces/<id>/workspace.json`.
///
/// The record is the source of truth for "exists" checks and is only ever
/// replaced wholesale — never field-patched — by `refresh_options` or
/// provider exec results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    /// Workspace identifier.
    pub id: String,
    /// Context the workspace belongs to.
    pub context: String,
    /// Source folder or repository URL the workspace was created from.
    pub origin: String,
    /// Machine hosting this workspace, if the provider is a machine provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<MachineRef>,
    /// Provider backing this workspace.
    pub provider: ProviderRef,
    /// Path of the SSH config entry registered for this workspace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_config_path: Option<std::path::PathBuf>,
    /// When the workspace was created.
    pub created_at: DateTime<Utc>,
}

/// Machine record persisted to `<context-dir>/machines/<id>/machine.json`.
///
/// A machine has a lifecycle independent from the workspaces it hosts; one
/// machine provider may host multiple workspaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    /// Machine identifier.
    pub id: String,
    /// Context the machine belongs to.
    pub context: String,
    /// Provider backing this machine.
    pub provider: ProviderRef,
    /// When the machine was created.
    pub created_at: DateTime<Utc>,
}

/// Validates a workspace or machine ID.
///
/// Valid IDs are 1–48 characters of lowercase alphanumerics and dashes,
/// starting and ending with an alphanumeric. The same grammar is used for
/// lock file names and directory names, so anything path-hostile is rejected
/// here once.
///
/// # Errors
///
/// Returns an error if the ID doesn't match the expected format.
pub fn validate_id(id: &str) -> Result<(), WorkspaceError> {
    let valid_len = !id.is_empty() && id.len() <= 48;
    let valid_chars = id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid_edges = !id.starts_with('-') && !id.ends_with('-');
    if valid_len && valid_chars && valid_edges {
        Ok(())
    } else {
        Err(WorkspaceError::InvalidId(id.to_string()))
    }
}

/// Derive a workspace ID from an origin (folder path or repository URL).
///
/// Takes the last path segment, lowercases it, and replaces anything outside
/// the ID grammar with dashes. Falls back to `"workspace"` when nothing
/// usable remains.
#[must_use]
pub fn id_from_origin(origin: &str) -> String {
    let trimmed = origin.trim_end_matches('/').trim_end_matches(".git");
    let last = trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed)
        .to_ascii_lowercase();
    let mut id: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .collect();
    id.truncate(48);
    let id = id.trim_matches('-').to_string();
    if id.is_empty() { "workspace".to_string() } else { id }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_id_accepts_typical_ids() {
        assert!(validate_id("my-project").is_ok());
        assert!(validate_id("a").is_ok());
        assert!(validate_id("ws-0123456789abcdef").is_ok());
    }

    #[test]
    fn validate_id_rejects_bad_edges_and_chars() {
        assert!(validate_id("").is_err());
        assert!(validate_id("-leading").is_err());
        assert!(validate_id("trailing-").is_err());
        assert!(validate_id("Upper").is_err());
        assert!(validate_id("has_underscore").is_err());
        assert!(validate_id("dot.dot").is_err());
        assert!(validate_id("path/traversal").is_err());
    }

    #[test]
    fn validate_id_rejects_overlong_ids() {
        let long = "a".repeat(49);
        assert!(validate_id(&long).is_err());
        let ok = "a".repeat(48);
        assert!(validate_id(&ok).is_ok());
    }

    #[test]
    fn id_from_origin_uses_last_segment() {
        assert_eq!(id_from_origin("/home/dev/My Project"), "my-project");
        assert_eq!(
            id_from_origin("https://github.com/acme/Widgets.git"),
            "widgets"
        );
        assert_eq!(id_from_origin("simple"), "simple");
    }

    #[test]
    fn id_from_origin_falls_back_when_empty() {
        assert_eq!(id_from_origin("///"), "workspace");
        assert_eq!(id_from_origin("..."), "workspace");
    }

    #[test]
    fn workspace_serde_round_trips() {
        let ws = Workspace {
            id: "demo".into(),
            context: "default".into(),
            origin: "/src/demo".into(),
            machine: Some(MachineRef {
                id: "demo-machine".into(),
                auto_delete: true,
            }),
            provider: ProviderRef {
                name: "docker".into(),
                options: BTreeMap::from([("IMAGE".to_string(), "ubuntu".to_string())]),
            },
            ssh_config_path: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&ws).expect("serialize");
        let back: Workspace = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, ws);
    }

    #[test]
    fn machine_ref_auto_delete_defaults_to_true() {
        let parsed: MachineRef = serde_json::from_str(r#"{"id":"m1"}"#).expect("parse");
        assert!(parsed.auto_delete);
    }
}
