//! Agent payload types and the workspace-info wire encoding.
//!
//! The agent is a binary injected into the target environment. Its only
//! input channel on startup is a single command-line argument, so the full
//! workspace description is serialized to JSON, gzip-compressed, and
//! base64-encoded to fit.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::domain::workspace::{Machine, Workspace};

/// Default path of the agent binary inside the target environment.
pub const DEFAULT_AGENT_PATH: &str = "/usr/local/bin/berth-agent";

/// Default injection timeout in seconds.
pub const DEFAULT_INJECT_TIMEOUT_SECS: u64 = 60;

/// Agent-side configuration carried in the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Path of the agent binary inside the target environment.
    pub path: String,
    /// URL to download the agent from when it is missing remotely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Whether the local process runs the agent too (local provider).
    #[serde(default)]
    pub local: bool,
    /// Forward git credentials over the tunnel.
    #[serde(default)]
    pub inject_git_credentials: bool,
    /// Forward docker credentials over the tunnel.
    #[serde(default)]
    pub inject_docker_credentials: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_AGENT_PATH.to_string(),
            download_url: None,
            local: false,
            inject_git_credentials: false,
            inject_docker_credentials: false,
        }
    }
}

/// Serialized snapshot passed to the remote agent on every invocation.
///
/// Constructed fresh per call and never persisted. For proxy providers the
/// workspace/machine clones carry secret option values stripped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentWorkspaceInfo {
    pub workspace: Workspace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<Machine>,
    /// Last known devcontainer configuration, opaque to this process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devcontainer_config: Option<serde_json::Value>,
    /// CLI options echoed through to the agent.
    #[serde(default)]
    pub cli_options: BTreeMap<String, String>,
    pub agent: AgentConfig,
    /// Injection timeout in seconds.
    pub inject_timeout_secs: u64,
    /// Registry mirror the agent should prefer for image pulls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_cache: Option<String>,
}

impl AgentWorkspaceInfo {
    /// Strip secret option values from the workspace and machine clones.
    ///
    /// Used for proxy providers and disabled-daemon modes, where the payload
    /// transits a third-party platform.
    pub fn strip_secrets(&mut self, secret_keys: &[String]) {
        for key in secret_keys {
            self.workspace.provider.options.remove(key);
            if let Some(machine) = &mut self.machine {
                machine.provider.options.remove(key);
            }
        }
    }
}

/// Final result reported by the agent over the tunnel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResult {
    /// Identifier of the container the agent set up, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    /// User the caller should connect as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_user: Option<String>,
    /// Ports the agent exposed, as `host:container` pairs.
    #[serde(default)]
    pub forwarded_ports: Vec<String>,
}

/// Encode a workspace info snapshot: JSON → gzip → base64.
///
/// # Errors
///
/// Returns an error if serialization or compression fails.
pub fn pack_workspace_info(info: &AgentWorkspaceInfo) -> Result<String> {
    let json = serde_json::to_vec(info).context("serializing workspace info")?;
    let mut encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(&json)
        .context("compressing workspace info")?;
    let compressed = encoder.finish().context("compressing workspace info")?;
    Ok(BASE64.encode(compressed))
}

/// Decode a workspace info snapshot: base64 → gunzip → JSON.
///
/// # Errors
///
/// Returns an error if any decoding layer fails.
pub fn unpack_workspace_info(encoded: &str) -> Result<AgentWorkspaceInfo> {
    let compressed = BASE64
        .decode(encoded.trim())
        .context("base64-decoding workspace info")?;
    let mut json = Vec::new();
    flate2::read::GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut json)
        .context("decompressing workspace info")?;
    serde_json::from_slice(&json).context("parsing workspace info")
}

/// Build the remote agent invocation for the generic `command` exec.
#[must_use]
pub fn agent_command(agent_path: &str, verb: &str, payload: &str, debug: bool) -> String {
    let mut cmd = format!("'{agent_path}' agent workspace {verb} --workspace-info '{payload}'");
    if debug {
        cmd.push_str(" --debug");
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::workspace::ProviderRef;
    use chrono::Utc;

    fn info() -> AgentWorkspaceInfo {
        AgentWorkspaceInfo {
            workspace: Workspace {
                id: "demo".into(),
                context: "default".into(),
                origin: "/src/demo".into(),
                machine: None,
                provider: ProviderRef {
                    name: "docker".into(),
                    options: BTreeMap::from([
                        ("IMAGE".to_string(), "ubuntu".to_string()),
                        ("TOKEN".to_string(), "s3cret".to_string()),
                    ]),
                },
                ssh_config_path: None,
                created_at: Utc::now(),
            },
            machine: None,
            devcontainer_config: Some(serde_json::json!({"image": "ubuntu"})),
            cli_options: BTreeMap::new(),
            agent: AgentConfig::default(),
            inject_timeout_secs: DEFAULT_INJECT_TIMEOUT_SECS,
            registry_cache: None,
        }
    }

    #[test]
    fn pack_unpack_round_trips() {
        let original = info();
        let packed = pack_workspace_info(&original).expect("pack");
        let unpacked = unpack_workspace_info(&packed).expect("unpack");
        assert_eq!(unpacked, original);
    }

    #[test]
    fn packed_payload_is_single_token() {
        let packed = pack_workspace_info(&info()).expect("pack");
        assert!(!packed.contains(char::is_whitespace));
    }

    #[test]
    fn unpack_rejects_garbage() {
        assert!(unpack_workspace_info("not base64!!!").is_err());
        // Valid base64, but not gzip.
        assert!(unpack_workspace_info(&BASE64.encode(b"plain")).is_err());
    }

    #[test]
    fn strip_secrets_removes_only_listed_keys() {
        let mut info = info();
        info.strip_secrets(&["TOKEN".to_string()]);
        assert!(!info.workspace.provider.options.contains_key("TOKEN"));
        assert!(info.workspace.provider.options.contains_key("IMAGE"));
    }

    #[test]
    fn agent_command_shape() {
        let cmd = agent_command("/usr/local/bin/berth-agent", "up", "UEs=", false);
        assert_eq!(
            cmd,
            "'/usr/local/bin/berth-agent' agent workspace up --workspace-info 'UEs='"
        );
        let debug = agent_command("/usr/local/bin/berth-agent", "up", "UEs=", true);
        assert!(debug.ends_with(" --debug"));
    }
}
