//! Provider configuration: the static descriptor of a pluggable backend.
//!
//! A provider declares which lifecycle verbs it supports as command
//! templates, which executables those commands need per OS/arch, and an
//! option schema. Classification (workspace-direct, machine, proxy) is
//! derived from the declarations alone — never chosen by the caller.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::error::ProviderError;

/// One option a provider accepts, as declared in `provider.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderOption {
    /// Human-readable description shown by `berth options`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Default value applied when the user sets nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Whether the option must have a value after resolution.
    #[serde(default)]
    pub required: bool,
    /// Secret values are stripped from agent payloads sent through proxies.
    #[serde(default)]
    pub secret: bool,
}

/// One OS/arch-specific location for an executable a provider command may
/// invoke via environment-variable binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderBinary {
    /// Target OS: `linux`, `darwin` or `windows`.
    pub os: String,
    /// Target architecture: `amd64` or `arm64`.
    pub arch: String,
    /// Absolute local path, bare name (must already exist at the resolved
    /// target), or `http(s)://` URL.
    pub path: String,
    /// File name to install as; defaults to the lowercased binary name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Expected SHA-256 of the installed file, compared case-insensitively.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Path inside the downloaded archive to extract and expose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_path: Option<String>,
}

/// Command templates for the direct lifecycle verbs.
///
/// Each template is an argv list; a single-element list is run through an
/// emulated shell (`sh -c`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderExec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
}

/// Command templates for proxy providers, which delegate every verb to a
/// remote management platform over JSON-on-stdio.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyExec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<Vec<String>>,
}

/// Static descriptor of a provider, loaded from
/// `<context-dir>/providers/<name>/provider.yaml`.
///
/// Unknown keys anywhere in the manifest are a load error; a misindented
/// verb must not silently change the provider's classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Provider name; also the directory name under `providers/`.
    pub name: String,
    /// Provider version (semver).
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Option schema.
    #[serde(default)]
    pub options: BTreeMap<String, ProviderOption>,
    /// Extra environment variables injected into every command.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Direct lifecycle command templates.
    #[serde(default)]
    pub exec: ProviderExec,
    /// Proxy command templates; presence classifies the provider as a proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyExec>,
    /// Declared executables, keyed by binding name.
    #[serde(default)]
    pub binaries: BTreeMap<String, Vec<ProviderBinary>>,
}

/// Which lifecycle strategy governs a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// No machine, no proxy: lifecycle verbs act on the workspace directly.
    Workspace,
    /// Declares `exec.create`: workspaces run on a provider-managed machine.
    Machine,
    /// Declares `proxy.*`: every verb delegates to a remote platform.
    Proxy,
}

impl ProviderConfig {
    /// Classify the provider from its declarations.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider declares both a create command and
    /// proxy commands — the two strategies are mutually exclusive.
    pub fn kind(&self) -> Result<ProviderKind, ProviderError> {
        let is_machine = self.exec.create.as_ref().is_some_and(|c| !c.is_empty());
        let is_proxy = self.proxy.is_some();
        match (is_machine, is_proxy) {
            (true, true) => Err(ProviderError::AmbiguousKind {
                name: self.name.clone(),
            }),
            (true, false) => Ok(ProviderKind::Machine),
            (false, true) => Ok(ProviderKind::Proxy),
            (false, false) => Ok(ProviderKind::Workspace),
        }
    }

    /// Validate the descriptor beyond what serde enforces.
    ///
    /// # Errors
    ///
    /// Returns an error on an invalid name, an invalid version, an ambiguous
    /// classification, or a proxy table with no `up` command.
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_provider_name(&self.name)?;
        semver::Version::parse(self.version.trim_start_matches('v'))
            .map_err(|e| anyhow::anyhow!("provider '{}' has invalid version: {e}", self.name))?;
        let kind = self.kind()?;
        if kind == ProviderKind::Proxy {
            let proxy = self.proxy.as_ref().ok_or_else(|| ProviderError::MissingCommand {
                name: self.name.clone(),
                verb: "proxy.up".into(),
            })?;
            if proxy.up.as_ref().is_none_or(Vec::is_empty) {
                return Err(ProviderError::MissingCommand {
                    name: self.name.clone(),
                    verb: "proxy.up".into(),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Validates a provider name: lowercase alphanumerics and dashes, starting
/// and ending with an alphanumeric.
///
/// # Errors
///
/// Returns an error if the name doesn't match the grammar.
pub fn validate_provider_name(name: &str) -> Result<(), ProviderError> {
    let valid = !name.is_empty()
        && !name.starts_with('-')
        && !name.ends_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ProviderError::InvalidName(name.to_string()))
    }
}

/// The running platform as `(os, arch)` in provider-manifest vocabulary.
#[must_use]
pub fn current_platform() -> (&'static str, &'static str) {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };
    (os, arch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(name: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.into(),
            version: "0.1.0".into(),
            description: None,
            options: BTreeMap::new(),
            env: BTreeMap::new(),
            exec: ProviderExec::default(),
            proxy: None,
            binaries: BTreeMap::new(),
        }
    }

    #[test]
    fn classifies_workspace_provider_by_default() {
        assert_eq!(
            minimal("docker").kind().expect("kind"),
            ProviderKind::Workspace
        );
    }

    #[test]
    fn classifies_machine_provider_by_create_command() {
        let mut cfg = minimal("cloudhost");
        cfg.exec.create = Some(vec!["cloudhost".into(), "create".into()]);
        assert_eq!(cfg.kind().expect("kind"), ProviderKind::Machine);
    }

    #[test]
    fn empty_create_command_is_not_a_machine_provider() {
        let mut cfg = minimal("docker");
        cfg.exec.create = Some(vec![]);
        assert_eq!(cfg.kind().expect("kind"), ProviderKind::Workspace);
    }

    #[test]
    fn classifies_proxy_provider_by_proxy_table() {
        let mut cfg = minimal("platform");
        cfg.proxy = Some(ProxyExec {
            up: Some(vec!["platform-cli".into(), "up".into()]),
            ..ProxyExec::default()
        });
        assert_eq!(cfg.kind().expect("kind"), ProviderKind::Proxy);
    }

    #[test]
    fn machine_and_proxy_declarations_are_mutually_exclusive() {
        let mut cfg = minimal("confused");
        cfg.exec.create = Some(vec!["x".into()]);
        cfg.proxy = Some(ProxyExec::default());
        let err = cfg.kind().expect_err("expected Err");
        assert!(matches!(err, ProviderError::AmbiguousKind { name } if name == "confused"));
    }

    #[test]
    fn validate_rejects_proxy_without_up() {
        let mut cfg = minimal("platform");
        cfg.proxy = Some(ProxyExec::default());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_version() {
        let mut cfg = minimal("docker");
        cfg.version = "not-a-version".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_provider_name_grammar() {
        assert!(validate_provider_name("docker").is_ok());
        assert!(validate_provider_name("k8s-proxy").is_ok());
        assert!(validate_provider_name("").is_err());
        assert!(validate_provider_name("-bad").is_err());
        assert!(validate_provider_name("Bad").is_err());
    }

    #[test]
    fn provider_yaml_parses() {
        let yaml = r"
name: docker
version: 0.2.1
options:
  IMAGE:
    default: ubuntu:24.04
    description: container image
exec:
  status: ['docker-helper status']
  command: ['docker-helper exec']
binaries:
  DOCKER_HELPER:
    - os: linux
      arch: amd64
      path: https://example.com/docker-helper-linux-amd64
      checksum: deadbeef
";
        let cfg: ProviderConfig = serde_yaml::from_str(yaml).expect("parse");
        cfg.validate().expect("validate");
        assert_eq!(cfg.kind().expect("kind"), ProviderKind::Workspace);
        assert_eq!(cfg.binaries["DOCKER_HELPER"].len(), 1);
    }

    #[test]
    fn provider_yaml_rejects_unknown_keys() {
        // A verb that escaped its `exec:` block must fail, not classify the
        // provider as workspace-direct.
        let yaml = r"
name: cloudhost
version: 0.1.0
exec:
create: ['cloudhost create']
";
        assert!(serde_yaml::from_str::<ProviderConfig>(yaml).is_err());

        let yaml = r"
name: docker
version: 0.1.0
exec:
  run: ['docker run']
";
        assert!(serde_yaml::from_str::<ProviderConfig>(yaml).is_err());
    }
}
