//! Provider command shaping and environment construction.
//!
//! A provider declares each lifecycle verb as an argv list. A single-element
//! list is a shell command: it runs through `sh -c` so providers can write
//! one-liners with pipes and variable expansion. Longer lists run as-is.

use std::collections::BTreeMap;
use std::path::Path;

use crate::domain::provider::ProviderConfig;
use crate::domain::workspace::{Machine, Workspace};

// ── Injected environment variable names ───────────────────────────────────────

pub const ENV_WORKSPACE_ID: &str = "WORKSPACE_ID";
pub const ENV_WORKSPACE_CONTEXT: &str = "WORKSPACE_CONTEXT";
pub const ENV_WORKSPACE_FOLDER: &str = "WORKSPACE_FOLDER";
pub const ENV_WORKSPACE_ORIGIN: &str = "WORKSPACE_ORIGIN";
pub const ENV_MACHINE_ID: &str = "MACHINE_ID";
pub const ENV_MACHINE_CONTEXT: &str = "MACHINE_CONTEXT";
pub const ENV_MACHINE_FOLDER: &str = "MACHINE_FOLDER";
pub const ENV_PROVIDER_ID: &str = "PROVIDER_ID";
/// Carries the literal shell command for the generic `command` exec.
pub const ENV_COMMAND: &str = "COMMAND";
/// Set to `true` when the caller runs at debug log level.
pub const ENV_DEBUG: &str = "BERTH_DEBUG";

/// A provider command template, shaped for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSpec {
    /// Run program + args directly.
    Exec(Vec<String>),
    /// Run one string through an emulated shell (`sh -c`).
    Shell(String),
}

impl CommandSpec {
    /// Shape a declared argv list.
    ///
    /// Returns `None` for an empty list (the verb is not declared).
    #[must_use]
    pub fn from_template(template: &[String]) -> Option<Self> {
        match template {
            [] => None,
            [single] => Some(Self::Shell(single.clone())),
            many => Some(Self::Exec(many.to_vec())),
        }
    }

    /// The program and arguments to actually spawn.
    #[must_use]
    pub fn argv(&self) -> (String, Vec<String>) {
        match self {
            Self::Exec(parts) => (parts[0].clone(), parts[1..].to_vec()),
            Self::Shell(line) => ("sh".to_string(), vec!["-c".to_string(), line.clone()]),
        }
    }

    /// Human-readable form for error messages.
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::Exec(parts) => parts.join(" "),
            Self::Shell(line) => line.clone(),
        }
    }
}

/// Everything the environment of a provider command derives from.
///
/// `workspace` is absent for commands addressed at a machine directly.
pub struct EnvSources<'a> {
    pub workspace: Option<&'a Workspace>,
    pub machine: Option<&'a Machine>,
    pub provider: &'a ProviderConfig,
    pub workspace_dir: Option<&'a Path>,
    pub machine_dir: Option<&'a Path>,
    /// Resolved binary locations, merged in as `NAME=path`.
    pub binaries: &'a BTreeMap<String, std::path::PathBuf>,
    pub debug: bool,
}

/// Build the environment a provider command executes with.
///
/// Merge order (later wins): provider option values, provider-declared `env`
/// extras, resolved binaries, workspace/machine identity variables, debug
/// flag. Identity variables win so a provider cannot shadow them.
#[must_use]
pub fn build_env(sources: &EnvSources<'_>) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();

    let options = sources
        .workspace
        .map(|ws| &ws.provider.options)
        .or_else(|| sources.machine.map(|m| &m.provider.options));
    if let Some(options) = options {
        for (key, value) in options {
            env.insert(key.clone(), value.clone());
        }
    }
    for (key, value) in &sources.provider.env {
        env.insert(key.clone(), value.clone());
    }
    for (name, path) in sources.binaries {
        env.insert(name.clone(), path.to_string_lossy().into_owned());
    }

    if let Some(ws) = sources.workspace {
        env.insert(ENV_WORKSPACE_ID.into(), ws.id.clone());
        env.insert(ENV_WORKSPACE_CONTEXT.into(), ws.context.clone());
        env.insert(ENV_WORKSPACE_ORIGIN.into(), ws.origin.clone());
        if let Some(dir) = sources.workspace_dir {
            env.insert(
                ENV_WORKSPACE_FOLDER.into(),
                dir.to_string_lossy().into_owned(),
            );
        }
    }
    env.insert(ENV_PROVIDER_ID.into(), sources.provider.name.clone());

    if let Some(machine) = sources.machine {
        env.insert(ENV_MACHINE_ID.into(), machine.id.clone());
        env.insert(ENV_MACHINE_CONTEXT.into(), machine.context.clone());
        if let Some(dir) = sources.machine_dir {
            env.insert(
                ENV_MACHINE_FOLDER.into(),
                dir.to_string_lossy().into_owned(),
            );
        }
    }

    if sources.debug {
        env.insert(ENV_DEBUG.into(), "true".into());
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::provider::{ProviderExec, ProviderOption};
    use crate::domain::workspace::ProviderRef;
    use chrono::Utc;
    use std::path::PathBuf;

    #[test]
    fn single_string_template_runs_through_shell() {
        let spec =
            CommandSpec::from_template(&["docker ps | grep $WORKSPACE_ID".to_string()])
                .expect("spec");
        let (program, args) = spec.argv();
        assert_eq!(program, "sh");
        assert_eq!(args, vec!["-c", "docker ps | grep $WORKSPACE_ID"]);
    }

    #[test]
    fn multi_element_template_runs_directly() {
        let spec = CommandSpec::from_template(&[
            "docker".to_string(),
            "inspect".to_string(),
            "dev".to_string(),
        ])
        .expect("spec");
        let (program, args) = spec.argv();
        assert_eq!(program, "docker");
        assert_eq!(args, vec!["inspect", "dev"]);
    }

    #[test]
    fn empty_template_means_verb_not_declared() {
        assert_eq!(CommandSpec::from_template(&[]), None);
    }

    fn fixture() -> (Workspace, Machine, ProviderConfig) {
        let workspace = Workspace {
            id: "demo".into(),
            context: "default".into(),
            origin: "/src/demo".into(),
            machine: None,
            provider: ProviderRef {
                name: "docker".into(),
                options: BTreeMap::from([("IMAGE".to_string(), "ubuntu".to_string())]),
            },
            ssh_config_path: None,
            created_at: Utc::now(),
        };
        let machine = Machine {
            id: "demo-machine".into(),
            context: "default".into(),
            provider: ProviderRef {
                name: "docker".into(),
                options: BTreeMap::new(),
            },
            created_at: Utc::now(),
        };
        let provider = ProviderConfig {
            name: "docker".into(),
            version: "0.1.0".into(),
            description: None,
            options: BTreeMap::from([("IMAGE".to_string(), ProviderOption::default())]),
            env: BTreeMap::from([("EXTRA".to_string(), "1".to_string())]),
            exec: ProviderExec::default(),
            proxy: None,
            binaries: BTreeMap::new(),
        };
        (workspace, machine, provider)
    }

    #[test]
    fn build_env_merges_all_sources() {
        let (workspace, machine, provider) = fixture();
        let binaries =
            BTreeMap::from([("HELPER".to_string(), PathBuf::from("/cache/helper"))]);
        let env = build_env(&EnvSources {
            workspace: Some(&workspace),
            machine: Some(&machine),
            provider: &provider,
            workspace_dir: Some(Path::new(
                "/home/dev/.berth/contexts/default/workspaces/demo",
            )),
            machine_dir: Some(Path::new(
                "/home/dev/.berth/contexts/default/machines/demo-machine",
            )),
            binaries: &binaries,
            debug: true,
        });

        assert_eq!(env["WORKSPACE_ID"], "demo");
        assert_eq!(env["WORKSPACE_CONTEXT"], "default");
        assert_eq!(env["WORKSPACE_ORIGIN"], "/src/demo");
        assert_eq!(env["MACHINE_ID"], "demo-machine");
        assert_eq!(env["PROVIDER_ID"], "docker");
        assert_eq!(env["IMAGE"], "ubuntu");
        assert_eq!(env["EXTRA"], "1");
        assert_eq!(env["HELPER"], "/cache/helper");
        assert_eq!(env["BERTH_DEBUG"], "true");
    }

    #[test]
    fn build_env_omits_machine_and_debug_when_absent() {
        let (workspace, _, provider) = fixture();
        let env = build_env(&EnvSources {
            workspace: Some(&workspace),
            machine: None,
            provider: &provider,
            workspace_dir: Some(Path::new("/tmp/ws")),
            machine_dir: None,
            binaries: &BTreeMap::new(),
            debug: false,
        });
        assert!(!env.contains_key("MACHINE_ID"));
        assert!(!env.contains_key("BERTH_DEBUG"));
    }

    #[test]
    fn identity_variables_win_over_provider_options() {
        let (mut workspace, _, provider) = fixture();
        workspace
            .provider
            .options
            .insert("WORKSPACE_ID".to_string(), "spoofed".to_string());
        let env = build_env(&EnvSources {
            workspace: Some(&workspace),
            machine: None,
            provider: &provider,
            workspace_dir: Some(Path::new("/tmp/ws")),
            machine_dir: None,
            binaries: &BTreeMap::new(),
            debug: false,
        });
        assert_eq!(env["WORKSPACE_ID"], "demo");
    }
}
