//! Infrastructure implementation of the `CommandRunner` port.
//!
//! `TokioCommandRunner` is the production implementation that uses tokio
//! for async process execution with guaranteed timeout and kill on all platforms.

use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;

use crate::application::ports::{CommandRunner, ExecSpec};

/// Default timeout for provider lifecycle commands. Providers drive real
/// infrastructure, so this is generous; callers override per verb.
pub const DEFAULT_CMD_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Production `CommandRunner` — uses tokio for async process execution
/// with guaranteed timeout and kill on all platforms.
///
/// On Windows, `tokio::time::timeout` around `.output().await` does NOT kill
/// the child process when the timeout fires — the future is dropped but the
/// OS process keeps running. This implementation uses `tokio::select!` with
/// explicit `child.kill()` to guarantee the process is terminated.
pub struct TokioCommandRunner {
    timeout: Duration,
}

impl Default for TokioCommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_CMD_TIMEOUT)
    }
}

impl TokioCommandRunner {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn command(spec: &ExecSpec) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args).envs(&spec.env);
        cmd
    }
}

impl CommandRunner for TokioCommandRunner {
    async fn run(&self, spec: &ExecSpec) -> Result<Output> {
        self.run_with_timeout(spec, self.timeout).await
    }

    async fn run_with_timeout(&self, spec: &ExecSpec, timeout: Duration) -> Result<Output> {
        let program = spec.program.clone();
        let mut child = Self::command(spec)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;

        let mut stdout_handle = child.stdout.take();
        let mut stderr_handle = child.stderr.take();

        tokio::select! {
            result = async {
                let (status, stdout, stderr) = tokio::join!(
                    child.wait(),
                    async {
                        let mut buf = Vec::new();
                        if let Some(ref mut h) = stdout_handle {
                            let _ = h.read_to_end(&mut buf).await;
                        }
                        buf
                    },
                    async {
                        let mut buf = Vec::new();
                        if let Some(ref mut h) = stderr_handle {
                            let _ = h.read_to_end(&mut buf).await;
                        }
                        buf
                    },
                );
                Ok(Output {
                    status: status.with_context(|| format!("waiting for {program}"))?,
                    stdout,
                    stderr,
                })
            } => result,
            () = tokio::time::sleep(timeout) => {
                let _ = child.kill().await;
                anyhow::bail!("{program} timed out after {}s", timeout.as_secs())
            }
        }
    }

    fn spawn(&self, spec: &ExecSpec) -> Result<tokio::process::Child> {
        Self::command(spec)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", spec.program))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::command::CommandSpec;
    use std::collections::BTreeMap;

    fn shell(line: &str, env: BTreeMap<String, String>) -> ExecSpec {
        let spec = CommandSpec::from_template(&[line.to_string()]).expect("spec");
        ExecSpec::new(&spec, env)
    }

    #[tokio::test]
    async fn run_captures_stdout_and_stderr() {
        let runner = TokioCommandRunner::default();
        let out = runner
            .run(&shell("echo out; echo err >&2", BTreeMap::new()))
            .await
            .expect("run");
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "out");
        assert_eq!(String::from_utf8_lossy(&out.stderr).trim(), "err");
    }

    #[tokio::test]
    async fn run_injects_environment() {
        let runner = TokioCommandRunner::default();
        let env = BTreeMap::from([("WORKSPACE_ID".to_string(), "demo".to_string())]);
        let out = runner
            .run(&shell("printf '%s' \"$WORKSPACE_ID\"", env))
            .await
            .expect("run");
        assert_eq!(String::from_utf8_lossy(&out.stdout), "demo");
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let runner = TokioCommandRunner::default();
        let err = runner
            .run_with_timeout(
                &shell("sleep 30", BTreeMap::new()),
                Duration::from_millis(100),
            )
            .await
            .expect_err("expected timeout");
        assert!(err.to_string().contains("timed out"), "got: {err}");
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let runner = TokioCommandRunner::default();
        let spec = ExecSpec {
            program: "definitely-not-a-real-program-berth".into(),
            args: vec![],
            env: BTreeMap::new(),
        };
        let err = runner.run(&spec).await.expect_err("expected Err");
        assert!(err.to_string().contains("failed to spawn"));
    }
}
