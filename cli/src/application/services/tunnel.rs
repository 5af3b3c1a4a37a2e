//! The agent tunnel: a line-delimited JSON request/response channel bridged
//! over the bootstrap command's stdio.
//!
//! The agent is the only side that initiates requests. The server answers
//! workspace-info and credential queries, relays log lines, and completes
//! when the agent reports its final result.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::application::ports::ProgressReporter;
use crate::domain::agent::{AgentResult, AgentWorkspaceInfo, pack_workspace_info};

/// One request from the agent, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TunnelRequest {
    /// Ask for the full workspace snapshot.
    WorkspaceInfo,
    /// Ask whether git credentials may be forwarded.
    GitCredentials,
    /// Ask whether docker credentials may be forwarded.
    DockerCredentials,
    /// Relay a log line to the local reporter.
    Log { level: String, message: String },
    /// Final result; closes the tunnel.
    Done { result: AgentResult },
}

/// One response from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TunnelResponse {
    WorkspaceInfo { payload: String },
    Credentials { allowed: bool },
}

/// Serve the tunnel until the agent reports `Done`, the stream ends, or the
/// token is cancelled.
///
/// # Errors
///
/// Returns an error on cancellation, on a malformed request line, or when
/// the agent closes the stream without reporting a result.
pub async fn serve<Rd, Wr>(
    reader: Rd,
    mut writer: Wr,
    info: &AgentWorkspaceInfo,
    reporter: &dyn ProgressReporter,
    cancel: CancellationToken,
) -> Result<AgentResult>
where
    Rd: AsyncRead + Unpin,
    Wr: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => anyhow::bail!("agent tunnel cancelled"),
            line = lines.next_line() => line.context("reading from the agent tunnel")?,
        };
        let Some(line) = line else {
            anyhow::bail!("agent closed the tunnel before reporting a result");
        };
        if line.trim().is_empty() {
            continue;
        }
        let request: TunnelRequest = serde_json::from_str(&line)
            .with_context(|| format!("malformed agent request: {line}"))?;
        match request {
            TunnelRequest::WorkspaceInfo => {
                let payload = pack_workspace_info(info)?;
                respond(&mut writer, &TunnelResponse::WorkspaceInfo { payload }).await?;
            }
            TunnelRequest::GitCredentials => {
                let allowed = info.agent.inject_git_credentials;
                respond(&mut writer, &TunnelResponse::Credentials { allowed }).await?;
            }
            TunnelRequest::DockerCredentials => {
                let allowed = info.agent.inject_docker_credentials;
                respond(&mut writer, &TunnelResponse::Credentials { allowed }).await?;
            }
            TunnelRequest::Log { level, message } => match level.as_str() {
                "error" | "warn" => reporter.warn(&message),
                "debug" => reporter.debug(&message),
                _ => reporter.step(&message),
            },
            TunnelRequest::Done { result } => return Ok(result),
        }
    }
}

async fn respond<Wr>(writer: &mut Wr, response: &TunnelResponse) -> Result<()>
where
    Wr: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(response).context("encoding tunnel response")?;
    line.push('\n');
    writer
        .write_all(line.as_bytes())
        .await
        .context("writing to the agent tunnel")?;
    writer.flush().await.context("flushing the agent tunnel")?;
    Ok(())
}
