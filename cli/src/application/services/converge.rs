//! Status convergence: drive a workspace to `Running`.

use std::time::{Duration, Instant};

use anyhow::Result;

use crate::application::ports::ProgressReporter;
use crate::application::services::lifecycle::{
    CreateOptions, LifecycleClient, StartOptions, StatusOptions,
};
use crate::domain::error::WorkspaceError;
use crate::domain::status::Status;

/// How often status is re-polled while the workspace is busy.
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// How long a busy wait stays silent before it starts logging.
pub const BUSY_LOG_THRESHOLD: Duration = Duration::from_secs(10);

/// Poll status and converge to `Running`.
///
/// `Busy` is waited out indefinitely; the caller bounds the loop with a
/// timeout or by dropping the future. With `create` set, `NotFound` triggers
/// Create then Start and `Stopped` triggers Start; without it both are
/// descriptive errors.
///
/// # Errors
///
/// Returns an error when a status probe or a triggered create/start fails,
/// or when the workspace would need creating or starting and `create` is
/// not set.
pub async fn ensure_running<C: LifecycleClient>(
    client: &C,
    reporter: &dyn ProgressReporter,
    create: bool,
) -> Result<()> {
    ensure_running_with(client, reporter, create, STATUS_POLL_INTERVAL, BUSY_LOG_THRESHOLD).await
}

/// `ensure_running` with explicit timings (used in tests).
pub async fn ensure_running_with<C: LifecycleClient>(
    client: &C,
    reporter: &dyn ProgressReporter,
    create: bool,
    poll_interval: Duration,
    busy_log_threshold: Duration,
) -> Result<()> {
    let mut busy_since: Option<Instant> = None;
    let mut last_busy_log: Option<Instant> = None;
    loop {
        match client.status(&StatusOptions::default()).await? {
            Status::Running => return Ok(()),
            Status::Busy => {
                let since = *busy_since.get_or_insert_with(Instant::now);
                let should_log = since.elapsed() >= busy_log_threshold
                    && last_busy_log.is_none_or(|t| t.elapsed() >= busy_log_threshold);
                if should_log {
                    reporter.step(&format!(
                        "workspace {} is busy, waiting for the current operation to finish...",
                        client.workspace_id()
                    ));
                    last_busy_log = Some(Instant::now());
                }
                tokio::time::sleep(poll_interval).await;
            }
            Status::Stopped => {
                if !create {
                    return Err(WorkspaceError::Stopped(client.workspace_id().into()).into());
                }
                busy_since = None;
                client.start(&StartOptions::default()).await?;
            }
            Status::NotFound => {
                if !create {
                    return Err(WorkspaceError::NotFound(client.workspace_id().into()).into());
                }
                busy_since = None;
                client.create(&CreateOptions::default()).await?;
                client.start(&StartOptions::default()).await?;
            }
        }
    }
}
