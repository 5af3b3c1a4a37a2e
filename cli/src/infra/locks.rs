//! Cross-process advisory file locks for workspaces and machines.
//!
//! One lock file per workspace ID and one per machine ID, both under the
//! per-context `locks/` directory. Acquisition polls a non-blocking
//! `try_write` on a bounded schedule so cancellation (dropping the future)
//! aborts the wait promptly — a blocking `flock` wait could not be
//! interrupted.
//!
//! An acquired lock is held by a dedicated blocking task that owns the
//! `fd_lock` guard; `unlock` signals that task to drop it. Process exit
//! releases the lock through the OS either way.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{Mutex, oneshot};

use crate::application::ports::ProgressReporter;
use crate::domain::error::LockError;

/// How often acquisition re-tries the lock.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Total time acquisition waits before failing.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// How often a "still waiting" notice is emitted during acquisition.
pub const LOCK_NOTICE_INTERVAL: Duration = Duration::from_secs(10);

/// Lock file path for a workspace ID.
#[must_use]
pub fn workspace_lock_path(locks_dir: &Path, id: &str) -> PathBuf {
    locks_dir.join(format!("{id}.workspace.lock"))
}

/// Lock file path for a machine ID.
#[must_use]
pub fn machine_lock_path(locks_dir: &Path, id: &str) -> PathBuf {
    locks_dir.join(format!("{id}.machine.lock"))
}

/// The blocking task holding an acquired lock, plus its release signal.
struct Holder {
    release: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

/// A named advisory file lock serializing operations across processes.
///
/// `lock`/`unlock` are idempotent per instance. The lock does NOT serialize
/// within one process: two `FileLock` instances on the same path contend
/// like two processes would.
pub struct FileLock {
    path: PathBuf,
    resource: String,
    poll_interval: Duration,
    timeout: Duration,
    notice_interval: Duration,
    held: Mutex<Option<Holder>>,
}

impl FileLock {
    /// Create a lock with production timings. No filesystem access happens
    /// until the first `lock` call.
    #[must_use]
    pub fn new(path: PathBuf, resource: String) -> Self {
        Self::with_timings(path, resource, LOCK_POLL_INTERVAL, LOCK_TIMEOUT)
    }

    /// Create a lock with explicit timings (used in tests).
    #[must_use]
    pub fn with_timings(
        path: PathBuf,
        resource: String,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            path,
            resource,
            poll_interval,
            timeout,
            notice_interval: LOCK_NOTICE_INTERVAL,
            held: Mutex::new(None),
        }
    }

    /// Acquire the lock, polling up to the configured timeout.
    ///
    /// Emits a "still waiting" notice through `reporter` while contended.
    /// Dropping the returned future aborts the wait.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be created or the timeout
    /// elapses while another process holds the lock.
    pub async fn lock(&self, reporter: &dyn ProgressReporter) -> Result<()> {
        let mut held = self.held.lock().await;
        if held.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| LockError::Create {
                resource: self.resource.clone(),
                source,
            })?;
        }

        let start = Instant::now();
        let mut last_notice = start;
        loop {
            if let Some(holder) = self.try_acquire().await? {
                *held = Some(holder);
                return Ok(());
            }
            if start.elapsed() >= self.timeout {
                return Err(LockError::Timeout {
                    resource: self.resource.clone(),
                    waited_secs: start.elapsed().as_secs(),
                }
                .into());
            }
            if last_notice.elapsed() >= self.notice_interval {
                reporter.step(&format!(
                    "still waiting for the lock on {}...",
                    self.resource
                ));
                last_notice = Instant::now();
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Release the lock if this instance holds it.
    ///
    /// Never fails: release problems are reported as warnings so they cannot
    /// block caller cleanup paths. Safe to call without a prior successful
    /// `lock`.
    pub async fn unlock(&self, reporter: &dyn ProgressReporter) {
        let mut held = self.held.lock().await;
        if let Some(holder) = held.take() {
            if holder.release.send(()).is_err() {
                reporter.warn(&format!(
                    "lock holder for {} exited early; the lock was already released",
                    self.resource
                ));
            }
            if holder.task.await.is_err() {
                reporter.warn(&format!(
                    "lock release task for {} panicked; the OS will release the lock on exit",
                    self.resource
                ));
            }
        }
    }

    /// One non-blocking acquisition attempt.
    async fn try_acquire(&self) -> Result<Option<Holder>> {
        let path = self.path.clone();
        let (ack_tx, ack_rx) = oneshot::channel::<std::io::Result<bool>>();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let task = tokio::task::spawn_blocking(move || {
            let file = match std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&path)
            {
                Ok(file) => file,
                Err(e) => {
                    let _ = ack_tx.send(Err(e));
                    return;
                }
            };
            let mut lock = fd_lock::RwLock::new(file);
            match lock.try_write() {
                Ok(_guard) => {
                    let _ = ack_tx.send(Ok(true));
                    // Hold the guard until released or the sender is dropped.
                    let _ = release_rx.blocking_recv();
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    let _ = ack_tx.send(Ok(false));
                }
                Err(e) => {
                    let _ = ack_tx.send(Err(e));
                }
            }
        });

        match ack_rx.await {
            Ok(Ok(true)) => Ok(Some(Holder {
                release: release_tx,
                task,
            })),
            Ok(Ok(false)) => {
                let _ = task.await;
                Ok(None)
            }
            Ok(Err(source)) => {
                let _ = task.await;
                Err(LockError::Create {
                    resource: self.resource.clone(),
                    source,
                }
                .into())
            }
            // Holder task panicked before acknowledging.
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullReporter;
    impl ProgressReporter for NullReporter {
        fn step(&self, _message: &str) {}
        fn success(&self, _message: &str) {}
        fn warn(&self, _message: &str) {}
    }

    #[tokio::test]
    async fn lock_and_unlock_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = FileLock::new(
            workspace_lock_path(dir.path(), "demo"),
            "workspace demo".into(),
        );
        lock.lock(&NullReporter).await.expect("lock");
        assert!(dir.path().join("demo.workspace.lock").exists());
        lock.unlock(&NullReporter).await;
    }

    #[tokio::test]
    async fn lock_is_idempotent_per_instance() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = FileLock::new(
            workspace_lock_path(dir.path(), "demo"),
            "workspace demo".into(),
        );
        lock.lock(&NullReporter).await.expect("first lock");
        lock.lock(&NullReporter).await.expect("second lock");
        lock.unlock(&NullReporter).await;
    }

    #[tokio::test]
    async fn unlock_without_lock_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = FileLock::new(
            machine_lock_path(dir.path(), "m1"),
            "machine m1".into(),
        );
        lock.unlock(&NullReporter).await;
    }

    #[tokio::test]
    async fn contended_lock_times_out_with_resource_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = workspace_lock_path(dir.path(), "demo");
        let first = FileLock::new(path.clone(), "workspace demo".into());
        first.lock(&NullReporter).await.expect("first lock");

        let second = FileLock::with_timings(
            path,
            "workspace demo".into(),
            Duration::from_millis(20),
            Duration::from_millis(100),
        );
        let err = second
            .lock(&NullReporter)
            .await
            .expect_err("expected timeout");
        assert!(err.to_string().contains("workspace demo"), "got: {err}");
        first.unlock(&NullReporter).await;
    }
}
