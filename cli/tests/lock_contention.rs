//! Cross-instance behavior of the advisory file locks.
//!
//! Two `FileLock` instances on the same path contend like two processes
//! would; these tests exercise the handoff between them.

#![allow(clippy::expect_used)]

use std::time::Duration;

use berth_cli::application::ports::ProgressReporter;
use berth_cli::infra::locks::{FileLock, machine_lock_path, workspace_lock_path};

struct NullReporter;
impl ProgressReporter for NullReporter {
    fn step(&self, _message: &str) {}
    fn success(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
}

#[tokio::test]
async fn waiting_locker_proceeds_once_the_holder_releases() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = workspace_lock_path(dir.path(), "demo");

    let first = FileLock::new(path.clone(), "workspace demo".into());
    first.lock(&NullReporter).await.expect("first lock");

    let second = FileLock::with_timings(
        path,
        "workspace demo".into(),
        Duration::from_millis(10),
        Duration::from_secs(5),
    );
    let waiter = tokio::spawn(async move {
        second.lock(&NullReporter).await.map(|()| second)
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    first.unlock(&NullReporter).await;

    let second = waiter.await.expect("join").expect("second lock");
    second.unlock(&NullReporter).await;
}

#[tokio::test]
async fn workspace_and_machine_locks_do_not_contend() {
    let dir = tempfile::tempdir().expect("tempdir");
    let workspace = FileLock::new(
        workspace_lock_path(dir.path(), "demo"),
        "workspace demo".into(),
    );
    let machine = FileLock::new(
        machine_lock_path(dir.path(), "demo"),
        "machine demo".into(),
    );

    workspace.lock(&NullReporter).await.expect("workspace lock");
    machine.lock(&NullReporter).await.expect("machine lock");
    machine.unlock(&NullReporter).await;
    workspace.unlock(&NullReporter).await;
}

#[tokio::test]
async fn lock_files_survive_release() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = workspace_lock_path(dir.path(), "demo");
    let lock = FileLock::new(path.clone(), "workspace demo".into());

    lock.lock(&NullReporter).await.expect("lock");
    lock.unlock(&NullReporter).await;

    // Unlock drops the flock, never the file; a stale file must not block
    // the next acquisition.
    assert!(path.exists());
    let again = FileLock::new(path, "workspace demo".into());
    again.lock(&NullReporter).await.expect("relock");
    again.unlock(&NullReporter).await;
}
