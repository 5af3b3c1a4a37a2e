//! Infrastructure layer — production implementations of the application
//! ports: process execution, file locks, binary downloads, persistence,
//! and SSH config management.

pub mod binaries;
pub mod command_runner;
pub mod locks;
pub mod ssh;
pub mod store;

pub use binaries::{BackoffPolicy, BinaryResolver};
pub use command_runner::TokioCommandRunner;
pub use locks::FileLock;
pub use ssh::SshConfigManager;
pub use store::{ContextPaths, FsWorkspaceStore};
