//! Domain layer — pure business logic, types, and validation.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All functions are synchronous and take data in, returning data out.

pub mod agent;
pub mod command;
pub mod error;
pub mod flags;
pub mod options;
pub mod provider;
pub mod status;
pub mod workspace;

pub use error::{DownloadError, LockError, OptionError, ProviderError, StatusError, WorkspaceError};
pub use provider::{ProviderConfig, ProviderKind};
pub use status::Status;
pub use workspace::{Machine, Workspace};
