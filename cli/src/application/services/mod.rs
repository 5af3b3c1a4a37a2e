//! Application services — the use-cases of the orchestration core.

pub mod agent;
pub mod converge;
pub mod lifecycle;
pub mod tunnel;

pub use lifecycle::{Client, LifecycleClient, Shared};
