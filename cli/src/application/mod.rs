//! Application layer — use-cases and the ports they depend on.

pub mod ports;
pub mod services;
