//! Command implementations

pub mod delete;
pub mod options;
pub mod status;
pub mod stop;
pub mod up;
pub mod version;
