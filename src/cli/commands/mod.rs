//! CLI command implementations

pub mod gold;
pub mod init;
pub mod pipeline;
