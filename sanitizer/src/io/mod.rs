//! I/O adapters for sanitizer commands.

pub mod config;
pub mod host;
pub mod metadata;
pub mod process;
pub mod purge;
pub mod registry;
pub mod windows_host;
