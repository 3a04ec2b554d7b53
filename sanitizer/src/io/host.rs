//! Host abstraction for every OS mutation a sanitize run performs.
//!
//! The [`Host`] trait decouples the orchestrator from Windows. Tests use an
//! in-memory fake host that records calls and injects classified failures.

use std::time::Duration;

use thiserror::Error;

use crate::core::types::ErrorKind;

/// A classified host failure.
///
/// `detail` is for logs only; the metadata sink never sees it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct HostError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl HostError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn absent(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::AbsentTarget, detail)
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::UtilityUnavailable, detail)
    }

    pub fn os(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Os, detail)
    }

    pub fn other(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Other, detail)
    }
}

pub type HostResult<T> = std::result::Result<T, HostError>;

/// Outcome of deleting everything one purge glob matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    /// Top-level paths the glob expanded to.
    pub matched: usize,
    /// Matched paths deleted completely.
    pub removed: usize,
    /// Entries, at any depth, that could not be deleted.
    pub failed: usize,
}

/// Parameters for the disk-cleanup utility.
#[derive(Debug, Clone)]
pub struct CleanupRequest {
    pub program: String,
    pub args: Vec<String>,
    /// `None` blocks until the utility exits.
    pub timeout: Option<Duration>,
}

/// OS-facing operations, addressed by registry key path (`HKLM\...`).
pub trait Host {
    /// Move `from` and its whole subtree to `to`.
    ///
    /// Must fail with [`ErrorKind::AbsentTarget`] when `from` does not exist.
    fn move_key(&self, from: &str, to: &str) -> HostResult<()>;

    /// Full paths of the direct subkeys of `parent`.
    fn list_subkeys(&self, parent: &str) -> HostResult<Vec<String>>;

    /// DWORD value `name` under `key`; `None` when the value is absent.
    fn read_dword(&self, key: &str, name: &str) -> HostResult<Option<u32>>;

    fn write_dword(&self, key: &str, name: &str, value: u32) -> HostResult<()>;

    fn delete_value(&self, key: &str, name: &str) -> HostResult<()>;

    /// Delete `key` if no subkeys remain under it. `Ok(false)` when the key is
    /// missing or not empty.
    fn delete_key_if_empty(&self, key: &str) -> HostResult<bool>;

    /// Run the cleanup utility and block until it exits. Its exit code is not an error.
    fn run_cleanup(&self, request: &CleanupRequest) -> HostResult<()>;

    fn empty_recycle_bin(&self) -> HostResult<()>;

    /// Force-delete everything `pattern` matches, best effort.
    fn purge(&self, pattern: &str) -> HostResult<PurgeSummary>;
}
