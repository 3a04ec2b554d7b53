//! Stable exit codes for sanitizer CLI commands.
//!
//! `sanitize` reports its terminal state through the metadata sink, not the
//! exit code, so it only ever uses `OK` and `INVALID`.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid config, CLI usage, or any other error outside the run itself.
pub const INVALID: i32 = 1;
/// `backup` refused to run because the restore marker is missing.
pub const PRECONDITION: i32 = 2;
/// `backup` was declined at the confirmation prompt.
pub const ABORTED: i32 = 3;
/// `backup` sync command died without an exit status. A sync command that
/// exits non-zero passes its own status through instead.
pub const SYNC_FAILED: i32 = 4;
