//! Shared deterministic types for the sanitizer core.
//!
//! These types define the contract between the orchestrator and the host
//! adapters. They do not touch the OS and must stay stable: the strings they
//! render are read by the image capture pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Externally visible run state, published under the `state` metadata key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Success,
    Error,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Success => "success",
            RunState::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Success | RunState::Error)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification tag carried by every host adapter failure.
///
/// The orchestrator decides tolerance by matching on this tag, never on the
/// error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The target of the operation does not exist on this OS edition.
    AbsentTarget,
    /// The utility or feature backing the operation is not installed.
    UtilityUnavailable,
    /// The underlying OS call failed.
    Os,
    /// Anything else.
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::AbsentTarget => "absent target",
            ErrorKind::UtilityUnavailable => "utility unavailable",
            ErrorKind::Os => "os error",
            ErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Fixed vocabulary published under the `error` metadata key.
pub mod fatal {
    pub const UNKNOWN_HIVE: &str = "Unknown hive";
    pub const BAD_GET_ITEM: &str = "Bad Get-Item";
    pub const BAD_SET_ITEM: &str = "Bad Set-Item";
    pub const BAD_CLEANMGR: &str = "Bad cleanmgr";
    pub const BAD_AUTO_UNDO: &str = "Bad auto undo";
    pub const BAD_EMPTY_RECYCLE: &str = "Bad empty recycle";
    pub const BAD_MOVE: &str = "Bad move";
}

/// Named steps of a sanitize run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    StashExpensive,
    FlagCategories,
    RunCleanup,
    UnflagCategories,
    RestoreExpensive,
    EmptyRecycleBin,
    PurgeGlobs,
}

impl Step {
    /// Every step in the order the driver runs them.
    pub const ALL: [Step; 7] = [
        Step::StashExpensive,
        Step::FlagCategories,
        Step::RunCleanup,
        Step::UnflagCategories,
        Step::RestoreExpensive,
        Step::EmptyRecycleBin,
        Step::PurgeGlobs,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Step::StashExpensive => "stash-expensive",
            Step::FlagCategories => "flag-categories",
            Step::RunCleanup => "run-cleanup",
            Step::UnflagCategories => "unflag-categories",
            Step::RestoreExpensive => "restore-expensive",
            Step::EmptyRecycleBin => "empty-recycle-bin",
            Step::PurgeGlobs => "purge-globs",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of executing one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step did its work.
    Continue,
    /// The step hit a tolerated condition and did nothing (or only part).
    ToleratedSkip(ErrorKind),
    /// The step failed at a checkpoint; the run stops here.
    Fatal(&'static str),
}

impl StepOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StepOutcome::Fatal(_))
    }
}

/// A category entry flagged by this run, with the flag it had before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedAuto {
    pub location: String,
    /// `None` when the entry had no flag value at all.
    pub previous: Option<u32>,
}
