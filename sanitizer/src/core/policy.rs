//! Tolerance table: which host failures each checkpoint swallows.

use crate::core::types::{ErrorKind, StepOutcome, fatal};

/// Points in a run where a host failure is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// Moving an expensive category out of the enumeration scope.
    Stash,
    /// Listing the cleanup categories under the parent key.
    Enumerate,
    /// Reading one category's autorun flag.
    ReadFlag,
    /// Setting one category's autorun flag.
    SetFlag,
    /// Running the disk-cleanup utility.
    Cleanup,
    /// Restoring a flag this run set.
    UndoFlag,
    /// Moving an expensive category back.
    Restore,
    /// Removing the emptied stash key after the restore.
    DropStash,
    /// Emptying the recycle bins.
    EmptyRecycle,
    /// Deleting one purge glob.
    Purge,
}

/// Tolerated kinds and the fatal message for one checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub tolerated: &'static [ErrorKind],
    /// `None` means every failure is tolerated.
    pub fatal: Option<&'static str>,
}

const NOTHING: &[ErrorKind] = &[];

pub fn policy(checkpoint: Checkpoint) -> Policy {
    match checkpoint {
        Checkpoint::Stash | Checkpoint::Restore => Policy {
            tolerated: &[ErrorKind::AbsentTarget],
            fatal: Some(fatal::BAD_MOVE),
        },
        Checkpoint::Enumerate => Policy {
            tolerated: NOTHING,
            fatal: Some(fatal::UNKNOWN_HIVE),
        },
        Checkpoint::ReadFlag => Policy {
            tolerated: NOTHING,
            fatal: Some(fatal::BAD_GET_ITEM),
        },
        Checkpoint::SetFlag => Policy {
            tolerated: NOTHING,
            fatal: Some(fatal::BAD_SET_ITEM),
        },
        Checkpoint::Cleanup => Policy {
            tolerated: &[ErrorKind::UtilityUnavailable],
            fatal: Some(fatal::BAD_CLEANMGR),
        },
        Checkpoint::UndoFlag => Policy {
            tolerated: NOTHING,
            fatal: Some(fatal::BAD_AUTO_UNDO),
        },
        Checkpoint::EmptyRecycle => Policy {
            tolerated: &[ErrorKind::Os, ErrorKind::UtilityUnavailable],
            fatal: Some(fatal::BAD_EMPTY_RECYCLE),
        },
        Checkpoint::DropStash | Checkpoint::Purge => Policy {
            tolerated: NOTHING,
            fatal: None,
        },
    }
}

/// Map a failure at `checkpoint` to the step outcome it produces.
pub fn classify(checkpoint: Checkpoint, kind: ErrorKind) -> StepOutcome {
    let policy = policy(checkpoint);
    match policy.fatal {
        Some(message) if !policy.tolerated.contains(&kind) => StepOutcome::Fatal(message),
        _ => StepOutcome::ToleratedSkip(kind),
    }
}
