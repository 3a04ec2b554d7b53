//! Monotonic run-state tracking.

use thiserror::Error;

use crate::core::types::RunState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid run state transition {from:?} -> {to}")]
pub struct InvalidTransition {
    pub from: Option<RunState>,
    pub to: RunState,
}

/// Tracks `Init -> Running -> {Success | Error}`.
///
/// Terminal states are final; nothing moves back to `Running`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunTracker {
    current: Option<RunState>,
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` until the run has been announced.
    pub fn current(&self) -> Option<RunState> {
        self.current
    }

    pub fn advance(&mut self, next: RunState) -> Result<(), InvalidTransition> {
        let allowed = match (self.current, next) {
            (None, RunState::Running) => true,
            (Some(RunState::Running), to) => to.is_terminal(),
            _ => false,
        };
        if !allowed {
            return Err(InvalidTransition {
                from: self.current,
                to: next,
            });
        }
        self.current = Some(next);
        Ok(())
    }
}
