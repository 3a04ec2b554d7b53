//! Orchestration for `sanitizer sanitize`.
//!
//! Runs [`Step::ALL`] in order against a [`Host`], publishing the run state to a
//! [`MetadataSink`]. The first fatal step publishes `state=error` and ends the run
//! without rolling back earlier registry changes.

use anyhow::Result;
use tracing::{debug, error, info, instrument, warn};

use crate::core::policy::{Checkpoint, classify};
use crate::core::run_state::RunTracker;
use crate::core::types::{AddedAuto, RunState, Step, StepOutcome};
use crate::io::config::SanitizeConfig;
use crate::io::host::{CleanupRequest, Host, HostError};
use crate::io::metadata::{ERROR_KEY, MetadataSink, STATE_KEY};

/// Outcome of one executed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub step: Step,
    pub outcome: StepOutcome,
}

/// Summary of a sanitize run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizeReport {
    /// Terminal state published to the sink.
    pub state: RunState,
    /// Message published under `error`, if the run failed.
    pub error: Option<&'static str>,
    /// Steps that ran, in order. A fatal step is the last entry.
    pub steps: Vec<StepRecord>,
    /// Categories this run flagged for the cleanup utility.
    pub flagged: Vec<AddedAuto>,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Stash,
    Restore,
}

/// Execute a full sanitize run.
///
/// Errors are returned only when the metadata sink itself fails; every host
/// failure is classified and reported through the sink instead.
#[instrument(skip_all)]
pub fn run_sanitize<H: Host, S: MetadataSink>(
    host: &H,
    sink: &S,
    cfg: &SanitizeConfig,
) -> Result<SanitizeReport> {
    let mut tracker = RunTracker::new();
    publish(sink, &mut tracker, RunState::Running, None)?;

    let mut added: Vec<AddedAuto> = Vec::new();
    let mut steps = Vec::with_capacity(Step::ALL.len());

    for step in Step::ALL {
        debug!(step = %step, "step started");
        let outcome = run_one(step, host, cfg, &mut added);
        match &outcome {
            StepOutcome::Continue => info!(step = %step, "step completed"),
            StepOutcome::ToleratedSkip(kind) => {
                info!(step = %step, kind = %kind, "step skipped tolerated failure");
            }
            StepOutcome::Fatal(message) => error!(step = %step, reason = %message, "step failed"),
        }
        steps.push(StepRecord {
            step,
            outcome: outcome.clone(),
        });

        if let StepOutcome::Fatal(message) = outcome {
            publish(sink, &mut tracker, RunState::Error, Some(message))?;
            return Ok(SanitizeReport {
                state: RunState::Error,
                error: Some(message),
                steps,
                flagged: added,
            });
        }
    }

    publish(sink, &mut tracker, RunState::Success, None)?;
    Ok(SanitizeReport {
        state: RunState::Success,
        error: None,
        steps,
        flagged: added,
    })
}

fn run_one<H: Host>(
    step: Step,
    host: &H,
    cfg: &SanitizeConfig,
    added: &mut Vec<AddedAuto>,
) -> StepOutcome {
    match step {
        Step::StashExpensive => move_expensive(host, cfg, Direction::Stash),
        Step::FlagCategories => flag_categories(host, cfg, added),
        Step::RunCleanup => run_cleanup(host, cfg),
        Step::UnflagCategories => unflag_categories(host, cfg, added),
        Step::RestoreExpensive => match move_expensive(host, cfg, Direction::Restore) {
            fatal @ StepOutcome::Fatal(_) => fatal,
            outcome => {
                drop_stash(host, cfg);
                outcome
            }
        },
        Step::EmptyRecycleBin => match host.empty_recycle_bin() {
            Ok(()) => StepOutcome::Continue,
            Err(err) => failure(Checkpoint::EmptyRecycle, &err),
        },
        Step::PurgeGlobs => purge_globs(host, cfg),
    }
}

/// Publish a state change: `error` first, then `state`, so pollers that see a
/// terminal state also see its message.
fn publish<S: MetadataSink>(
    sink: &S,
    tracker: &mut RunTracker,
    state: RunState,
    error: Option<&str>,
) -> Result<()> {
    debug!(from = ?tracker.current(), to = %state, "advancing run state");
    tracker.advance(state)?;
    if state.is_terminal() {
        sink.put(ERROR_KEY, error.unwrap_or(""))?;
    }
    sink.put(STATE_KEY, state.as_str())?;
    info!(state = %state, error = error.unwrap_or(""), "published run state");
    Ok(())
}

fn failure(checkpoint: Checkpoint, err: &HostError) -> StepOutcome {
    let outcome = classify(checkpoint, err.kind);
    match &outcome {
        StepOutcome::Fatal(_) => warn!(?checkpoint, err = %err, "host operation failed"),
        _ => debug!(?checkpoint, err = %err, "host failure tolerated"),
    }
    outcome
}

fn move_expensive<H: Host>(host: &H, cfg: &SanitizeConfig, direction: Direction) -> StepOutcome {
    let checkpoint = match direction {
        Direction::Stash => Checkpoint::Stash,
        Direction::Restore => Checkpoint::Restore,
    };
    let mut outcome = StepOutcome::Continue;
    for name in &cfg.expensive_categories {
        let (from, to) = match direction {
            Direction::Stash => (cfg.category_key(name), cfg.stashed_key(name)),
            Direction::Restore => (cfg.stashed_key(name), cfg.category_key(name)),
        };
        match host.move_key(&from, &to) {
            Ok(()) => debug!(category = %name, ?direction, "moved category"),
            Err(err) => match failure(checkpoint, &err) {
                fatal @ StepOutcome::Fatal(_) => return fatal,
                tolerated => outcome = tolerated,
            },
        }
    }
    outcome
}

/// Remove the stash key once the restore has emptied it. Never fails the run.
fn drop_stash<H: Host>(host: &H, cfg: &SanitizeConfig) {
    match host.delete_key_if_empty(&cfg.stash_key) {
        Ok(deleted) => debug!(key = %cfg.stash_key, deleted, "stash key cleanup"),
        Err(err) => {
            failure(Checkpoint::DropStash, &err);
        }
    }
}

fn flag_categories<H: Host>(
    host: &H,
    cfg: &SanitizeConfig,
    added: &mut Vec<AddedAuto>,
) -> StepOutcome {
    let locations = match host.list_subkeys(&cfg.volume_caches_key) {
        Ok(locations) => locations,
        Err(err) => return failure(Checkpoint::Enumerate, &err),
    };
    debug!(count = locations.len(), "enumerated cleanup categories");

    for location in locations {
        let previous = match host.read_dword(&location, &cfg.autorun_value) {
            Ok(previous) => previous,
            Err(err) => return failure(Checkpoint::ReadFlag, &err),
        };
        if previous == Some(1) {
            continue;
        }
        if let Err(err) = host.write_dword(&location, &cfg.autorun_value, 1) {
            return failure(Checkpoint::SetFlag, &err);
        }
        debug!(location = %location, ?previous, "flagged category");
        added.push(AddedAuto { location, previous });
    }
    StepOutcome::Continue
}

fn run_cleanup<H: Host>(host: &H, cfg: &SanitizeConfig) -> StepOutcome {
    let request = CleanupRequest {
        program: cfg.cleanup_utility.clone(),
        args: cfg.cleanup_args.clone(),
        timeout: cfg.cleanmgr_timeout(),
    };
    match host.run_cleanup(&request) {
        Ok(()) => StepOutcome::Continue,
        Err(err) => failure(Checkpoint::Cleanup, &err),
    }
}

fn unflag_categories<H: Host>(host: &H, cfg: &SanitizeConfig, added: &[AddedAuto]) -> StepOutcome {
    for entry in added {
        let result = match entry.previous {
            Some(value) => host.write_dword(&entry.location, &cfg.autorun_value, value),
            None => host.delete_value(&entry.location, &cfg.autorun_value),
        };
        if let Err(err) = result {
            return failure(Checkpoint::UndoFlag, &err);
        }
    }
    StepOutcome::Continue
}

fn purge_globs<H: Host>(host: &H, cfg: &SanitizeConfig) -> StepOutcome {
    let mut outcome = StepOutcome::Continue;
    for pattern in &cfg.purge_globs {
        match host.purge(pattern) {
            Ok(summary) => {
                if summary.failed > 0 {
                    warn!(pattern = %pattern, ?summary, "some paths could not be deleted");
                } else {
                    debug!(pattern = %pattern, ?summary, "purged");
                }
            }
            Err(err) => outcome = failure(Checkpoint::Purge, &err),
        }
    }
    outcome
}
