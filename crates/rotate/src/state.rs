//! Rotation run state machine.
//!
//! ```text
//! Idle --StartPreflight--> Preflighting --StageApplied--> Staged
//! Idle | Staged --StartValidate--> Validating
//! Idle | Staged | Validating | Failed --StartRollback--> RollingBack
//! any active state --PhaseFailed--> Failed
//! Preflighting | Staged | Validating --Finish--> Completed
//! RollingBack --Finish--> RolledBack
//! ```
//!
//! Every other `(state, event)` pair is rejected by [`transition`], so a
//! sequence such as "validate before stage" cannot be driven through a run.

use std::fmt;

use serde::Serialize;

use crate::error::RotationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Preflighting,
    Staged,
    Validating,
    RollingBack,
    Completed,
    Failed,
    RolledBack,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::RolledBack
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != RunState::Idle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    StartPreflight,
    /// The stage command exited zero.
    StageApplied,
    StartValidate,
    StartRollback,
    PhaseFailed,
    Finish,
}

/// The single dispatch function for run state.
///
/// # Errors
///
/// Returns [`RotationError::IllegalTransition`] for any pair not in the table.
pub fn transition(from: RunState, event: Event) -> Result<RunState, RotationError> {
    use Event::*;
    use RunState::*;

    let next = match (from, event) {
        (Idle, StartPreflight) => Preflighting,
        (Preflighting, StageApplied) => Staged,
        (Idle | Staged, StartValidate) => Validating,
        (Idle | Staged | Validating | Failed, StartRollback) => RollingBack,
        (s, PhaseFailed) if s.is_active() => Failed,
        (Preflighting | Staged | Validating, Finish) => Completed,
        (RollingBack, Finish) => RolledBack,
        (from, event) => return Err(RotationError::IllegalTransition { from, event }),
    };
    Ok(next)
}

/// One step of a rotation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Preflight,
    Stage,
    Validate,
    Rollback,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Preflight => "preflight",
            Phase::Stage => "stage",
            Phase::Validate => "validate",
            Phase::Rollback => "rollback",
        }
    }

    /// Event that enters this phase. Stage runs from `Preflighting` and has
    /// no entry event of its own.
    pub fn start_event(&self) -> Option<Event> {
        match self {
            Phase::Preflight => Some(Event::StartPreflight),
            Phase::Stage => None,
            Phase::Validate => Some(Event::StartValidate),
            Phase::Rollback => Some(Event::StartRollback),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
