//! Error taxonomy for rotation runs.

use common::Environment;
use thiserror::Error;

use crate::state::{Event, Phase, RunState};

/// Why a rotation run did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RotationError {
    /// A required setting is missing or invalid. Raised before any external call.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An external command exited non-zero, could not be spawned, or a health
    /// check failed.
    #[error("{phase} phase failed: {reason}")]
    Phase { phase: Phase, reason: String },

    /// Another run holds the lock for this environment.
    #[error("a rotation run is already active for {environment} (lock holder: {holder})")]
    Concurrency {
        environment: Environment,
        holder: String,
    },

    #[error("illegal transition from {from:?} on {event:?}")]
    IllegalTransition { from: RunState, event: Event },

    /// The evidence file or lock directory could not be written.
    #[error("evidence sink failure: {0}")]
    Evidence(String),
}

impl RotationError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        RotationError::Configuration(msg.into())
    }

    /// Phase that failed, if the error came from one.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            RotationError::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}
