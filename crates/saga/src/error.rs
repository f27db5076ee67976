//! Saga error types.

use common::TransactionId;
use domain::DomainError;
use event_bus::BusError;
use thiserror::Error;

use crate::config::CoordinationMode;
use crate::state::{SagaStatus, SagaStep};

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// No saga exists for the given transaction ID.
    #[error("Saga not found: {0}")]
    NotFound(TransactionId),

    /// The saga is in the wrong status for the requested transition.
    #[error("Invalid saga transition: expected {expected}, actual {actual}")]
    InvalidTransition {
        expected: &'static str,
        actual: SagaStatus,
    },

    /// An undo operation itself failed, leaving the system inconsistent.
    ///
    /// This is the one error the compensation path does not absorb; it
    /// requires manual follow-up.
    #[error("Compensation for step '{step}' failed: {reason}")]
    CompensationFailed { step: SagaStep, reason: String },

    /// The requested entry point is not wired under the current mode.
    #[error("Choreography handlers are not registered in {0} mode")]
    ModeMismatch(CoordinationMode),

    /// Event bus error.
    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),

    /// Domain collaborator error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
