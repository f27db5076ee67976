//! Saga status machine and the fixed purchase step sequence.

use serde::{Deserialize, Serialize};

/// The status of a purchase saga in its lifecycle.
///
/// Status transitions:
/// ```text
/// pending ──► in_progress ──┬──► completed
///                           └──► failed ──► compensating ──► compensated
/// ```
///
/// `completed`, `compensated`, and `failed` (when nothing needs undoing)
/// are terminal; a saga never re-enters `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    /// Saga has been created but no step has run yet.
    #[default]
    Pending,

    /// Steps are being executed.
    InProgress,

    /// All steps ran and the purchase succeeded (terminal).
    Completed,

    /// A step failed; compensation may still follow.
    Failed,

    /// Completed steps are being unwound.
    Compensating,

    /// All completed steps were unwound after a failure (terminal).
    Compensated,
}

impl SagaStatus {
    /// Every status, in declaration order.
    pub const ALL: [SagaStatus; 6] = [
        SagaStatus::Pending,
        SagaStatus::InProgress,
        SagaStatus::Completed,
        SagaStatus::Failed,
        SagaStatus::Compensating,
        SagaStatus::Compensated,
    ];

    /// Returns true if no further mutation of the saga is allowed.
    ///
    /// `failed` counts as terminal here: a failed saga only leaves that
    /// status through the compensation engine, which checks
    /// `should_compensate` before the first step has been appended.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Failed | SagaStatus::Compensated
        )
    }

    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Pending => "pending",
            SagaStatus::InProgress => "in_progress",
            SagaStatus::Completed => "completed",
            SagaStatus::Failed => "failed",
            SagaStatus::Compensating => "compensating",
            SagaStatus::Compensated => "compensated",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The four purchase steps, in their fixed execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStep {
    /// Validate the user and place a balance hold.
    UserValidation,

    /// Deduct stock and credit the user's inventory.
    ItemGrant,

    /// Write the purchase audit record.
    LogRecord,

    /// Notify the user. Failure here never fails the saga.
    Notification,
}

impl SagaStep {
    /// The steps in execution order.
    pub const SEQUENCE: [SagaStep; 4] = [
        SagaStep::UserValidation,
        SagaStep::ItemGrant,
        SagaStep::LogRecord,
        SagaStep::Notification,
    ];

    /// Returns the wire name of the step.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::UserValidation => "user_validation",
            SagaStep::ItemGrant => "item_grant",
            SagaStep::LogRecord => "log_record",
            SagaStep::Notification => "notification",
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
