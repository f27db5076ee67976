//! Stateful wrapper around one saga's state: mutation helpers, derived
//! queries, and transition validity.

use chrono::Utc;

use common::TransactionId;

use crate::error::{Result, SagaError};
use crate::state::{SagaStatus, SagaStep};
use crate::types::{
    CompensationAction, PurchaseData, SagaErrorInfo, SagaState, SagaStepResult, StepStatus,
};

/// Owns one saga's state for the duration of a strategy's work on it.
///
/// The context enforces the status machine; the repository it is saved
/// to does not. At most one context drives a given transaction ID at a
/// time (the orchestrator owns its saga for the whole call; choreography
/// handlers serialize through [`crate::locks::TransactionLocks`]).
#[derive(Debug, Clone)]
pub struct SagaContext {
    state: SagaState,
}

impl SagaContext {
    /// Creates a context over a fresh `pending` saga.
    pub fn new(transaction_id: TransactionId, purchase_data: PurchaseData) -> Self {
        Self {
            state: SagaState::new(transaction_id, purchase_data),
        }
    }

    /// Wraps a saga loaded from the repository.
    pub fn from_state(state: SagaState) -> Self {
        Self { state }
    }

    /// Read access to the underlying state.
    pub fn state(&self) -> &SagaState {
        &self.state
    }

    /// Consumes the context, returning the state.
    pub fn into_state(self) -> SagaState {
        self.state
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.state.transaction_id
    }

    pub fn status(&self) -> SagaStatus {
        self.state.status
    }

    /// Returns true if the saga has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.state.status.is_terminal()
    }

    /// Transitions `pending → in_progress`.
    pub fn begin(&mut self) -> Result<()> {
        if self.state.status != SagaStatus::Pending {
            return Err(SagaError::InvalidTransition {
                expected: "pending",
                actual: self.state.status,
            });
        }
        self.state.status = SagaStatus::InProgress;
        Ok(())
    }

    /// Records which step is about to execute.
    pub fn set_current_step(&mut self, step: SagaStep) {
        self.state.current_step = Some(step);
    }

    /// Appends a step result to the append-only step log.
    ///
    /// A failed result transitions the saga to `failed` and records the
    /// failure time and error. The first failure wins: once `error` is
    /// set it is never overwritten.
    pub fn add_step_result(&mut self, result: SagaStepResult) {
        if result.status == StepStatus::Failed
            && let Some(error) = &result.error
        {
            self.mark_failed(result.step, &error.code, &error.message);
        }
        self.state.steps.push(result);
    }

    /// Appends a step result without affecting the saga status.
    ///
    /// Used for steps whose failure must not fail the saga; only the
    /// notification step qualifies.
    pub fn add_advisory_step(&mut self, result: SagaStepResult) {
        self.state.steps.push(result);
    }

    /// Transitions `failed → compensating` before unwinding begins.
    pub fn begin_compensation(&mut self) -> Result<()> {
        if self.state.status != SagaStatus::Failed {
            return Err(SagaError::InvalidTransition {
                expected: "failed",
                actual: self.state.status,
            });
        }
        self.state.status = SagaStatus::Compensating;
        Ok(())
    }

    /// Appends a compensation attempt to the append-only log.
    ///
    /// The saga is kept in `compensating` while unwinding.
    pub fn add_compensation(&mut self, action: CompensationAction) {
        self.state.status = SagaStatus::Compensating;
        self.state.compensations.push(action);
    }

    /// Transitions `compensating → compensated` after a full unwind.
    pub fn mark_compensated(&mut self) -> Result<()> {
        if self.state.status != SagaStatus::Compensating {
            return Err(SagaError::InvalidTransition {
                expected: "compensating",
                actual: self.state.status,
            });
        }
        self.state.status = SagaStatus::Compensated;
        Ok(())
    }

    /// Transitions `in_progress → completed`, clearing the current step.
    pub fn mark_completed(&mut self) -> Result<()> {
        if self.state.status != SagaStatus::InProgress {
            return Err(SagaError::InvalidTransition {
                expected: "in_progress",
                actual: self.state.status,
            });
        }
        self.state.status = SagaStatus::Completed;
        self.state.completed_at = Some(Utc::now());
        self.state.current_step = None;
        Ok(())
    }

    /// Records a failure. Idempotent: the first recorded error and
    /// failure time win, and a saga already past `failed` (compensating,
    /// compensated, completed) keeps its status.
    pub fn mark_failed(&mut self, step: SagaStep, code: &str, message: &str) {
        if matches!(
            self.state.status,
            SagaStatus::Pending | SagaStatus::InProgress
        ) {
            self.state.status = SagaStatus::Failed;
        }
        if self.state.failed_at.is_none() {
            self.state.failed_at = Some(Utc::now());
        }
        if self.state.error.is_none() {
            self.state.error = Some(SagaErrorInfo {
                step,
                code: code.to_string(),
                message: message.to_string(),
            });
        }
    }

    /// True iff the saga failed after at least one step had succeeded.
    ///
    /// A failure on the very first step short-circuits to `failed` with
    /// nothing to unwind.
    pub fn should_compensate(&self) -> bool {
        self.state.status == SagaStatus::Failed && !self.executed_steps().is_empty()
    }

    /// The ordered list of steps whose latest recorded result is
    /// success. Drives both progress reporting and compensation order.
    pub fn executed_steps(&self) -> Vec<SagaStep> {
        let mut latest: Vec<(SagaStep, StepStatus)> = Vec::new();
        for result in &self.state.steps {
            if let Some(entry) = latest.iter_mut().find(|(step, _)| *step == result.step) {
                entry.1 = result.status;
            } else {
                latest.push((result.step, result.status));
            }
        }
        latest
            .into_iter()
            .filter(|(_, status)| *status == StepStatus::Success)
            .map(|(step, _)| step)
            .collect()
    }

    /// The step that caused the first recorded failure, if any.
    pub fn failed_step(&self) -> Option<SagaStep> {
        self.state.error.as_ref().map(|e| e.step)
    }

    /// Wall-clock duration from start to the terminal timestamp, or to
    /// now if the saga is still running.
    pub fn duration_ms(&self) -> i64 {
        let end = self
            .state
            .completed_at
            .or(self.state.failed_at)
            .unwrap_or_else(Utc::now);
        (end - self.state.started_at).num_milliseconds()
    }
}
