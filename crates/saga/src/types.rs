//! The saga aggregate and the records it accumulates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::TransactionId;

use crate::state::{SagaStatus, SagaStep};

/// Immutable snapshot of the originating purchase request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseData {
    pub user_id: String,
    pub item_id: String,
    pub quantity: u32,
    pub price: u32,
}

impl PurchaseData {
    /// Total amount the purchase moves: unit price times quantity.
    /// `None` when the product does not fit the accounting range.
    pub fn total_amount(&self) -> Option<u32> {
        self.price.checked_mul(self.quantity)
    }
}

/// Outcome of a single step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failed,
}

/// Stable code plus human-readable message for a failed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub code: String,
    pub message: String,
}

impl StepError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// A single before/after change captured when a step mutated state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub before: u32,
    pub after: u32,
}

impl FieldChange {
    pub fn new(field: impl Into<String>, before: u32, after: u32) -> Self {
        Self {
            field: field.into(),
            before,
            after,
        }
    }
}

/// Typed before/after snapshot attached to a successful mutating step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub changes: Vec<FieldChange>,
}

/// One entry in the saga's append-only step log.
///
/// Entries are write-once: once appended they are never edited or
/// reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStepResult {
    pub step: SagaStep,
    pub status: StepStatus,
    pub error: Option<StepError>,
    pub executed_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Before/after field changes, present on successful mutating steps.
    pub snapshot: Option<StateSnapshot>,
    /// Audit log ID, present after a successful log_record step.
    pub log_id: Option<String>,
    /// Notification ID, present after a notification attempt.
    pub notification_id: Option<String>,
}

impl SagaStepResult {
    /// Creates a successful step result.
    pub fn succeeded(step: SagaStep, duration_ms: u64) -> Self {
        Self {
            step,
            status: StepStatus::Success,
            error: None,
            executed_at: Utc::now(),
            duration_ms,
            snapshot: None,
            log_id: None,
            notification_id: None,
        }
    }

    /// Creates a failed step result with its error code and message.
    pub fn failed(
        step: SagaStep,
        code: impl Into<String>,
        message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            step,
            status: StepStatus::Failed,
            error: Some(StepError::new(code, message)),
            executed_at: Utc::now(),
            duration_ms,
            snapshot: None,
            log_id: None,
            notification_id: None,
        }
    }

    /// Attaches a before/after state snapshot.
    pub fn with_snapshot(mut self, changes: Vec<FieldChange>) -> Self {
        self.snapshot = Some(StateSnapshot { changes });
        self
    }

    /// Attaches the audit log ID produced by the step.
    pub fn with_log_id(mut self, log_id: impl Into<String>) -> Self {
        self.log_id = Some(log_id.into());
        self
    }

    /// Attaches the notification ID produced by the step.
    pub fn with_notification_id(mut self, notification_id: impl Into<String>) -> Self {
        self.notification_id = Some(notification_id.into());
        self
    }
}

/// Outcome of one compensation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompensationStatus {
    Compensated,
    Failed,
}

/// One entry in the saga's append-only compensation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationAction {
    pub step: SagaStep,
    pub status: CompensationStatus,
    pub executed_at: DateTime<Utc>,
    pub detail: Option<String>,
}

impl CompensationAction {
    /// Creates a successful compensation record for a step.
    pub fn compensated(step: SagaStep) -> Self {
        Self {
            step,
            status: CompensationStatus::Compensated,
            executed_at: Utc::now(),
            detail: None,
        }
    }

    /// Creates a failed compensation record with the failure detail.
    pub fn failed(step: SagaStep, detail: impl Into<String>) -> Self {
        Self {
            step,
            status: CompensationStatus::Failed,
            executed_at: Utc::now(),
            detail: Some(detail.into()),
        }
    }
}

/// The first recorded failure of a saga: which step, which code, why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaErrorInfo {
    pub step: SagaStep,
    pub code: String,
    pub message: String,
}

/// The aggregate root for one purchase transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaState {
    pub transaction_id: TransactionId,
    pub status: SagaStatus,
    pub purchase_data: PurchaseData,
    /// The step currently executing, if any.
    pub current_step: Option<SagaStep>,
    /// Ordered append-only log of step attempts.
    pub steps: Vec<SagaStepResult>,
    /// Ordered append-only log of compensation attempts.
    pub compensations: Vec<CompensationAction>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    /// First recorded failure; never overwritten once set.
    pub error: Option<SagaErrorInfo>,
}

impl SagaState {
    /// Creates a fresh `pending` saga for one purchase request.
    pub fn new(transaction_id: TransactionId, purchase_data: PurchaseData) -> Self {
        Self {
            transaction_id,
            status: SagaStatus::Pending,
            purchase_data,
            current_step: None,
            steps: Vec::new(),
            compensations: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            failed_at: None,
            error: None,
        }
    }
}
