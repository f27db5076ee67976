//! The purchase event vocabulary.
//!
//! A closed set of tagged variants, one concrete payload per event type,
//! so handlers pattern-match exhaustively instead of trusting untyped
//! fields. These events are the only communication artifact between the
//! strategies, the handlers, and external observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use event_bus::EventPayload;

use crate::state::SagaStep;
use crate::types::PurchaseData;

/// Everything that can happen to a purchase saga.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PurchaseEvent {
    /// A purchase request was accepted and a saga created.
    PurchaseInitiated(PurchaseInitiatedData),

    /// The user passed validation and the balance hold was placed.
    UserValidated(UserValidatedData),

    /// User validation failed.
    UserValidationFailed(StepFailureData),

    /// The item was granted into the user's inventory.
    ItemGranted(ItemGrantedData),

    /// The item grant failed.
    ItemGrantFailed(StepFailureData),

    /// The audit record was written.
    LogRecorded(LogRecordedData),

    /// The audit write failed.
    LogFailed(StepFailureData),

    /// The notification was delivered.
    NotificationSent(NotificationSentData),

    /// Notification delivery failed (advisory only).
    NotificationFailed(StepFailureData),

    /// The purchase reached `completed`.
    PurchaseCompleted(PurchaseCompletedData),

    /// The purchase terminally failed.
    PurchaseFailed(PurchaseFailedData),

    /// Compensation of completed steps started.
    CompensationInitiated(CompensationInitiatedData),

    /// Every completed step was successfully unwound.
    CompensationCompleted(CompensationCompletedData),

    /// An undo operation itself failed (critical condition).
    CompensationFailed(CompensationFailedData),
}

impl EventPayload for PurchaseEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseEvent::PurchaseInitiated(_) => "PurchaseInitiated",
            PurchaseEvent::UserValidated(_) => "UserValidated",
            PurchaseEvent::UserValidationFailed(_) => "UserValidationFailed",
            PurchaseEvent::ItemGranted(_) => "ItemGranted",
            PurchaseEvent::ItemGrantFailed(_) => "ItemGrantFailed",
            PurchaseEvent::LogRecorded(_) => "LogRecorded",
            PurchaseEvent::LogFailed(_) => "LogFailed",
            PurchaseEvent::NotificationSent(_) => "NotificationSent",
            PurchaseEvent::NotificationFailed(_) => "NotificationFailed",
            PurchaseEvent::PurchaseCompleted(_) => "PurchaseCompleted",
            PurchaseEvent::PurchaseFailed(_) => "PurchaseFailed",
            PurchaseEvent::CompensationInitiated(_) => "CompensationInitiated",
            PurchaseEvent::CompensationCompleted(_) => "CompensationCompleted",
            PurchaseEvent::CompensationFailed(_) => "CompensationFailed",
        }
    }
}

/// Data for PurchaseInitiated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseInitiatedData {
    pub purchase: PurchaseData,
}

/// Data for UserValidated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserValidatedData {
    pub user_id: String,
    /// Balance after the hold was placed.
    pub current_balance: u32,
    /// Amount held for this purchase.
    pub amount_reserved: u32,
}

/// Data shared by every step-failure event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailureData {
    pub step: SagaStep,
    pub error_code: String,
    pub reason: String,
}

/// Data for ItemGranted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemGrantedData {
    pub user_id: String,
    pub item_id: String,
    pub quantity: u32,
    pub stock_remaining: u32,
}

/// Data for LogRecorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecordedData {
    pub log_id: String,
}

/// Data for NotificationSent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSentData {
    pub notification_id: String,
}

/// Data for PurchaseCompleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseCompletedData {
    pub executed_steps: Vec<SagaStep>,
    pub completed_at: DateTime<Utc>,
}

/// Data for PurchaseFailed: the original failure's step, code, message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseFailedData {
    pub step: SagaStep,
    pub error_code: String,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Data for CompensationInitiated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationInitiatedData {
    /// The step whose failure triggered the unwind.
    pub from_step: SagaStep,
}

/// Data for CompensationCompleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationCompletedData {
    pub compensated_steps: Vec<SagaStep>,
    pub completed_at: DateTime<Utc>,
}

/// Data for CompensationFailed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationFailedData {
    pub step: SagaStep,
    pub reason: String,
}

// Convenience constructors
impl PurchaseEvent {
    /// Creates a PurchaseInitiated event.
    pub fn purchase_initiated(purchase: PurchaseData) -> Self {
        PurchaseEvent::PurchaseInitiated(PurchaseInitiatedData { purchase })
    }

    /// Creates a UserValidated event.
    pub fn user_validated(
        user_id: impl Into<String>,
        current_balance: u32,
        amount_reserved: u32,
    ) -> Self {
        PurchaseEvent::UserValidated(UserValidatedData {
            user_id: user_id.into(),
            current_balance,
            amount_reserved,
        })
    }

    /// Creates a UserValidationFailed event.
    pub fn user_validation_failed(
        error_code: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        PurchaseEvent::UserValidationFailed(StepFailureData {
            step: SagaStep::UserValidation,
            error_code: error_code.into(),
            reason: reason.into(),
        })
    }

    /// Creates an ItemGranted event.
    pub fn item_granted(
        user_id: impl Into<String>,
        item_id: impl Into<String>,
        quantity: u32,
        stock_remaining: u32,
    ) -> Self {
        PurchaseEvent::ItemGranted(ItemGrantedData {
            user_id: user_id.into(),
            item_id: item_id.into(),
            quantity,
            stock_remaining,
        })
    }

    /// Creates an ItemGrantFailed event.
    pub fn item_grant_failed(error_code: impl Into<String>, reason: impl Into<String>) -> Self {
        PurchaseEvent::ItemGrantFailed(StepFailureData {
            step: SagaStep::ItemGrant,
            error_code: error_code.into(),
            reason: reason.into(),
        })
    }

    /// Creates a LogRecorded event.
    pub fn log_recorded(log_id: impl Into<String>) -> Self {
        PurchaseEvent::LogRecorded(LogRecordedData {
            log_id: log_id.into(),
        })
    }

    /// Creates a LogFailed event.
    pub fn log_failed(error_code: impl Into<String>, reason: impl Into<String>) -> Self {
        PurchaseEvent::LogFailed(StepFailureData {
            step: SagaStep::LogRecord,
            error_code: error_code.into(),
            reason: reason.into(),
        })
    }

    /// Creates a NotificationSent event.
    pub fn notification_sent(notification_id: impl Into<String>) -> Self {
        PurchaseEvent::NotificationSent(NotificationSentData {
            notification_id: notification_id.into(),
        })
    }

    /// Creates a NotificationFailed event.
    pub fn notification_failed(error_code: impl Into<String>, reason: impl Into<String>) -> Self {
        PurchaseEvent::NotificationFailed(StepFailureData {
            step: SagaStep::Notification,
            error_code: error_code.into(),
            reason: reason.into(),
        })
    }

    /// Creates a PurchaseCompleted event.
    pub fn purchase_completed(executed_steps: Vec<SagaStep>) -> Self {
        PurchaseEvent::PurchaseCompleted(PurchaseCompletedData {
            executed_steps,
            completed_at: Utc::now(),
        })
    }

    /// Creates a PurchaseFailed event.
    pub fn purchase_failed(
        step: SagaStep,
        error_code: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        PurchaseEvent::PurchaseFailed(PurchaseFailedData {
            step,
            error_code: error_code.into(),
            reason: reason.into(),
            failed_at: Utc::now(),
        })
    }

    /// Creates a CompensationInitiated event.
    pub fn compensation_initiated(from_step: SagaStep) -> Self {
        PurchaseEvent::CompensationInitiated(CompensationInitiatedData { from_step })
    }

    /// Creates a CompensationCompleted event.
    pub fn compensation_completed(compensated_steps: Vec<SagaStep>) -> Self {
        PurchaseEvent::CompensationCompleted(CompensationCompletedData {
            compensated_steps,
            completed_at: Utc::now(),
        })
    }

    /// Creates a CompensationFailed event.
    pub fn compensation_failed(step: SagaStep, reason: impl Into<String>) -> Self {
        PurchaseEvent::CompensationFailed(CompensationFailedData {
            step,
            reason: reason.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn purchase() -> PurchaseData {
        PurchaseData {
            user_id: "user-123".to_string(),
            item_id: "item-sword".to_string(),
            quantity: 1,
            price: 100,
        }
    }

    #[test]
    fn test_event_type() {
        assert_eq!(
            PurchaseEvent::purchase_initiated(purchase()).event_type(),
            "PurchaseInitiated"
        );
        assert_eq!(
            PurchaseEvent::user_validated("user-123", 900, 100).event_type(),
            "UserValidated"
        );
        assert_eq!(
            PurchaseEvent::user_validation_failed("INSUFFICIENT_BALANCE", "too poor").event_type(),
            "UserValidationFailed"
        );
        assert_eq!(
            PurchaseEvent::item_granted("user-123", "item-sword", 1, 49).event_type(),
            "ItemGranted"
        );
        assert_eq!(
            PurchaseEvent::item_grant_failed("INSUFFICIENT_STOCK", "0 left").event_type(),
            "ItemGrantFailed"
        );
        assert_eq!(
            PurchaseEvent::log_recorded("LOG-0001").event_type(),
            "LogRecorded"
        );
        assert_eq!(
            PurchaseEvent::log_failed("LOG_WRITE_FAILED", "outage").event_type(),
            "LogFailed"
        );
        assert_eq!(
            PurchaseEvent::notification_sent("NOTIF-0001").event_type(),
            "NotificationSent"
        );
        assert_eq!(
            PurchaseEvent::notification_failed("DELIVERY_FAILED", "outage").event_type(),
            "NotificationFailed"
        );
        assert_eq!(
            PurchaseEvent::purchase_completed(SagaStep::SEQUENCE.to_vec()).event_type(),
            "PurchaseCompleted"
        );
        assert_eq!(
            PurchaseEvent::purchase_failed(SagaStep::ItemGrant, "INSUFFICIENT_STOCK", "0 left")
                .event_type(),
            "PurchaseFailed"
        );
        assert_eq!(
            PurchaseEvent::compensation_initiated(SagaStep::ItemGrant).event_type(),
            "CompensationInitiated"
        );
        assert_eq!(
            PurchaseEvent::compensation_completed(vec![SagaStep::UserValidation]).event_type(),
            "CompensationCompleted"
        );
        assert_eq!(
            PurchaseEvent::compensation_failed(SagaStep::UserValidation, "refund down")
                .event_type(),
            "CompensationFailed"
        );
    }

    #[test]
    fn test_serialization_is_tagged() {
        let event = PurchaseEvent::user_validated("user-123", 900, 100);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "UserValidated");
        assert_eq!(json["data"]["current_balance"], 900);

        let back: PurchaseEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.event_type(), "UserValidated");
    }

    #[test]
    fn test_failure_events_carry_their_step() {
        if let PurchaseEvent::UserValidationFailed(data) =
            PurchaseEvent::user_validation_failed("USER_NOT_FOUND", "missing")
        {
            assert_eq!(data.step, SagaStep::UserValidation);
        } else {
            panic!("Expected UserValidationFailed event");
        }

        if let PurchaseEvent::LogFailed(data) = PurchaseEvent::log_failed("LOG_WRITE_FAILED", "x") {
            assert_eq!(data.step, SagaStep::LogRecord);
        } else {
            panic!("Expected LogFailed event");
        }
    }
}
