//! Notification delivery with simulated outages and manual retry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use common::TransactionId;

use crate::codes;
use crate::error::Result;

/// Maximum number of manual retry attempts per notification.
pub const MAX_RETRIES: u32 = 3;

/// Category of a notification, which decides the delivery channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PurchaseSuccess,
    PurchaseFailed,
    ItemGranted,
    Refund,
}

impl NotificationKind {
    /// Stable wire name for the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::PurchaseSuccess => "purchase_success",
            NotificationKind::PurchaseFailed => "purchase_failed",
            NotificationKind::ItemGranted => "item_granted",
            NotificationKind::Refund => "refund",
        }
    }
}

/// Delivery state of a stored notification record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

/// A stored notification and its delivery history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub notification_id: String,
    pub user_id: String,
    pub transaction_id: TransactionId,
    pub kind: NotificationKind,
    pub message: String,
    pub sent_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub retry_count: u32,
    pub metadata: Value,
}

/// Parameters for a send call.
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub user_id: String,
    pub transaction_id: TransactionId,
    pub kind: NotificationKind,
    pub message: String,
    pub metadata: Value,
}

/// Outcome of a send or retry call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationOutcome {
    pub success: bool,
    pub notification_id: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub error_code: Option<String>,
}

/// Counts of stored notifications per delivery status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationStatistics {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Delivers user-facing notifications. Notifications are never undone.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Attempts delivery once and records the attempt either way.
    async fn send(&self, request: NotificationRequest) -> Result<NotificationOutcome>;

    /// Re-attempts delivery of a previously failed notification, capped
    /// at three retries. Lives outside the saga's critical path.
    async fn retry(&self, notification_id: &str) -> Result<NotificationOutcome>;

    /// Returns all notifications for one user, newest first.
    async fn notifications_for_user(&self, user_id: &str) -> Vec<NotificationRecord>;

    /// Returns all notifications for one transaction, oldest first.
    async fn notifications_for_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Vec<NotificationRecord>;

    /// Returns counts per delivery status.
    async fn statistics(&self) -> NotificationStatistics;
}

#[derive(Debug)]
struct NotifierState {
    records: HashMap<String, NotificationRecord>,
    next_id: u32,
    failure_rate: f64,
    fail_on_send: bool,
    fail_on_retry: bool,
}

/// In-memory notifier with a configurable simulated failure rate.
///
/// The default failure rate is 10%, matching the flakiness the rest of
/// the system is expected to tolerate.
#[derive(Debug, Clone)]
pub struct InMemoryNotifier {
    state: Arc<RwLock<NotifierState>>,
}

impl Default for InMemoryNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryNotifier {
    /// Creates a notifier with the default 10% failure rate.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(NotifierState {
                records: HashMap::new(),
                next_id: 0,
                failure_rate: 0.1,
                fail_on_send: false,
                fail_on_retry: false,
            })),
        }
    }

    /// Sets the probability in `[0, 1]` that a send attempt fails.
    pub fn set_failure_rate(&self, rate: f64) {
        self.state.write().unwrap().failure_rate = rate.clamp(0.0, 1.0);
    }

    /// Forces send attempts to fail deterministically.
    pub fn set_fail_on_send(&self, fail: bool) {
        self.state.write().unwrap().fail_on_send = fail;
    }

    /// Forces retry attempts to fail deterministically.
    pub fn set_fail_on_retry(&self, fail: bool) {
        self.state.write().unwrap().fail_on_retry = fail;
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn send(&self, request: NotificationRequest) -> Result<NotificationOutcome> {
        let mut state = self.state.write().unwrap();

        state.next_id += 1;
        let notification_id = format!("NOTIF-{:04}", state.next_id);
        let sent_at = Utc::now();
        let delivered = !state.fail_on_send && rand::random::<f64>() >= state.failure_rate;

        state.records.insert(
            notification_id.clone(),
            NotificationRecord {
                notification_id: notification_id.clone(),
                user_id: request.user_id.clone(),
                transaction_id: request.transaction_id,
                kind: request.kind,
                message: request.message,
                sent_at,
                status: if delivered {
                    DeliveryStatus::Sent
                } else {
                    DeliveryStatus::Failed
                },
                retry_count: 0,
                metadata: request.metadata,
            },
        );

        if delivered {
            tracing::debug!(
                notification_id,
                user_id = %request.user_id,
                kind = request.kind.as_str(),
                "notification sent"
            );
            Ok(NotificationOutcome {
                success: true,
                notification_id: Some(notification_id),
                sent_at,
                reason: None,
                error_code: None,
            })
        } else {
            tracing::warn!(
                notification_id,
                user_id = %request.user_id,
                "notification delivery failed (simulated)"
            );
            Ok(NotificationOutcome {
                success: false,
                notification_id: Some(notification_id),
                sent_at,
                reason: Some("Notification delivery failed".to_string()),
                error_code: Some(codes::DELIVERY_FAILED.to_string()),
            })
        }
    }

    async fn retry(&self, notification_id: &str) -> Result<NotificationOutcome> {
        let mut state = self.state.write().unwrap();
        let fail_on_retry = state.fail_on_retry;

        let Some(record) = state.records.get_mut(notification_id) else {
            return Ok(NotificationOutcome {
                success: false,
                notification_id: Some(notification_id.to_string()),
                sent_at: Utc::now(),
                reason: Some("Notification record not found".to_string()),
                error_code: Some(codes::NOTIFICATION_NOT_FOUND.to_string()),
            });
        };

        if record.status == DeliveryStatus::Sent {
            return Ok(NotificationOutcome {
                success: true,
                notification_id: Some(notification_id.to_string()),
                sent_at: record.sent_at,
                reason: None,
                error_code: None,
            });
        }

        if record.retry_count >= MAX_RETRIES {
            tracing::warn!(notification_id, "max retry attempts reached");
            return Ok(NotificationOutcome {
                success: false,
                notification_id: Some(notification_id.to_string()),
                sent_at: Utc::now(),
                reason: Some("Max retry attempts exceeded".to_string()),
                error_code: Some(codes::MAX_RETRIES_EXCEEDED.to_string()),
            });
        }

        record.retry_count += 1;

        if fail_on_retry {
            tracing::warn!(
                notification_id,
                attempt = record.retry_count,
                "notification retry failed"
            );
            return Ok(NotificationOutcome {
                success: false,
                notification_id: Some(notification_id.to_string()),
                sent_at: Utc::now(),
                reason: Some(format!("Retry failed (attempt {})", record.retry_count)),
                error_code: Some(codes::DELIVERY_FAILED.to_string()),
            });
        }

        record.status = DeliveryStatus::Sent;
        record.sent_at = Utc::now();
        tracing::debug!(
            notification_id,
            attempt = record.retry_count,
            "notification retry succeeded"
        );

        Ok(NotificationOutcome {
            success: true,
            notification_id: Some(notification_id.to_string()),
            sent_at: record.sent_at,
            reason: None,
            error_code: None,
        })
    }

    async fn notifications_for_user(&self, user_id: &str) -> Vec<NotificationRecord> {
        let mut records: Vec<_> = self
            .state
            .read()
            .unwrap()
            .records
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| std::cmp::Reverse(r.sent_at));
        records
    }

    async fn notifications_for_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Vec<NotificationRecord> {
        let mut records: Vec<_> = self
            .state
            .read()
            .unwrap()
            .records
            .values()
            .filter(|r| r.transaction_id == transaction_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.sent_at);
        records
    }

    async fn statistics(&self) -> NotificationStatistics {
        let state = self.state.read().unwrap();
        let mut stats = NotificationStatistics {
            total: state.records.len(),
            ..Default::default()
        };
        for record in state.records.values() {
            match record.status {
                DeliveryStatus::Sent => stats.sent += 1,
                DeliveryStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request() -> NotificationRequest {
        NotificationRequest {
            user_id: "user-123".to_string(),
            transaction_id: TransactionId::new(),
            kind: NotificationKind::PurchaseSuccess,
            message: "Purchase completed!".to_string(),
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn send_records_successful_delivery() {
        let notifier = InMemoryNotifier::new();
        notifier.set_failure_rate(0.0);

        let outcome = notifier.send(request()).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.notification_id.unwrap().starts_with("NOTIF-"));

        let stats = notifier.statistics().await;
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn forced_failure_records_failed_delivery() {
        let notifier = InMemoryNotifier::new();
        notifier.set_fail_on_send(true);

        let outcome = notifier.send(request()).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error_code.as_deref(), Some(codes::DELIVERY_FAILED));
        assert_eq!(notifier.statistics().await.failed, 1);
    }

    #[tokio::test]
    async fn retry_succeeds_and_marks_sent() {
        let notifier = InMemoryNotifier::new();
        notifier.set_fail_on_send(true);
        let outcome = notifier.send(request()).await.unwrap();
        let id = outcome.notification_id.unwrap();

        notifier.set_fail_on_send(false);
        let retried = notifier.retry(&id).await.unwrap();
        assert!(retried.success);
        assert_eq!(notifier.statistics().await.sent, 1);
    }

    #[tokio::test]
    async fn retry_of_sent_notification_is_a_no_op_success() {
        let notifier = InMemoryNotifier::new();
        notifier.set_failure_rate(0.0);
        let outcome = notifier.send(request()).await.unwrap();
        let id = outcome.notification_id.unwrap();

        let retried = notifier.retry(&id).await.unwrap();
        assert!(retried.success);
    }

    #[tokio::test]
    async fn retry_cap_is_enforced() {
        let notifier = InMemoryNotifier::new();
        notifier.set_fail_on_send(true);
        notifier.set_fail_on_retry(true);
        let outcome = notifier.send(request()).await.unwrap();
        let id = outcome.notification_id.unwrap();

        for _ in 0..MAX_RETRIES {
            let retried = notifier.retry(&id).await.unwrap();
            assert!(!retried.success);
            assert_eq!(retried.error_code.as_deref(), Some(codes::DELIVERY_FAILED));
        }

        let capped = notifier.retry(&id).await.unwrap();
        assert_eq!(
            capped.error_code.as_deref(),
            Some(codes::MAX_RETRIES_EXCEEDED)
        );
    }

    #[tokio::test]
    async fn retry_of_unknown_notification_reports_not_found() {
        let notifier = InMemoryNotifier::new();
        let outcome = notifier.retry("NOTIF-9999").await.unwrap();
        assert!(!outcome.success);
        assert_eq!(
            outcome.error_code.as_deref(),
            Some(codes::NOTIFICATION_NOT_FOUND)
        );
    }
}
