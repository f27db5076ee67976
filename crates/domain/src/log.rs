//! Purchase audit log: append-style records with compensation marking.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use common::TransactionId;

use crate::codes;
use crate::error::{DomainError, Result};

/// Lifecycle status of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Failed,
    Compensated,
}

/// A stored audit record for one purchase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseLogEntry {
    pub log_id: String,
    pub transaction_id: TransactionId,
    pub user_id: String,
    pub item_id: String,
    pub quantity: u32,
    pub price: u32,
    pub status: LogStatus,
    pub step: String,
    pub created_at: DateTime<Utc>,
    pub metadata: Value,
}

/// Parameters for a record call.
#[derive(Debug, Clone)]
pub struct LogRequest {
    pub transaction_id: TransactionId,
    pub user_id: String,
    pub item_id: String,
    pub quantity: u32,
    pub price: u32,
    pub status: LogStatus,
    pub step: String,
    pub metadata: Value,
}

/// Outcome of a record call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub success: bool,
    pub log_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub error_code: Option<String>,
}

/// Counts of stored log entries per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStatistics {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub compensated: usize,
}

/// Records purchase audit entries.
#[async_trait]
pub trait PurchaseLog: Send + Sync {
    /// Writes one audit record and returns its ID.
    async fn record(&self, request: LogRequest) -> Result<LogRecord>;

    /// Compensating call: the entry is not deleted, its status moves to
    /// `compensated` and the metadata is merged.
    async fn mark_compensated(&self, log_id: &str, metadata: Value) -> Result<()>;

    /// Returns a stored entry by ID.
    async fn entry(&self, log_id: &str) -> Option<PurchaseLogEntry>;

    /// Returns all entries for one transaction, oldest first.
    async fn entries_for_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Vec<PurchaseLogEntry>;

    /// Returns all entries for one user, newest first.
    async fn entries_for_user(&self, user_id: &str) -> Vec<PurchaseLogEntry>;

    /// Returns counts per status.
    async fn statistics(&self) -> LogStatistics;
}

#[derive(Debug, Default)]
struct LogState {
    entries: HashMap<String, PurchaseLogEntry>,
    next_id: u32,
    failure_rate: f64,
    fail_on_record: bool,
    fail_on_mark: bool,
}

/// In-memory purchase log with a configurable simulated failure rate.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPurchaseLog {
    state: Arc<RwLock<LogState>>,
}

impl InMemoryPurchaseLog {
    /// Creates an empty log that never fails spontaneously.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the probability in `[0, 1]` that a record call fails.
    pub fn set_failure_rate(&self, rate: f64) {
        self.state.write().unwrap().failure_rate = rate.clamp(0.0, 1.0);
    }

    /// Forces record calls to be rejected deterministically.
    pub fn set_fail_on_record(&self, fail: bool) {
        self.state.write().unwrap().fail_on_record = fail;
    }

    /// Forces mark-compensated calls to fail, simulating a broken
    /// compensation.
    pub fn set_fail_on_mark(&self, fail: bool) {
        self.state.write().unwrap().fail_on_mark = fail;
    }

    /// Returns the number of stored entries.
    pub fn entry_count(&self) -> usize {
        self.state.read().unwrap().entries.len()
    }
}

#[async_trait]
impl PurchaseLog for InMemoryPurchaseLog {
    async fn record(&self, request: LogRequest) -> Result<LogRecord> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_record || rand::random::<f64>() < state.failure_rate {
            tracing::warn!(
                transaction_id = %request.transaction_id,
                "log write rejected (simulated outage)"
            );
            return Ok(LogRecord {
                success: false,
                log_id: None,
                recorded_at: Utc::now(),
                reason: Some("Failed to record log".to_string()),
                error_code: Some(codes::LOG_WRITE_FAILED.to_string()),
            });
        }

        state.next_id += 1;
        let log_id = format!("LOG-{:04}", state.next_id);
        let recorded_at = Utc::now();

        state.entries.insert(
            log_id.clone(),
            PurchaseLogEntry {
                log_id: log_id.clone(),
                transaction_id: request.transaction_id,
                user_id: request.user_id,
                item_id: request.item_id,
                quantity: request.quantity,
                price: request.price,
                status: request.status,
                step: request.step,
                created_at: recorded_at,
                metadata: request.metadata,
            },
        );

        tracing::debug!(log_id, transaction_id = %request.transaction_id, "log recorded");

        Ok(LogRecord {
            success: true,
            log_id: Some(log_id),
            recorded_at,
            reason: None,
            error_code: None,
        })
    }

    async fn mark_compensated(&self, log_id: &str, metadata: Value) -> Result<()> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_mark {
            return Err(DomainError::LogService(
                "log update channel unavailable".to_string(),
            ));
        }

        let Some(entry) = state.entries.get_mut(log_id) else {
            return Err(DomainError::CompensationTargetMissing(format!(
                "log {log_id}"
            )));
        };

        entry.status = LogStatus::Compensated;
        if let (Value::Object(existing), Value::Object(incoming)) = (&mut entry.metadata, metadata)
        {
            existing.extend(incoming);
        }

        tracing::debug!(log_id, "log marked compensated");
        Ok(())
    }

    async fn entry(&self, log_id: &str) -> Option<PurchaseLogEntry> {
        self.state.read().unwrap().entries.get(log_id).cloned()
    }

    async fn entries_for_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Vec<PurchaseLogEntry> {
        let mut entries: Vec<_> = self
            .state
            .read()
            .unwrap()
            .entries
            .values()
            .filter(|e| e.transaction_id == transaction_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        entries
    }

    async fn entries_for_user(&self, user_id: &str) -> Vec<PurchaseLogEntry> {
        let mut entries: Vec<_> = self
            .state
            .read()
            .unwrap()
            .entries
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| std::cmp::Reverse(e.created_at));
        entries
    }

    async fn statistics(&self) -> LogStatistics {
        let state = self.state.read().unwrap();
        let mut stats = LogStatistics {
            total: state.entries.len(),
            ..Default::default()
        };
        for entry in state.entries.values() {
            match entry.status {
                LogStatus::Success => stats.successful += 1,
                LogStatus::Failed => stats.failed += 1,
                LogStatus::Compensated => stats.compensated += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request(transaction_id: TransactionId) -> LogRequest {
        LogRequest {
            transaction_id,
            user_id: "user-123".to_string(),
            item_id: "item-sword".to_string(),
            quantity: 1,
            price: 100,
            status: LogStatus::Success,
            step: "purchase_completed".to_string(),
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn record_stores_an_entry() {
        let log = InMemoryPurchaseLog::new();
        let txn = TransactionId::new();
        let result = log.record(request(txn)).await.unwrap();

        assert!(result.success);
        let log_id = result.log_id.unwrap();
        assert!(log_id.starts_with("LOG-"));
        assert_eq!(log.entries_for_transaction(txn).await.len(), 1);
    }

    #[tokio::test]
    async fn forced_record_failure_is_a_business_rejection() {
        let log = InMemoryPurchaseLog::new();
        log.set_fail_on_record(true);

        let result = log.record(request(TransactionId::new())).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some(codes::LOG_WRITE_FAILED));
        assert_eq!(log.entry_count(), 0);
    }

    #[tokio::test]
    async fn mark_compensated_updates_status_and_metadata() {
        let log = InMemoryPurchaseLog::new();
        let result = log.record(request(TransactionId::new())).await.unwrap();
        let log_id = result.log_id.unwrap();

        log.mark_compensated(&log_id, json!({"reason": "transaction compensated"}))
            .await
            .unwrap();

        let entry = log.entry(&log_id).await.unwrap();
        assert_eq!(entry.status, LogStatus::Compensated);
        assert_eq!(entry.metadata["reason"], "transaction compensated");
    }

    #[tokio::test]
    async fn mark_compensated_on_missing_entry_fails() {
        let log = InMemoryPurchaseLog::new();
        let result = log.mark_compensated("LOG-9999", json!({})).await;
        assert!(matches!(
            result,
            Err(DomainError::CompensationTargetMissing(_))
        ));
    }

    #[tokio::test]
    async fn statistics_count_per_status() {
        let log = InMemoryPurchaseLog::new();
        let first = log.record(request(TransactionId::new())).await.unwrap();
        log.record(request(TransactionId::new())).await.unwrap();
        log.mark_compensated(&first.log_id.unwrap(), json!({}))
            .await
            .unwrap();

        let stats = log.statistics().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.compensated, 1);
    }
}
