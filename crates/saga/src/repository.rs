//! Keyed store for saga state.
//!
//! The repository is deliberately dumb: it persists whatever it is
//! given and never enforces the status machine. That responsibility
//! belongs to [`crate::context::SagaContext`] and the driving strategy.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use common::TransactionId;

use crate::error::{Result, SagaError};
use crate::state::{SagaStatus, SagaStep};
use crate::types::{CompensationAction, SagaErrorInfo, SagaState, SagaStepResult};

/// A partial update applied by [`SagaRepository::update`].
///
/// Fields left as `None` are kept unchanged; the merge is shallow.
/// Clearing a field is done by saving the whole state instead.
#[derive(Debug, Clone, Default)]
pub struct SagaUpdate {
    pub status: Option<SagaStatus>,
    pub current_step: Option<SagaStep>,
    pub steps: Option<Vec<SagaStepResult>>,
    pub compensations: Option<Vec<CompensationAction>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error: Option<SagaErrorInfo>,
}

impl SagaUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: SagaStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_current_step(mut self, step: SagaStep) -> Self {
        self.current_step = Some(step);
        self
    }

    pub fn with_steps(mut self, steps: Vec<SagaStepResult>) -> Self {
        self.steps = Some(steps);
        self
    }

    pub fn with_error(mut self, error: SagaErrorInfo) -> Self {
        self.error = Some(error);
        self
    }
}

/// Counts of stored sagas per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaStatistics {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub compensating: usize,
    pub compensated: usize,
}

impl SagaStatistics {
    fn count(&mut self, status: SagaStatus) {
        self.total += 1;
        match status {
            SagaStatus::Pending => self.pending += 1,
            SagaStatus::InProgress => self.in_progress += 1,
            SagaStatus::Completed => self.completed += 1,
            SagaStatus::Failed => self.failed += 1,
            SagaStatus::Compensating => self.compensating += 1,
            SagaStatus::Compensated => self.compensated += 1,
        }
    }
}

/// Storage abstraction for saga state.
///
/// Every returned state is a defensive copy; callers mutate a local
/// [`crate::context::SagaContext`] and write back explicitly. The trait
/// makes no single-process-memory assumption even though the in-memory
/// implementation below does.
#[async_trait]
pub trait SagaRepository: Send + Sync {
    /// Inserts or replaces the saga keyed by its transaction ID.
    async fn save(&self, state: SagaState);

    /// Returns a copy of the saga, if it exists.
    async fn find_by_id(&self, id: TransactionId) -> Option<SagaState>;

    /// Shallow-merges the provided fields into an existing saga.
    ///
    /// Returns the merged state, or [`SagaError::NotFound`] if no saga
    /// exists for the ID.
    async fn update(&self, id: TransactionId, update: SagaUpdate) -> Result<SagaState>;

    /// Removes the saga; returns whether it existed.
    async fn delete(&self, id: TransactionId) -> bool;

    /// Returns copies of every stored saga.
    async fn find_all(&self) -> Vec<SagaState>;

    /// Returns one user's sagas, most recently started first.
    async fn find_by_user_id(&self, user_id: &str) -> Vec<SagaState>;

    /// Returns every saga in the given status.
    async fn find_by_status(&self, status: SagaStatus) -> Vec<SagaState>;

    /// Returns counts per status.
    async fn statistics(&self) -> SagaStatistics;

    /// Removes every stored saga.
    async fn clear(&self);
}

/// Volatile saga store backed by a map; contents reset with the process.
#[derive(Debug, Default)]
pub struct InMemorySagaRepository {
    sagas: RwLock<HashMap<TransactionId, SagaState>>,
}

impl InMemorySagaRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SagaRepository for InMemorySagaRepository {
    async fn save(&self, state: SagaState) {
        tracing::debug!(
            transaction_id = %state.transaction_id,
            status = %state.status,
            "saving saga"
        );
        self.sagas
            .write()
            .await
            .insert(state.transaction_id, state);
    }

    async fn find_by_id(&self, id: TransactionId) -> Option<SagaState> {
        self.sagas.read().await.get(&id).cloned()
    }

    async fn update(&self, id: TransactionId, update: SagaUpdate) -> Result<SagaState> {
        let mut sagas = self.sagas.write().await;
        let state = sagas.get_mut(&id).ok_or(SagaError::NotFound(id))?;

        if let Some(status) = update.status {
            state.status = status;
        }
        if let Some(step) = update.current_step {
            state.current_step = Some(step);
        }
        if let Some(steps) = update.steps {
            state.steps = steps;
        }
        if let Some(compensations) = update.compensations {
            state.compensations = compensations;
        }
        if let Some(completed_at) = update.completed_at {
            state.completed_at = Some(completed_at);
        }
        if let Some(failed_at) = update.failed_at {
            state.failed_at = Some(failed_at);
        }
        if let Some(error) = update.error {
            state.error = Some(error);
        }

        Ok(state.clone())
    }

    async fn delete(&self, id: TransactionId) -> bool {
        self.sagas.write().await.remove(&id).is_some()
    }

    async fn find_all(&self) -> Vec<SagaState> {
        self.sagas.read().await.values().cloned().collect()
    }

    async fn find_by_user_id(&self, user_id: &str) -> Vec<SagaState> {
        let mut sagas: Vec<SagaState> = self
            .sagas
            .read()
            .await
            .values()
            .filter(|s| s.purchase_data.user_id == user_id)
            .cloned()
            .collect();
        sagas.sort_by_key(|s| std::cmp::Reverse(s.started_at));
        sagas
    }

    async fn find_by_status(&self, status: SagaStatus) -> Vec<SagaState> {
        self.sagas
            .read()
            .await
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect()
    }

    async fn statistics(&self) -> SagaStatistics {
        let sagas = self.sagas.read().await;
        let mut stats = SagaStatistics::default();
        for state in sagas.values() {
            stats.count(state.status);
        }
        stats
    }

    async fn clear(&self) {
        self.sagas.write().await.clear();
        tracing::debug!("saga repository cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PurchaseData;

    fn saga(user_id: &str) -> SagaState {
        SagaState::new(
            TransactionId::new(),
            PurchaseData {
                user_id: user_id.to_string(),
                item_id: "item-sword".to_string(),
                quantity: 1,
                price: 100,
            },
        )
    }

    #[tokio::test]
    async fn test_save_and_find() {
        let repo = InMemorySagaRepository::new();
        let state = saga("user-123");
        let id = state.transaction_id;
        repo.save(state).await;

        let found = repo.find_by_id(id).await.unwrap();
        assert_eq!(found.transaction_id, id);
        assert_eq!(found.status, SagaStatus::Pending);
        assert!(repo.find_by_id(TransactionId::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_returned_state_is_a_defensive_copy() {
        let repo = InMemorySagaRepository::new();
        let state = saga("user-123");
        let id = state.transaction_id;
        repo.save(state).await;

        let mut copy = repo.find_by_id(id).await.unwrap();
        copy.status = SagaStatus::Completed;

        // The stored saga is untouched until an explicit write-back.
        assert_eq!(
            repo.find_by_id(id).await.unwrap().status,
            SagaStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_update_merges_provided_fields() {
        let repo = InMemorySagaRepository::new();
        let state = saga("user-123");
        let id = state.transaction_id;
        repo.save(state).await;

        let merged = repo
            .update(
                id,
                SagaUpdate::new()
                    .with_status(SagaStatus::InProgress)
                    .with_current_step(SagaStep::UserValidation),
            )
            .await
            .unwrap();

        assert_eq!(merged.status, SagaStatus::InProgress);
        assert_eq!(merged.current_step, Some(SagaStep::UserValidation));
        // Untouched fields survive the merge.
        assert_eq!(merged.purchase_data.user_id, "user-123");
    }

    #[tokio::test]
    async fn test_update_missing_saga_is_not_found() {
        let repo = InMemorySagaRepository::new();
        let result = repo
            .update(TransactionId::new(), SagaUpdate::new())
            .await;
        assert!(matches!(result, Err(SagaError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = InMemorySagaRepository::new();
        let state = saga("user-123");
        let id = state.transaction_id;
        repo.save(state).await;

        assert!(repo.delete(id).await);
        assert!(!repo.delete(id).await);
        assert!(repo.find_by_id(id).await.is_none());
    }

    #[tokio::test]
    async fn test_find_by_user_id_is_most_recent_first() {
        let repo = InMemorySagaRepository::new();
        let first = saga("user-123");
        let first_id = first.transaction_id;
        repo.save(first).await;

        let mut second = saga("user-123");
        second.started_at = second.started_at + chrono::Duration::seconds(1);
        let second_id = second.transaction_id;
        repo.save(second).await;
        repo.save(saga("user-456")).await;

        let sagas = repo.find_by_user_id("user-123").await;
        assert_eq!(sagas.len(), 2);
        assert_eq!(sagas[0].transaction_id, second_id);
        assert_eq!(sagas[1].transaction_id, first_id);
    }

    #[tokio::test]
    async fn test_find_by_status_and_statistics() {
        let repo = InMemorySagaRepository::new();
        repo.save(saga("user-123")).await;
        let mut completed = saga("user-123");
        completed.status = SagaStatus::Completed;
        repo.save(completed).await;

        assert_eq!(repo.find_by_status(SagaStatus::Pending).await.len(), 1);
        assert_eq!(repo.find_by_status(SagaStatus::Completed).await.len(), 1);
        assert_eq!(repo.find_by_status(SagaStatus::Failed).await.len(), 0);

        let stats = repo.statistics().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let repo = InMemorySagaRepository::new();
        repo.save(saga("user-123")).await;
        repo.clear().await;
        assert!(repo.find_all().await.is_empty());
    }
}
