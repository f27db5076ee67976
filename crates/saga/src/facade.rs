//! Top-level wiring over both coordination strategies.
//!
//! [`PurchaseSaga`] owns the collaborators, the repository, and two
//! buses: a fail-fast monitoring bus the orchestrator publishes
//! lifecycle events on, and a best-effort chain bus the choreography
//! handlers react over. The chain handlers are registered only when the
//! facade is built in choreography mode.

use std::sync::Arc;

use domain::{
    InMemoryItemCatalog, InMemoryNotifier, InMemoryPurchaseLog, InMemoryUserDirectory,
    ItemCatalog, NotificationOutcome, Notifier, PurchaseLog, UserAccounts,
};
use event_bus::{DispatchPolicy, EventBus};

use common::TransactionId;

use crate::choreography::{
    CompensationHandler, InitiatedPurchase, ItemGrantHandler, LogRecordHandler,
    NotificationHandler, PurchaseCoordinator, UserValidationHandler,
};
use crate::compensation::CompensationEngine;
use crate::config::CoordinationMode;
use crate::error::{Result, SagaError};
use crate::events::PurchaseEvent;
use crate::locks::TransactionLocks;
use crate::orchestrator::{PurchaseOrchestrator, PurchaseResult};
use crate::repository::{InMemorySagaRepository, SagaRepository, SagaStatistics};
use crate::state::SagaStatus;
use crate::types::{PurchaseData, SagaState};

/// Wires collaborators, buses, and both strategies behind one API.
pub struct PurchaseSaga {
    mode: CoordinationMode,
    notifier: Arc<dyn Notifier>,
    repository: Arc<dyn SagaRepository>,
    monitor_bus: Arc<EventBus<PurchaseEvent>>,
    chain_bus: Arc<EventBus<PurchaseEvent>>,
    locks: Arc<TransactionLocks>,
    orchestrator: PurchaseOrchestrator,
    coordinator: PurchaseCoordinator,
}

impl PurchaseSaga {
    /// Builds a facade over fresh in-memory collaborators.
    pub async fn new(mode: CoordinationMode) -> Self {
        Self::with_collaborators(
            mode,
            Arc::new(InMemoryUserDirectory::new()),
            Arc::new(InMemoryItemCatalog::new()),
            Arc::new(InMemoryPurchaseLog::new()),
            Arc::new(InMemoryNotifier::new()),
        )
        .await
    }

    /// Builds a facade over caller-supplied collaborators.
    pub async fn with_collaborators(
        mode: CoordinationMode,
        users: Arc<dyn UserAccounts>,
        items: Arc<dyn ItemCatalog>,
        log: Arc<dyn PurchaseLog>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let repository: Arc<dyn SagaRepository> = Arc::new(InMemorySagaRepository::new());
        let monitor_bus = Arc::new(EventBus::new(DispatchPolicy::FailFast));
        let chain_bus = Arc::new(EventBus::new(DispatchPolicy::BestEffort));
        let locks = Arc::new(TransactionLocks::new());

        let orchestrator = PurchaseOrchestrator::new(
            users.clone(),
            items.clone(),
            log.clone(),
            notifier.clone(),
            repository.clone(),
            monitor_bus.clone(),
        );
        let coordinator = PurchaseCoordinator::new(repository.clone(), chain_bus.clone());

        let facade = Self {
            mode,
            notifier,
            repository,
            monitor_bus,
            chain_bus,
            locks,
            orchestrator,
            coordinator,
        };
        if mode == CoordinationMode::Choreography {
            facade
                .register_chain_handlers(users, items, log)
                .await;
        }
        tracing::info!(mode = %mode, "purchase saga ready");
        facade
    }

    async fn register_chain_handlers(
        &self,
        users: Arc<dyn UserAccounts>,
        items: Arc<dyn ItemCatalog>,
        log: Arc<dyn PurchaseLog>,
    ) {
        let bus = &self.chain_bus;
        bus.subscribe(
            "PurchaseInitiated",
            Arc::new(UserValidationHandler::new(
                users.clone(),
                self.repository.clone(),
                bus.clone(),
                self.locks.clone(),
            )),
        )
        .await;
        bus.subscribe(
            "UserValidated",
            Arc::new(ItemGrantHandler::new(
                items.clone(),
                self.repository.clone(),
                bus.clone(),
                self.locks.clone(),
            )),
        )
        .await;
        bus.subscribe(
            "ItemGranted",
            Arc::new(LogRecordHandler::new(
                log.clone(),
                self.repository.clone(),
                bus.clone(),
                self.locks.clone(),
            )),
        )
        .await;
        bus.subscribe(
            "LogRecorded",
            Arc::new(NotificationHandler::new(
                self.notifier.clone(),
                self.repository.clone(),
                bus.clone(),
                self.locks.clone(),
            )),
        )
        .await;

        let engine = CompensationEngine::new(
            users,
            items,
            log,
            self.repository.clone(),
            bus.clone(),
        );
        let compensation = Arc::new(CompensationHandler::new(
            engine,
            self.repository.clone(),
            bus.clone(),
            self.locks.clone(),
        ));
        for event_type in ["UserValidationFailed", "ItemGrantFailed", "LogFailed"] {
            bus.subscribe(event_type, compensation.clone()).await;
        }
    }

    /// The mode this facade was built in.
    pub fn mode(&self) -> CoordinationMode {
        self.mode
    }

    /// The fail-fast bus carrying the orchestrator's lifecycle events.
    /// Subscribe monitoring handlers here.
    pub fn monitor_bus(&self) -> Arc<EventBus<PurchaseEvent>> {
        self.monitor_bus.clone()
    }

    /// The best-effort bus the choreography chain runs over.
    pub fn chain_bus(&self) -> Arc<EventBus<PurchaseEvent>> {
        self.chain_bus.clone()
    }

    /// Runs a purchase saga to its terminal state and returns the
    /// outcome. Available in every mode.
    pub async fn start_orchestrated_purchase(
        &self,
        request: PurchaseData,
    ) -> Result<PurchaseResult> {
        self.orchestrator.execute_purchase(request).await
    }

    /// Kicks off a choreographed purchase and returns immediately; the
    /// chain runs on the bus. Requires choreography mode, since the
    /// chain handlers are not registered otherwise.
    pub async fn start_choreographed_purchase(
        &self,
        request: PurchaseData,
    ) -> Result<InitiatedPurchase> {
        if self.mode != CoordinationMode::Choreography {
            return Err(SagaError::ModeMismatch(self.mode));
        }
        Ok(self.coordinator.initiate_purchase(request).await)
    }

    /// Returns the saga for a transaction, if one exists.
    pub async fn get_saga_state(&self, transaction_id: TransactionId) -> Option<SagaState> {
        self.repository.find_by_id(transaction_id).await
    }

    /// Returns just the status of a transaction, if one exists.
    pub async fn get_transaction_status(
        &self,
        transaction_id: TransactionId,
    ) -> Option<SagaStatus> {
        self.coordinator.get_transaction_status(transaction_id).await
    }

    /// Manually compensates a failed saga, serialized against any
    /// in-flight chain handler for the same transaction.
    ///
    /// Returns false if the saga has nothing to compensate.
    pub async fn manually_compensate(&self, transaction_id: TransactionId) -> Result<bool> {
        let guard = self.locks.acquire(transaction_id).await;
        let compensated = self.orchestrator.compensate_saga(transaction_id).await?;
        drop(guard);
        if compensated {
            self.locks.release(transaction_id).await;
        }
        Ok(compensated)
    }

    /// A user's sagas, most recent first.
    pub async fn purchase_history(&self, user_id: &str) -> Vec<SagaState> {
        self.repository.find_by_user_id(user_id).await
    }

    /// Saga counts by status.
    pub async fn statistics(&self) -> SagaStatistics {
        self.repository.statistics().await
    }

    /// Retries a failed notification by ID. Capped per record; see
    /// [`domain::notification::MAX_RETRIES`].
    pub async fn retry_notification(
        &self,
        notification_id: &str,
    ) -> Result<NotificationOutcome> {
        Ok(self.notifier.retry(notification_id).await?)
    }

    /// Drops every stored saga. Test and dev convenience.
    pub async fn clear_all_transactions(&self) {
        self.repository.clear().await;
        self.locks.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_orchestration_mode_registers_no_chain_handlers() {
        let saga = PurchaseSaga::new(CoordinationMode::Orchestration).await;
        assert!(saga.chain_bus().event_types().await.is_empty());

        let result = saga
            .start_choreographed_purchase(PurchaseData {
                user_id: "user-123".to_string(),
                item_id: "item-sword".to_string(),
                quantity: 1,
                price: 100,
            })
            .await;
        assert!(matches!(result, Err(SagaError::ModeMismatch(_))));
    }

    #[tokio::test]
    async fn test_choreography_mode_wires_the_full_chain() {
        let saga = PurchaseSaga::new(CoordinationMode::Choreography).await;
        let bus = saga.chain_bus();

        for event_type in [
            "PurchaseInitiated",
            "UserValidated",
            "ItemGranted",
            "LogRecorded",
            "UserValidationFailed",
            "ItemGrantFailed",
            "LogFailed",
        ] {
            assert_eq!(bus.subscriber_count(event_type).await, 1, "{event_type}");
        }
    }

    #[tokio::test]
    async fn test_orchestrated_purchase_through_the_facade() {
        let saga = PurchaseSaga::new(CoordinationMode::Orchestration).await;
        let result = saga
            .start_orchestrated_purchase(PurchaseData {
                user_id: "user-123".to_string(),
                item_id: "item-potion".to_string(),
                quantity: 2,
                price: 20,
            })
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(
            saga.get_transaction_status(result.transaction_id).await,
            Some(SagaStatus::Completed)
        );
        assert_eq!(saga.purchase_history("user-123").await.len(), 1);
        assert_eq!(saga.statistics().await.completed, 1);

        saga.clear_all_transactions().await;
        assert_eq!(saga.statistics().await.total, 0);
    }
}
