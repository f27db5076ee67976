//! Entry point for choreographed purchases.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use common::TransactionId;
use event_bus::{EventBus, EventFactory};

use crate::context::SagaContext;
use crate::events::PurchaseEvent;
use crate::repository::SagaRepository;
use crate::state::SagaStatus;
use crate::types::{PurchaseData, SagaState};

/// Immediate acknowledgement of a choreographed purchase.
///
/// The chain runs asynchronously; callers poll
/// [`PurchaseCoordinator::get_transaction_status`] for the outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiatedPurchase {
    pub transaction_id: TransactionId,
    pub status: String,
}

/// Accepts purchase requests and kicks off the event chain.
///
/// The coordinator's only job is to persist the pending saga and
/// publish `PurchaseInitiated`; everything after that is handler work.
pub struct PurchaseCoordinator {
    repository: Arc<dyn SagaRepository>,
    bus: Arc<EventBus<PurchaseEvent>>,
    factory: EventFactory,
}

impl PurchaseCoordinator {
    pub fn new(repository: Arc<dyn SagaRepository>, bus: Arc<EventBus<PurchaseEvent>>) -> Self {
        Self {
            repository,
            bus,
            factory: EventFactory::new(),
        }
    }

    /// Creates the pending saga and publishes `PurchaseInitiated` on a
    /// detached task, returning before the chain runs.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id, item_id = %request.item_id))]
    pub async fn initiate_purchase(&self, request: PurchaseData) -> InitiatedPurchase {
        let transaction_id = self.factory.transaction_id();
        metrics::counter!("saga_executions_total").increment(1);

        let ctx = SagaContext::new(transaction_id, request.clone());
        self.repository.save(ctx.state().clone()).await;

        let bus = self.bus.clone();
        let envelope = self
            .factory
            .envelope(transaction_id, PurchaseEvent::purchase_initiated(request));
        tokio::spawn(async move {
            if let Err(e) = bus.publish(envelope).await {
                tracing::error!(%transaction_id, error = %e, "failed to start purchase chain");
            }
        });

        tracing::info!(%transaction_id, "purchase chain initiated");
        InitiatedPurchase {
            transaction_id,
            status: "initiated".to_string(),
        }
    }

    /// Returns the current status of a transaction, if it exists.
    pub async fn get_transaction_status(
        &self,
        transaction_id: TransactionId,
    ) -> Option<SagaStatus> {
        self.repository
            .find_by_id(transaction_id)
            .await
            .map(|s| s.status)
    }

    /// Returns the full saga for a transaction, if it exists.
    pub async fn get_saga_state(&self, transaction_id: TransactionId) -> Option<SagaState> {
        self.repository.find_by_id(transaction_id).await
    }
}
