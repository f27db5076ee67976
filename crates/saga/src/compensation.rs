//! The compensation engine, shared by both coordination strategies.
//!
//! Given a failed saga with at least one successful step, the engine
//! unwinds the completed steps in reverse chronological order: refund
//! the balance hold, reclaim the granted item, mark the audit record
//! compensated. Notification has no undo and is compensated trivially.

use std::sync::Arc;

use serde_json::json;

use domain::{ItemCatalog, PurchaseLog, UserAccounts};
use event_bus::{DispatchPolicy, EventBus, EventFactory};

use crate::context::SagaContext;
use crate::error::{Result, SagaError};
use crate::events::PurchaseEvent;
use crate::repository::SagaRepository;
use crate::state::SagaStep;
use crate::types::CompensationAction;

/// Unwinds completed steps of a failed saga.
pub struct CompensationEngine {
    users: Arc<dyn UserAccounts>,
    items: Arc<dyn ItemCatalog>,
    log: Arc<dyn PurchaseLog>,
    repository: Arc<dyn SagaRepository>,
    bus: Arc<EventBus<PurchaseEvent>>,
    factory: EventFactory,
}

impl CompensationEngine {
    /// Creates an engine over the given collaborators and bus.
    pub fn new(
        users: Arc<dyn UserAccounts>,
        items: Arc<dyn ItemCatalog>,
        log: Arc<dyn PurchaseLog>,
        repository: Arc<dyn SagaRepository>,
        bus: Arc<EventBus<PurchaseEvent>>,
    ) -> Self {
        Self {
            users,
            items,
            log,
            repository,
            bus,
            factory: EventFactory::new(),
        }
    }

    /// Runs the full unwind for a failed saga.
    ///
    /// Precondition: `ctx.should_compensate()` is true. On success the
    /// saga ends `compensated` with one [`CompensationAction`] per
    /// previously successful step, in reverse execution order. A failed
    /// undo is recorded, published as `CompensationFailed`, and returned
    /// as [`SagaError::CompensationFailed`]; the caller decides how to
    /// surface the inconsistency.
    #[tracing::instrument(skip(self, ctx), fields(transaction_id = %ctx.transaction_id()))]
    pub async fn compensate(&self, ctx: &mut SagaContext) -> Result<()> {
        let transaction_id = ctx.transaction_id();
        let from_step = ctx.failed_step().unwrap_or(SagaStep::UserValidation);

        metrics::counter!("saga_compensations_total").increment(1);
        ctx.begin_compensation()?;
        self.repository.save(ctx.state().clone()).await;
        self.bus
            .publish_with(
                self.factory
                    .envelope(transaction_id, PurchaseEvent::compensation_initiated(from_step)),
                DispatchPolicy::BestEffort,
            )
            .await?;

        let to_unwind: Vec<SagaStep> = ctx.executed_steps().into_iter().rev().collect();
        tracing::info!(steps = ?to_unwind, "unwinding completed steps");

        for step in &to_unwind {
            if let Err(reason) = self.undo_step(ctx, *step).await {
                ctx.add_compensation(CompensationAction::failed(*step, reason.clone()));
                self.repository.save(ctx.state().clone()).await;

                metrics::counter!("saga_compensation_failures_total").increment(1);
                tracing::error!(
                    %transaction_id,
                    step = %step,
                    reason,
                    "compensation failed, manual follow-up required"
                );
                self.bus
                    .publish_with(
                        self.factory.envelope(
                            transaction_id,
                            PurchaseEvent::compensation_failed(*step, reason.clone()),
                        ),
                        DispatchPolicy::BestEffort,
                    )
                    .await?;

                return Err(SagaError::CompensationFailed {
                    step: *step,
                    reason,
                });
            }

            ctx.add_compensation(CompensationAction::compensated(*step));
            self.repository.save(ctx.state().clone()).await;
            tracing::debug!(step = %step, "step compensated");
        }

        ctx.mark_compensated()?;
        self.repository.save(ctx.state().clone()).await;
        self.bus
            .publish_with(
                self.factory.envelope(
                    transaction_id,
                    PurchaseEvent::compensation_completed(to_unwind),
                ),
                DispatchPolicy::BestEffort,
            )
            .await?;

        tracing::info!(%transaction_id, "compensation completed");
        Ok(())
    }

    /// Runs one step's undo operation; `Err` carries the failure detail.
    async fn undo_step(
        &self,
        ctx: &SagaContext,
        step: SagaStep,
    ) -> std::result::Result<(), String> {
        let state = ctx.state();
        let data = &state.purchase_data;
        let transaction_id = state.transaction_id;

        match step {
            SagaStep::UserValidation => {
                // A saga whose amount overflows never passes validation,
                // so a successful step always has a computable refund.
                let amount = data
                    .total_amount()
                    .ok_or_else(|| "purchase amount exceeds the accounting range".to_string())?;
                self.users
                    .refund(&data.user_id, amount, transaction_id)
                    .await
                    .map_err(|e| e.to_string())
            }
            SagaStep::ItemGrant => self
                .items
                .reclaim_item(&data.user_id, &data.item_id, data.quantity, transaction_id)
                .await
                .map_err(|e| e.to_string()),
            SagaStep::LogRecord => {
                let log_id = state
                    .steps
                    .iter()
                    .rev()
                    .find_map(|r| (r.step == SagaStep::LogRecord).then(|| r.log_id.clone()))
                    .flatten()
                    .ok_or_else(|| "no log ID recorded for log_record step".to_string())?;
                self.log
                    .mark_compensated(
                        &log_id,
                        json!({ "transaction_id": transaction_id, "reason": "saga compensation" }),
                    )
                    .await
                    .map_err(|e| e.to_string())
            }
            // Notifications are never undone.
            SagaStep::Notification => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use common::TransactionId;
    use domain::{
        GrantRequest, InMemoryItemCatalog, InMemoryPurchaseLog, InMemoryUserDirectory, LogRequest,
        LogStatus, ValidationRequest,
    };
    use super::*;
    use crate::repository::InMemorySagaRepository;
    use crate::state::SagaStatus;
    use crate::types::{CompensationStatus, PurchaseData, SagaStepResult};

    struct Setup {
        users: Arc<InMemoryUserDirectory>,
        items: Arc<InMemoryItemCatalog>,
        log: Arc<InMemoryPurchaseLog>,
        repository: Arc<InMemorySagaRepository>,
        engine: CompensationEngine,
    }

    fn setup() -> Setup {
        let users = Arc::new(InMemoryUserDirectory::new());
        let items = Arc::new(InMemoryItemCatalog::new());
        let log = Arc::new(InMemoryPurchaseLog::new());
        let repository = Arc::new(InMemorySagaRepository::new());
        let bus = Arc::new(EventBus::new(DispatchPolicy::FailFast));

        let engine = CompensationEngine::new(
            users.clone(),
            items.clone(),
            log.clone(),
            repository.clone(),
            bus,
        );
        Setup {
            users,
            items,
            log,
            repository,
            engine,
        }
    }

    /// Runs the real domain calls for validation + grant, then records a
    /// failed log step, leaving the saga ready to compensate.
    async fn failed_after_two_steps(setup: &Setup) -> SagaContext {
        let transaction_id = TransactionId::new();
        let data = PurchaseData {
            user_id: "user-123".to_string(),
            item_id: "item-sword".to_string(),
            quantity: 1,
            price: 100,
        };

        setup
            .users
            .validate_and_reserve(ValidationRequest {
                user_id: data.user_id.clone(),
                transaction_id,
                required_amount: data.total_amount().unwrap(),
            })
            .await
            .unwrap();
        setup
            .items
            .grant_item(GrantRequest {
                user_id: data.user_id.clone(),
                item_id: data.item_id.clone(),
                quantity: data.quantity,
                transaction_id,
            })
            .await
            .unwrap();

        let mut ctx = SagaContext::new(transaction_id, data);
        ctx.begin().unwrap();
        ctx.add_step_result(SagaStepResult::succeeded(SagaStep::UserValidation, 1));
        ctx.add_step_result(SagaStepResult::succeeded(SagaStep::ItemGrant, 1));
        ctx.add_step_result(SagaStepResult::failed(
            SagaStep::LogRecord,
            "LOG_WRITE_FAILED",
            "outage",
            1,
        ));
        setup.repository.save(ctx.state().clone()).await;
        ctx
    }

    #[tokio::test]
    async fn test_unwind_is_reverse_order_and_restores_state() {
        let setup = setup();
        let mut ctx = failed_after_two_steps(&setup).await;
        assert_eq!(setup.users.balance_of("user-123"), Some(900));
        assert_eq!(setup.items.owned_quantity("user-123", "item-sword"), 1);

        setup.engine.compensate(&mut ctx).await.unwrap();

        assert_eq!(ctx.status(), SagaStatus::Compensated);
        let compensations = &ctx.state().compensations;
        assert_eq!(compensations.len(), 2);
        assert_eq!(compensations[0].step, SagaStep::ItemGrant);
        assert_eq!(compensations[1].step, SagaStep::UserValidation);
        assert!(
            compensations
                .iter()
                .all(|c| c.status == CompensationStatus::Compensated)
        );

        // The domain state is back where it started.
        assert_eq!(setup.users.balance_of("user-123"), Some(1000));
        assert_eq!(setup.items.owned_quantity("user-123", "item-sword"), 0);
        assert_eq!(setup.items.stock_of("item-sword"), Some(50));

        let stored = setup
            .repository
            .find_by_id(ctx.transaction_id())
            .await
            .unwrap();
        assert_eq!(stored.status, SagaStatus::Compensated);
    }

    #[tokio::test]
    async fn test_log_entry_is_marked_not_deleted() {
        let setup = setup();
        let transaction_id = TransactionId::new();
        let data = PurchaseData {
            user_id: "user-123".to_string(),
            item_id: "item-potion".to_string(),
            quantity: 1,
            price: 20,
        };

        let record = setup
            .log
            .record(LogRequest {
                transaction_id,
                user_id: data.user_id.clone(),
                item_id: data.item_id.clone(),
                quantity: 1,
                price: 20,
                status: LogStatus::Success,
                step: SagaStep::LogRecord.as_str().to_string(),
                metadata: json!({}),
            })
            .await
            .unwrap();
        let log_id = record.log_id.unwrap();

        let mut ctx = SagaContext::new(transaction_id, data);
        ctx.begin().unwrap();
        ctx.add_step_result(
            SagaStepResult::succeeded(SagaStep::LogRecord, 1).with_log_id(log_id.clone()),
        );
        ctx.add_step_result(SagaStepResult::failed(
            SagaStep::Notification,
            "DELIVERY_FAILED",
            "outage",
            1,
        ));
        setup.repository.save(ctx.state().clone()).await;

        setup.engine.compensate(&mut ctx).await.unwrap();

        let entry = setup.log.entry(&log_id).await.unwrap();
        assert_eq!(entry.status, LogStatus::Compensated);
    }

    #[tokio::test]
    async fn test_failed_undo_propagates_and_is_recorded() {
        let setup = setup();
        let mut ctx = failed_after_two_steps(&setup).await;
        setup.users.set_fail_on_refund(true);

        let result = setup.engine.compensate(&mut ctx).await;
        assert!(matches!(
            result,
            Err(SagaError::CompensationFailed {
                step: SagaStep::UserValidation,
                ..
            })
        ));

        // Item grant was unwound before the refund blew up.
        let compensations = &ctx.state().compensations;
        assert_eq!(compensations[0].step, SagaStep::ItemGrant);
        assert_eq!(compensations[0].status, CompensationStatus::Compensated);
        assert_eq!(compensations[1].step, SagaStep::UserValidation);
        assert_eq!(compensations[1].status, CompensationStatus::Failed);
        assert_eq!(ctx.status(), SagaStatus::Compensating);
    }

    #[tokio::test]
    async fn test_compensation_requires_failed_status() {
        let setup = setup();
        let mut ctx = SagaContext::new(
            TransactionId::new(),
            PurchaseData {
                user_id: "user-123".to_string(),
                item_id: "item-sword".to_string(),
                quantity: 1,
                price: 100,
            },
        );

        let result = setup.engine.compensate(&mut ctx).await;
        assert!(matches!(
            result,
            Err(SagaError::InvalidTransition { .. })
        ));
    }
}
