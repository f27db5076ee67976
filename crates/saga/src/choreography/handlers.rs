//! The per-step event handlers and the compensation handler.
//!
//! Each step handler loads the saga by transaction ID, runs one domain
//! operation under the transaction's lock, persists the result, and
//! publishes its downstream event after releasing the lock (a handler
//! for the same transaction subscribes to that event, so publishing
//! while holding the lock would deadlock the chain).

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use common::TransactionId;
use domain::{
    codes, GrantRequest, ItemCatalog, LogRequest, LogStatus, NotificationKind,
    NotificationRequest, Notifier, PurchaseLog, UserAccounts, ValidationRequest,
};
use event_bus::{Envelope, EventBus, EventFactory, EventHandler, HandlerError};

use crate::compensation::CompensationEngine;
use crate::context::SagaContext;
use crate::error::SagaError;
use crate::events::PurchaseEvent;
use crate::locks::TransactionLocks;
use crate::repository::SagaRepository;
use crate::state::{SagaStatus, SagaStep};
use crate::types::{FieldChange, SagaStepResult};

async fn load_context(
    repository: &Arc<dyn SagaRepository>,
    transaction_id: TransactionId,
    handler: &'static str,
    event_type: &'static str,
) -> Result<SagaContext, HandlerError> {
    let state = repository
        .find_by_id(transaction_id)
        .await
        .ok_or_else(|| HandlerError::new(handler, event_type, "saga not found"))?;
    Ok(SagaContext::from_state(state))
}

/// Runs the user-validation step off `PurchaseInitiated`.
pub struct UserValidationHandler {
    users: Arc<dyn UserAccounts>,
    repository: Arc<dyn SagaRepository>,
    bus: Arc<EventBus<PurchaseEvent>>,
    locks: Arc<TransactionLocks>,
    factory: EventFactory,
}

impl UserValidationHandler {
    pub fn new(
        users: Arc<dyn UserAccounts>,
        repository: Arc<dyn SagaRepository>,
        bus: Arc<EventBus<PurchaseEvent>>,
        locks: Arc<TransactionLocks>,
    ) -> Self {
        Self {
            users,
            repository,
            bus,
            locks,
            factory: EventFactory::new(),
        }
    }
}

#[async_trait]
impl EventHandler<PurchaseEvent> for UserValidationHandler {
    fn name(&self) -> &'static str {
        "user_validation_handler"
    }

    async fn handle(&self, event: Envelope<PurchaseEvent>) -> Result<(), HandlerError> {
        let PurchaseEvent::PurchaseInitiated(_) = &event.payload else {
            return Ok(());
        };
        let transaction_id = event.transaction_id;

        let guard = self.locks.acquire(transaction_id).await;
        let mut ctx =
            load_context(&self.repository, transaction_id, self.name(), event.event_type()).await?;
        if ctx.is_terminal() {
            return Ok(());
        }
        if ctx.status() == SagaStatus::Pending {
            ctx.begin()
                .map_err(|e| HandlerError::new(self.name(), event.event_type(), e.to_string()))?;
        }
        ctx.set_current_step(SagaStep::UserValidation);
        let data = ctx.state().purchase_data.clone();

        tracing::info!(%transaction_id, step = %SagaStep::UserValidation, "saga step started");
        let step_start = Instant::now();
        let downstream = if let Some(total_amount) = data.total_amount() {
            match self
                .users
                .validate_and_reserve(ValidationRequest {
                    user_id: data.user_id.clone(),
                    transaction_id,
                    required_amount: total_amount,
                })
                .await
            {
                Ok(validation) if validation.is_valid => {
                    let balance_after = validation.current_balance;
                    ctx.add_step_result(
                        SagaStepResult::succeeded(
                            SagaStep::UserValidation,
                            step_start.elapsed().as_millis() as u64,
                        )
                        .with_snapshot(vec![FieldChange::new(
                            "balance",
                            balance_after + total_amount,
                            balance_after,
                        )]),
                    );
                    PurchaseEvent::user_validated(
                        data.user_id.as_str(),
                        balance_after,
                        total_amount,
                    )
                }
                Ok(validation) => {
                    let code = validation
                        .error_code
                        .unwrap_or_else(|| codes::INTERNAL_ERROR.to_string());
                    let reason = validation
                        .reason
                        .unwrap_or_else(|| "validation rejected".to_string());
                    ctx.add_step_result(SagaStepResult::failed(
                        SagaStep::UserValidation,
                        code.clone(),
                        reason.clone(),
                        step_start.elapsed().as_millis() as u64,
                    ));
                    PurchaseEvent::user_validation_failed(code, reason)
                }
                Err(e) => {
                    ctx.add_step_result(SagaStepResult::failed(
                        SagaStep::UserValidation,
                        codes::INTERNAL_ERROR,
                        e.to_string(),
                        step_start.elapsed().as_millis() as u64,
                    ));
                    PurchaseEvent::user_validation_failed(codes::INTERNAL_ERROR, e.to_string())
                }
            }
        } else {
            let reason = "purchase amount exceeds the accounting range";
            ctx.add_step_result(SagaStepResult::failed(
                SagaStep::UserValidation,
                codes::AMOUNT_OVERFLOW,
                reason,
                step_start.elapsed().as_millis() as u64,
            ));
            PurchaseEvent::user_validation_failed(codes::AMOUNT_OVERFLOW, reason)
        };

        self.repository.save(ctx.state().clone()).await;
        drop(guard);

        self.bus
            .publish(self.factory.envelope(transaction_id, downstream))
            .await
            .map_err(|e| HandlerError::new(self.name(), event.event_type(), e.to_string()))
    }
}

/// Runs the item-grant step off `UserValidated`.
pub struct ItemGrantHandler {
    items: Arc<dyn ItemCatalog>,
    repository: Arc<dyn SagaRepository>,
    bus: Arc<EventBus<PurchaseEvent>>,
    locks: Arc<TransactionLocks>,
    factory: EventFactory,
}

impl ItemGrantHandler {
    pub fn new(
        items: Arc<dyn ItemCatalog>,
        repository: Arc<dyn SagaRepository>,
        bus: Arc<EventBus<PurchaseEvent>>,
        locks: Arc<TransactionLocks>,
    ) -> Self {
        Self {
            items,
            repository,
            bus,
            locks,
            factory: EventFactory::new(),
        }
    }
}

#[async_trait]
impl EventHandler<PurchaseEvent> for ItemGrantHandler {
    fn name(&self) -> &'static str {
        "item_grant_handler"
    }

    async fn handle(&self, event: Envelope<PurchaseEvent>) -> Result<(), HandlerError> {
        let PurchaseEvent::UserValidated(_) = &event.payload else {
            return Ok(());
        };
        let transaction_id = event.transaction_id;

        let guard = self.locks.acquire(transaction_id).await;
        let mut ctx =
            load_context(&self.repository, transaction_id, self.name(), event.event_type()).await?;
        if ctx.is_terminal() {
            return Ok(());
        }
        ctx.set_current_step(SagaStep::ItemGrant);
        let data = ctx.state().purchase_data.clone();

        tracing::info!(%transaction_id, step = %SagaStep::ItemGrant, "saga step started");
        let step_start = Instant::now();
        let downstream = match self
            .items
            .grant_item(GrantRequest {
                user_id: data.user_id.clone(),
                item_id: data.item_id.clone(),
                quantity: data.quantity,
                transaction_id,
            })
            .await
        {
            Ok(grant) if grant.success => {
                ctx.add_step_result(
                    SagaStepResult::succeeded(
                        SagaStep::ItemGrant,
                        step_start.elapsed().as_millis() as u64,
                    )
                    .with_snapshot(vec![
                        FieldChange::new("stock", grant.stock.before, grant.stock.after),
                        FieldChange::new("owned", grant.owned.before, grant.owned.after),
                    ]),
                );
                PurchaseEvent::item_granted(
                    data.user_id.as_str(),
                    data.item_id.as_str(),
                    data.quantity,
                    grant.stock.after,
                )
            }
            Ok(grant) => {
                let code = grant
                    .error_code
                    .unwrap_or_else(|| codes::INTERNAL_ERROR.to_string());
                let reason = grant.reason.unwrap_or_else(|| "grant rejected".to_string());
                ctx.add_step_result(SagaStepResult::failed(
                    SagaStep::ItemGrant,
                    code.clone(),
                    reason.clone(),
                    step_start.elapsed().as_millis() as u64,
                ));
                PurchaseEvent::item_grant_failed(code, reason)
            }
            Err(e) => {
                ctx.add_step_result(SagaStepResult::failed(
                    SagaStep::ItemGrant,
                    codes::INTERNAL_ERROR,
                    e.to_string(),
                    step_start.elapsed().as_millis() as u64,
                ));
                PurchaseEvent::item_grant_failed(codes::INTERNAL_ERROR, e.to_string())
            }
        };

        self.repository.save(ctx.state().clone()).await;
        drop(guard);

        self.bus
            .publish(self.factory.envelope(transaction_id, downstream))
            .await
            .map_err(|e| HandlerError::new(self.name(), event.event_type(), e.to_string()))
    }
}

/// Runs the audit-log step off `ItemGranted`.
pub struct LogRecordHandler {
    log: Arc<dyn PurchaseLog>,
    repository: Arc<dyn SagaRepository>,
    bus: Arc<EventBus<PurchaseEvent>>,
    locks: Arc<TransactionLocks>,
    factory: EventFactory,
}

impl LogRecordHandler {
    pub fn new(
        log: Arc<dyn PurchaseLog>,
        repository: Arc<dyn SagaRepository>,
        bus: Arc<EventBus<PurchaseEvent>>,
        locks: Arc<TransactionLocks>,
    ) -> Self {
        Self {
            log,
            repository,
            bus,
            locks,
            factory: EventFactory::new(),
        }
    }
}

#[async_trait]
impl EventHandler<PurchaseEvent> for LogRecordHandler {
    fn name(&self) -> &'static str {
        "log_record_handler"
    }

    async fn handle(&self, event: Envelope<PurchaseEvent>) -> Result<(), HandlerError> {
        let PurchaseEvent::ItemGranted(_) = &event.payload else {
            return Ok(());
        };
        let transaction_id = event.transaction_id;

        let guard = self.locks.acquire(transaction_id).await;
        let mut ctx =
            load_context(&self.repository, transaction_id, self.name(), event.event_type()).await?;
        if ctx.is_terminal() {
            return Ok(());
        }
        ctx.set_current_step(SagaStep::LogRecord);
        let data = ctx.state().purchase_data.clone();

        tracing::info!(%transaction_id, step = %SagaStep::LogRecord, "saga step started");
        let step_start = Instant::now();
        let downstream = match self
            .log
            .record(LogRequest {
                transaction_id,
                user_id: data.user_id.clone(),
                item_id: data.item_id.clone(),
                quantity: data.quantity,
                price: data.price,
                status: LogStatus::Success,
                step: SagaStep::LogRecord.as_str().to_string(),
                metadata: json!({ "total_amount": data.total_amount() }),
            })
            .await
        {
            Ok(record) if record.success => {
                let log_id = record.log_id.unwrap_or_default();
                ctx.add_step_result(
                    SagaStepResult::succeeded(
                        SagaStep::LogRecord,
                        step_start.elapsed().as_millis() as u64,
                    )
                    .with_log_id(log_id.clone()),
                );
                PurchaseEvent::log_recorded(log_id)
            }
            Ok(record) => {
                let code = record
                    .error_code
                    .unwrap_or_else(|| codes::LOG_WRITE_FAILED.to_string());
                let reason = record
                    .reason
                    .unwrap_or_else(|| "log write rejected".to_string());
                ctx.add_step_result(SagaStepResult::failed(
                    SagaStep::LogRecord,
                    code.clone(),
                    reason.clone(),
                    step_start.elapsed().as_millis() as u64,
                ));
                PurchaseEvent::log_failed(code, reason)
            }
            Err(e) => {
                ctx.add_step_result(SagaStepResult::failed(
                    SagaStep::LogRecord,
                    codes::INTERNAL_ERROR,
                    e.to_string(),
                    step_start.elapsed().as_millis() as u64,
                ));
                PurchaseEvent::log_failed(codes::INTERNAL_ERROR, e.to_string())
            }
        };

        self.repository.save(ctx.state().clone()).await;
        drop(guard);

        self.bus
            .publish(self.factory.envelope(transaction_id, downstream))
            .await
            .map_err(|e| HandlerError::new(self.name(), event.event_type(), e.to_string()))
    }
}

/// Runs the notification step off `LogRecorded`, then unconditionally
/// completes the saga: a failed notification is advisory only.
pub struct NotificationHandler {
    notifier: Arc<dyn Notifier>,
    repository: Arc<dyn SagaRepository>,
    bus: Arc<EventBus<PurchaseEvent>>,
    locks: Arc<TransactionLocks>,
    factory: EventFactory,
}

impl NotificationHandler {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        repository: Arc<dyn SagaRepository>,
        bus: Arc<EventBus<PurchaseEvent>>,
        locks: Arc<TransactionLocks>,
    ) -> Self {
        Self {
            notifier,
            repository,
            bus,
            locks,
            factory: EventFactory::new(),
        }
    }
}

#[async_trait]
impl EventHandler<PurchaseEvent> for NotificationHandler {
    fn name(&self) -> &'static str {
        "notification_handler"
    }

    async fn handle(&self, event: Envelope<PurchaseEvent>) -> Result<(), HandlerError> {
        let PurchaseEvent::LogRecorded(_) = &event.payload else {
            return Ok(());
        };
        let transaction_id = event.transaction_id;

        let guard = self.locks.acquire(transaction_id).await;
        let mut ctx =
            load_context(&self.repository, transaction_id, self.name(), event.event_type()).await?;
        if ctx.is_terminal() {
            return Ok(());
        }
        ctx.set_current_step(SagaStep::Notification);
        let data = ctx.state().purchase_data.clone();

        tracing::info!(%transaction_id, step = %SagaStep::Notification, "saga step started");
        let step_start = Instant::now();
        let notification_event = match self
            .notifier
            .send(NotificationRequest {
                user_id: data.user_id.clone(),
                transaction_id,
                kind: NotificationKind::PurchaseSuccess,
                message: format!(
                    "Your purchase of {} x{} is complete",
                    data.item_id, data.quantity
                ),
                metadata: json!({ "total_amount": data.total_amount() }),
            })
            .await
        {
            Ok(outcome) if outcome.success => {
                let notification_id = outcome.notification_id.unwrap_or_default();
                ctx.add_advisory_step(
                    SagaStepResult::succeeded(
                        SagaStep::Notification,
                        step_start.elapsed().as_millis() as u64,
                    )
                    .with_notification_id(notification_id.clone()),
                );
                PurchaseEvent::notification_sent(notification_id)
            }
            Ok(outcome) => {
                let code = outcome
                    .error_code
                    .unwrap_or_else(|| codes::DELIVERY_FAILED.to_string());
                let reason = outcome
                    .reason
                    .unwrap_or_else(|| "delivery failed".to_string());
                tracing::warn!(%transaction_id, reason, "notification failed, completing anyway");
                let mut result = SagaStepResult::failed(
                    SagaStep::Notification,
                    code.clone(),
                    reason.clone(),
                    step_start.elapsed().as_millis() as u64,
                );
                result.notification_id = outcome.notification_id;
                ctx.add_advisory_step(result);
                PurchaseEvent::notification_failed(code, reason)
            }
            Err(e) => {
                tracing::warn!(%transaction_id, error = %e, "notifier unavailable, completing anyway");
                ctx.add_advisory_step(SagaStepResult::failed(
                    SagaStep::Notification,
                    codes::INTERNAL_ERROR,
                    e.to_string(),
                    step_start.elapsed().as_millis() as u64,
                ));
                PurchaseEvent::notification_failed(codes::INTERNAL_ERROR, e.to_string())
            }
        };

        ctx.mark_completed()
            .map_err(|e| HandlerError::new(self.name(), event.event_type(), e.to_string()))?;
        self.repository.save(ctx.state().clone()).await;
        let executed_steps = ctx.executed_steps();
        let duration = ctx.duration_ms() as f64 / 1000.0;
        drop(guard);

        metrics::histogram!("saga_duration_seconds").record(duration);
        metrics::counter!("saga_completed").increment(1);
        tracing::info!(%transaction_id, "purchase saga completed");

        self.bus
            .publish(self.factory.envelope(transaction_id, notification_event))
            .await
            .map_err(|e| HandlerError::new(self.name(), event.event_type(), e.to_string()))?;
        self.bus
            .publish(self.factory.envelope(
                transaction_id,
                PurchaseEvent::purchase_completed(executed_steps),
            ))
            .await
            .map_err(|e| HandlerError::new(self.name(), event.event_type(), e.to_string()))?;

        // The saga is terminal; no handler will touch it again, so the
        // lock entry can go.
        self.locks.release(transaction_id).await;
        Ok(())
    }
}

/// Unwinds completed steps off any of the three fatal failure events.
///
/// Re-derives whether compensation is needed from the persisted saga
/// rather than trusting the event, then publishes the terminal
/// `PurchaseFailed`.
pub struct CompensationHandler {
    engine: CompensationEngine,
    repository: Arc<dyn SagaRepository>,
    bus: Arc<EventBus<PurchaseEvent>>,
    locks: Arc<TransactionLocks>,
    factory: EventFactory,
}

impl CompensationHandler {
    pub fn new(
        engine: CompensationEngine,
        repository: Arc<dyn SagaRepository>,
        bus: Arc<EventBus<PurchaseEvent>>,
        locks: Arc<TransactionLocks>,
    ) -> Self {
        Self {
            engine,
            repository,
            bus,
            locks,
            factory: EventFactory::new(),
        }
    }
}

#[async_trait]
impl EventHandler<PurchaseEvent> for CompensationHandler {
    fn name(&self) -> &'static str {
        "compensation_handler"
    }

    async fn handle(&self, event: Envelope<PurchaseEvent>) -> Result<(), HandlerError> {
        let (PurchaseEvent::UserValidationFailed(_)
        | PurchaseEvent::ItemGrantFailed(_)
        | PurchaseEvent::LogFailed(_)) = &event.payload
        else {
            return Ok(());
        };
        let transaction_id = event.transaction_id;

        let guard = self.locks.acquire(transaction_id).await;
        let mut ctx =
            load_context(&self.repository, transaction_id, self.name(), event.event_type()).await?;
        // A duplicate failure event must not restart a finished unwind.
        if matches!(
            ctx.status(),
            SagaStatus::Completed | SagaStatus::Compensating | SagaStatus::Compensated
        ) {
            return Ok(());
        }

        if ctx.should_compensate() {
            match self.engine.compensate(&mut ctx).await {
                Ok(()) => {}
                Err(SagaError::CompensationFailed { step, reason }) => {
                    tracing::error!(
                        %transaction_id,
                        step = %step,
                        reason,
                        "compensation incomplete, manual follow-up required"
                    );
                }
                Err(e) => {
                    return Err(HandlerError::new(self.name(), event.event_type(), e.to_string()));
                }
            }
        } else {
            tracing::info!(%transaction_id, "first step failed, nothing to unwind");
        }

        let error = ctx.state().error.clone();
        let duration = ctx.duration_ms() as f64 / 1000.0;
        drop(guard);

        metrics::histogram!("saga_duration_seconds").record(duration);
        metrics::counter!("saga_failed").increment(1);
        tracing::warn!(%transaction_id, "purchase saga failed");

        let terminal = match error {
            Some(error) => PurchaseEvent::purchase_failed(error.step, error.code, error.message),
            None => PurchaseEvent::purchase_failed(
                SagaStep::UserValidation,
                codes::INTERNAL_ERROR,
                "unknown failure",
            ),
        };
        self.bus
            .publish(self.factory.envelope(transaction_id, terminal))
            .await
            .map_err(|e| HandlerError::new(self.name(), event.event_type(), e.to_string()))?;

        // Terminal status guards above keep a recreated lock harmless.
        self.locks.release(transaction_id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use domain::{
        InMemoryItemCatalog, InMemoryNotifier, InMemoryPurchaseLog, InMemoryUserDirectory,
    };
    use event_bus::DispatchPolicy;

    use super::*;
    use crate::repository::InMemorySagaRepository;
    use crate::types::PurchaseData;

    struct Setup {
        repository: Arc<InMemorySagaRepository>,
        bus: Arc<EventBus<PurchaseEvent>>,
        locks: Arc<TransactionLocks>,
        factory: EventFactory,
    }

    fn setup() -> Setup {
        Setup {
            repository: Arc::new(InMemorySagaRepository::new()),
            bus: Arc::new(EventBus::new(DispatchPolicy::BestEffort)),
            locks: Arc::new(TransactionLocks::new()),
            factory: EventFactory::new(),
        }
    }

    fn validation_handler(setup: &Setup) -> UserValidationHandler {
        UserValidationHandler::new(
            Arc::new(InMemoryUserDirectory::new()),
            setup.repository.clone(),
            setup.bus.clone(),
            setup.locks.clone(),
        )
    }

    fn sword_purchase() -> PurchaseData {
        PurchaseData {
            user_id: "user-123".to_string(),
            item_id: "item-sword".to_string(),
            quantity: 1,
            price: 100,
        }
    }

    #[tokio::test]
    async fn test_handlers_ignore_unrelated_events() {
        let setup = setup();
        let handler = validation_handler(&setup);

        let envelope = setup.factory.envelope(
            TransactionId::new(),
            PurchaseEvent::log_recorded("LOG-0001"),
        );
        handler.handle(envelope).await.unwrap();
        assert!(setup.repository.find_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_saga_is_a_handler_error() {
        let setup = setup();
        let handler = validation_handler(&setup);

        let envelope = setup.factory.envelope(
            TransactionId::new(),
            PurchaseEvent::purchase_initiated(sword_purchase()),
        );
        let err = handler.handle(envelope).await.unwrap_err();
        assert!(err.to_string().contains("saga not found"));
    }

    #[tokio::test]
    async fn test_terminal_saga_is_skipped() {
        let setup = setup();
        let users = Arc::new(InMemoryUserDirectory::new());
        let handler = UserValidationHandler::new(
            users.clone(),
            setup.repository.clone(),
            setup.bus.clone(),
            setup.locks.clone(),
        );

        let transaction_id = TransactionId::new();
        let mut ctx = SagaContext::new(transaction_id, sword_purchase());
        ctx.begin().unwrap();
        ctx.add_step_result(SagaStepResult::succeeded(SagaStep::UserValidation, 1));
        ctx.add_step_result(SagaStepResult::succeeded(SagaStep::ItemGrant, 1));
        ctx.add_step_result(SagaStepResult::succeeded(SagaStep::LogRecord, 1));
        ctx.mark_completed().unwrap();
        setup.repository.save(ctx.state().clone()).await;

        let envelope = setup.factory.envelope(
            transaction_id,
            PurchaseEvent::purchase_initiated(sword_purchase()),
        );
        handler.handle(envelope).await.unwrap();

        // No re-validation happened against a finished saga.
        let saga = setup.repository.find_by_id(transaction_id).await.unwrap();
        assert_eq!(saga.steps.len(), 3);
        assert_eq!(users.balance_of("user-123"), Some(1000));
    }

    #[tokio::test]
    async fn test_compensation_handler_skips_finished_unwind() {
        let setup = setup();
        let users = Arc::new(InMemoryUserDirectory::new());
        let items = Arc::new(InMemoryItemCatalog::new());
        let log: Arc<dyn PurchaseLog> = Arc::new(InMemoryPurchaseLog::new());
        let engine = CompensationEngine::new(
            users.clone(),
            items,
            log,
            setup.repository.clone(),
            setup.bus.clone(),
        );
        let handler = CompensationHandler::new(
            engine,
            setup.repository.clone(),
            setup.bus.clone(),
            setup.locks.clone(),
        );

        let transaction_id = TransactionId::new();
        let mut ctx = SagaContext::new(transaction_id, sword_purchase());
        ctx.begin().unwrap();
        ctx.add_step_result(SagaStepResult::succeeded(SagaStep::UserValidation, 1));
        ctx.add_step_result(SagaStepResult::failed(
            SagaStep::ItemGrant,
            "INSUFFICIENT_STOCK",
            "0 left",
            1,
        ));
        ctx.begin_compensation().unwrap();
        ctx.add_compensation(crate::types::CompensationAction::compensated(
            SagaStep::UserValidation,
        ));
        ctx.mark_compensated().unwrap();
        setup.repository.save(ctx.state().clone()).await;
        let balance_before = users.balance_of("user-123");

        let envelope = setup.factory.envelope(
            transaction_id,
            PurchaseEvent::item_grant_failed("INSUFFICIENT_STOCK", "0 left"),
        );
        handler.handle(envelope).await.unwrap();

        // A duplicate failure event does not refund a second time.
        let saga = setup.repository.find_by_id(transaction_id).await.unwrap();
        assert_eq!(saga.compensations.len(), 1);
        assert_eq!(users.balance_of("user-123"), balance_before);
    }

    #[tokio::test]
    async fn test_completed_saga_drops_its_lock_entry() {
        let setup = setup();
        let notifier = Arc::new(InMemoryNotifier::new());
        notifier.set_failure_rate(0.0);
        let handler = NotificationHandler::new(
            notifier,
            setup.repository.clone(),
            setup.bus.clone(),
            setup.locks.clone(),
        );

        let transaction_id = TransactionId::new();
        let mut ctx = SagaContext::new(transaction_id, sword_purchase());
        ctx.begin().unwrap();
        ctx.add_step_result(SagaStepResult::succeeded(SagaStep::UserValidation, 1));
        ctx.add_step_result(SagaStepResult::succeeded(SagaStep::ItemGrant, 1));
        ctx.add_step_result(SagaStepResult::succeeded(SagaStep::LogRecord, 1));
        setup.repository.save(ctx.state().clone()).await;

        let envelope = setup
            .factory
            .envelope(transaction_id, PurchaseEvent::log_recorded("LOG-0001"));
        handler.handle(envelope).await.unwrap();

        let saga = setup.repository.find_by_id(transaction_id).await.unwrap();
        assert_eq!(saga.status, SagaStatus::Completed);
        assert!(setup.locks.is_empty().await);
    }

    #[tokio::test]
    async fn test_compensated_saga_drops_its_lock_entry() {
        let setup = setup();
        let users = Arc::new(InMemoryUserDirectory::new());
        let items = Arc::new(InMemoryItemCatalog::new());
        let log: Arc<dyn PurchaseLog> = Arc::new(InMemoryPurchaseLog::new());
        let engine = CompensationEngine::new(
            users.clone(),
            items,
            log,
            setup.repository.clone(),
            setup.bus.clone(),
        );
        let handler = CompensationHandler::new(
            engine,
            setup.repository.clone(),
            setup.bus.clone(),
            setup.locks.clone(),
        );

        let transaction_id = TransactionId::new();
        let mut ctx = SagaContext::new(transaction_id, sword_purchase());
        ctx.begin().unwrap();
        ctx.add_step_result(SagaStepResult::succeeded(SagaStep::UserValidation, 1));
        ctx.add_step_result(SagaStepResult::failed(
            SagaStep::ItemGrant,
            "INSUFFICIENT_STOCK",
            "0 left",
            1,
        ));
        setup.repository.save(ctx.state().clone()).await;

        let envelope = setup.factory.envelope(
            transaction_id,
            PurchaseEvent::item_grant_failed("INSUFFICIENT_STOCK", "0 left"),
        );
        handler.handle(envelope).await.unwrap();

        let saga = setup.repository.find_by_id(transaction_id).await.unwrap();
        assert_eq!(saga.status, SagaStatus::Compensated);
        assert!(setup.locks.is_empty().await);
    }
}
