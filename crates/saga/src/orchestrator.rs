//! Centralized coordination strategy.
//!
//! The orchestrator owns the step sequence: it calls the domain
//! collaborators directly, drives one [`SagaContext`] through the status
//! machine, invokes the compensation engine on failure, and publishes
//! lifecycle events for observability. Step failures never escape as
//! errors; the caller always gets a structured [`PurchaseResult`].

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::json;

use common::TransactionId;
use domain::{
    codes, GrantRequest, ItemCatalog, LogRequest, LogStatus, NotificationKind,
    NotificationRequest, Notifier, PurchaseLog, UserAccounts, ValidationRequest,
};
use event_bus::{EventBus, EventFactory};

use crate::compensation::CompensationEngine;
use crate::context::SagaContext;
use crate::error::{Result, SagaError};
use crate::events::PurchaseEvent;
use crate::repository::SagaRepository;
use crate::state::{SagaStatus, SagaStep};
use crate::types::{FieldChange, PurchaseData, SagaErrorInfo, SagaState, SagaStepResult};

/// What the caller gets back from a purchase attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseResult {
    pub success: bool,
    pub transaction_id: TransactionId,
    pub status: SagaStatus,
    /// Steps that completed successfully, in execution order.
    pub executed_steps: Vec<SagaStep>,
    /// The first recorded failure, absent on success.
    pub error: Option<SagaErrorInfo>,
}

impl PurchaseResult {
    fn from_context(ctx: &SagaContext) -> Self {
        Self {
            success: ctx.status() == SagaStatus::Completed,
            transaction_id: ctx.transaction_id(),
            status: ctx.status(),
            executed_steps: ctx.executed_steps(),
            error: ctx.state().error.clone(),
        }
    }

    fn from_state(state: &SagaState) -> Self {
        Self::from_context(&SagaContext::from_state(state.clone()))
    }
}

/// Drives purchase sagas step by step from a single call stack.
pub struct PurchaseOrchestrator {
    users: Arc<dyn UserAccounts>,
    items: Arc<dyn ItemCatalog>,
    log: Arc<dyn PurchaseLog>,
    notifier: Arc<dyn Notifier>,
    repository: Arc<dyn SagaRepository>,
    bus: Arc<EventBus<PurchaseEvent>>,
    engine: CompensationEngine,
    factory: EventFactory,
}

impl PurchaseOrchestrator {
    /// Creates an orchestrator over the given collaborators.
    ///
    /// The bus is a monitoring path: every publish waits for all
    /// subscribers and propagates their failures, so it should carry
    /// the fail-fast dispatch policy.
    pub fn new(
        users: Arc<dyn UserAccounts>,
        items: Arc<dyn ItemCatalog>,
        log: Arc<dyn PurchaseLog>,
        notifier: Arc<dyn Notifier>,
        repository: Arc<dyn SagaRepository>,
        bus: Arc<EventBus<PurchaseEvent>>,
    ) -> Self {
        let engine = CompensationEngine::new(
            users.clone(),
            items.clone(),
            log.clone(),
            repository.clone(),
            bus.clone(),
        );
        Self {
            users,
            items,
            log,
            notifier,
            repository,
            bus,
            engine,
            factory: EventFactory::new(),
        }
    }

    /// Executes a purchase saga under a fresh transaction ID.
    pub async fn execute_purchase(&self, request: PurchaseData) -> Result<PurchaseResult> {
        self.execute_purchase_with_transaction_id(self.factory.transaction_id(), request)
            .await
    }

    /// Executes a purchase saga under a caller-supplied transaction ID.
    ///
    /// If a saga already exists for the ID, its current state is
    /// returned untouched; terminal sagas are never re-driven.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id, item_id = %request.item_id))]
    pub async fn execute_purchase_with_transaction_id(
        &self,
        transaction_id: TransactionId,
        request: PurchaseData,
    ) -> Result<PurchaseResult> {
        if let Some(existing) = self.repository.find_by_id(transaction_id).await {
            tracing::warn!(%transaction_id, status = %existing.status, "saga already exists, not re-driving");
            return Ok(PurchaseResult::from_state(&existing));
        }

        metrics::counter!("saga_executions_total").increment(1);
        let saga_start = Instant::now();

        let mut ctx = SagaContext::new(transaction_id, request.clone());
        self.repository.save(ctx.state().clone()).await;
        self.bus
            .publish(self.factory.envelope(
                transaction_id,
                PurchaseEvent::purchase_initiated(request.clone()),
            ))
            .await?;

        ctx.begin()?;
        self.repository.save(ctx.state().clone()).await;

        // Step 1: user validation. Failure here short-circuits with
        // nothing to compensate.
        ctx.set_current_step(SagaStep::UserValidation);
        tracing::info!(step = %SagaStep::UserValidation, "saga step started");
        let step_start = Instant::now();
        let Some(total_amount) = request.total_amount() else {
            let reason = "purchase amount exceeds the accounting range";
            ctx.add_step_result(SagaStepResult::failed(
                SagaStep::UserValidation,
                codes::AMOUNT_OVERFLOW,
                reason,
                step_start.elapsed().as_millis() as u64,
            ));
            self.repository.save(ctx.state().clone()).await;
            self.bus
                .publish(self.factory.envelope(
                    transaction_id,
                    PurchaseEvent::user_validation_failed(codes::AMOUNT_OVERFLOW, reason),
                ))
                .await?;
            return self.finish_failed(ctx, saga_start).await;
        };
        match self
            .users
            .validate_and_reserve(ValidationRequest {
                user_id: request.user_id.clone(),
                transaction_id,
                required_amount: total_amount,
            })
            .await
        {
            Ok(validation) if validation.is_valid => {
                let balance_after = validation.current_balance;
                let balance_before = balance_after + total_amount;
                ctx.add_step_result(
                    SagaStepResult::succeeded(
                        SagaStep::UserValidation,
                        step_start.elapsed().as_millis() as u64,
                    )
                    .with_snapshot(vec![FieldChange::new(
                        "balance",
                        balance_before,
                        balance_after,
                    )]),
                );
                self.repository.save(ctx.state().clone()).await;
                self.bus
                    .publish(self.factory.envelope(
                        transaction_id,
                        PurchaseEvent::user_validated(
                            request.user_id.as_str(),
                            balance_after,
                            total_amount,
                        ),
                    ))
                    .await?;
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
                self.repository.save(ctx.state().clone()).await;
                self.bus
                    .publish(self.factory.envelope(
                        transaction_id,
                        PurchaseEvent::user_validation_failed(code, reason),
                    ))
                    .await?;
                return self.finish_failed(ctx, saga_start).await;
            }
            Err(e) => {
                ctx.add_step_result(SagaStepResult::failed(
                    SagaStep::UserValidation,
                    codes::INTERNAL_ERROR,
                    e.to_string(),
                    step_start.elapsed().as_millis() as u64,
                ));
                self.repository.save(ctx.state().clone()).await;
                self.bus
                    .publish(self.factory.envelope(
                        transaction_id,
                        PurchaseEvent::user_validation_failed(codes::INTERNAL_ERROR, e.to_string()),
                    ))
                    .await?;
                return self.finish_failed(ctx, saga_start).await;
            }
        }

        // Step 2: item grant.
        ctx.set_current_step(SagaStep::ItemGrant);
        tracing::info!(step = %SagaStep::ItemGrant, "saga step started");
        let step_start = Instant::now();
        match self
            .items
            .grant_item(GrantRequest {
                user_id: request.user_id.clone(),
                item_id: request.item_id.clone(),
                quantity: request.quantity,
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
                self.repository.save(ctx.state().clone()).await;
                self.bus
                    .publish(self.factory.envelope(
                        transaction_id,
                        PurchaseEvent::item_granted(
                            request.user_id.as_str(),
                            request.item_id.as_str(),
                            request.quantity,
                            grant.stock.after,
                        ),
                    ))
                    .await?;
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
                self.repository.save(ctx.state().clone()).await;
                self.bus
                    .publish(self.factory.envelope(
                        transaction_id,
                        PurchaseEvent::item_grant_failed(code, reason),
                    ))
                    .await?;
                return self.finish_failed(ctx, saga_start).await;
            }
            Err(e) => {
                ctx.add_step_result(SagaStepResult::failed(
                    SagaStep::ItemGrant,
                    codes::INTERNAL_ERROR,
                    e.to_string(),
                    step_start.elapsed().as_millis() as u64,
                ));
                self.repository.save(ctx.state().clone()).await;
                self.bus
                    .publish(self.factory.envelope(
                        transaction_id,
                        PurchaseEvent::item_grant_failed(codes::INTERNAL_ERROR, e.to_string()),
                    ))
                    .await?;
                return self.finish_failed(ctx, saga_start).await;
            }
        }

        // Step 3: audit log record.
        ctx.set_current_step(SagaStep::LogRecord);
        tracing::info!(step = %SagaStep::LogRecord, "saga step started");
        let step_start = Instant::now();
        match self
            .log
            .record(LogRequest {
                transaction_id,
                user_id: request.user_id.clone(),
                item_id: request.item_id.clone(),
                quantity: request.quantity,
                price: request.price,
                status: LogStatus::Success,
                step: SagaStep::LogRecord.as_str().to_string(),
                metadata: json!({ "total_amount": total_amount }),
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
                self.repository.save(ctx.state().clone()).await;
                self.bus
                    .publish(
                        self.factory
                            .envelope(transaction_id, PurchaseEvent::log_recorded(log_id)),
                    )
                    .await?;
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
                self.repository.save(ctx.state().clone()).await;
                self.bus
                    .publish(
                        self.factory
                            .envelope(transaction_id, PurchaseEvent::log_failed(code, reason)),
                    )
                    .await?;
                return self.finish_failed(ctx, saga_start).await;
            }
            Err(e) => {
                ctx.add_step_result(SagaStepResult::failed(
                    SagaStep::LogRecord,
                    codes::INTERNAL_ERROR,
                    e.to_string(),
                    step_start.elapsed().as_millis() as u64,
                ));
                self.repository.save(ctx.state().clone()).await;
                self.bus
                    .publish(self.factory.envelope(
                        transaction_id,
                        PurchaseEvent::log_failed(codes::INTERNAL_ERROR, e.to_string()),
                    ))
                    .await?;
                return self.finish_failed(ctx, saga_start).await;
            }
        }

        // Step 4: notification. Advisory only: a failure is recorded in
        // the step log but the saga still completes.
        ctx.set_current_step(SagaStep::Notification);
        tracing::info!(step = %SagaStep::Notification, "saga step started");
        let step_start = Instant::now();
        match self
            .notifier
            .send(NotificationRequest {
                user_id: request.user_id.clone(),
                transaction_id,
                kind: NotificationKind::PurchaseSuccess,
                message: format!(
                    "Your purchase of {} x{} is complete",
                    request.item_id, request.quantity
                ),
                metadata: json!({ "total_amount": total_amount }),
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
                self.bus
                    .publish(self.factory.envelope(
                        transaction_id,
                        PurchaseEvent::notification_sent(notification_id),
                    ))
                    .await?;
            }
            Ok(outcome) => {
                let code = outcome
                    .error_code
                    .unwrap_or_else(|| codes::DELIVERY_FAILED.to_string());
                let reason = outcome
                    .reason
                    .unwrap_or_else(|| "delivery failed".to_string());
                tracing::warn!(%transaction_id, reason, "notification failed, continuing");
                let mut result = SagaStepResult::failed(
                    SagaStep::Notification,
                    code.clone(),
                    reason.clone(),
                    step_start.elapsed().as_millis() as u64,
                );
                result.notification_id = outcome.notification_id;
                ctx.add_advisory_step(result);
                self.bus
                    .publish(self.factory.envelope(
                        transaction_id,
                        PurchaseEvent::notification_failed(code, reason),
                    ))
                    .await?;
            }
            Err(e) => {
                tracing::warn!(%transaction_id, error = %e, "notifier unavailable, continuing");
                ctx.add_advisory_step(SagaStepResult::failed(
                    SagaStep::Notification,
                    codes::INTERNAL_ERROR,
                    e.to_string(),
                    step_start.elapsed().as_millis() as u64,
                ));
                self.bus
                    .publish(self.factory.envelope(
                        transaction_id,
                        PurchaseEvent::notification_failed(codes::INTERNAL_ERROR, e.to_string()),
                    ))
                    .await?;
            }
        }

        ctx.mark_completed()?;
        self.repository.save(ctx.state().clone()).await;
        self.bus
            .publish(self.factory.envelope(
                transaction_id,
                PurchaseEvent::purchase_completed(ctx.executed_steps()),
            ))
            .await?;

        let duration = saga_start.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);
        metrics::counter!("saga_completed").increment(1);
        tracing::info!(%transaction_id, duration, "purchase saga completed");

        Ok(PurchaseResult::from_context(&ctx))
    }

    /// Returns the saga for a transaction, if one exists.
    pub async fn get_saga_state(&self, transaction_id: TransactionId) -> Option<SagaState> {
        self.repository.find_by_id(transaction_id).await
    }

    /// Manually compensates a failed saga.
    ///
    /// Returns false if the saga is not in a compensatable state.
    /// A failed undo propagates as [`SagaError::CompensationFailed`].
    pub async fn compensate_saga(&self, transaction_id: TransactionId) -> Result<bool> {
        let state = self
            .repository
            .find_by_id(transaction_id)
            .await
            .ok_or(SagaError::NotFound(transaction_id))?;
        let mut ctx = SagaContext::from_state(state);

        if !ctx.should_compensate() {
            tracing::debug!(%transaction_id, status = %ctx.status(), "nothing to compensate");
            return Ok(false);
        }

        self.engine.compensate(&mut ctx).await?;
        Ok(true)
    }

    /// Common exit for a failed saga: compensate if anything succeeded,
    /// then publish the terminal `PurchaseFailed` event.
    async fn finish_failed(
        &self,
        mut ctx: SagaContext,
        saga_start: Instant,
    ) -> Result<PurchaseResult> {
        let transaction_id = ctx.transaction_id();

        if ctx.should_compensate() {
            match self.engine.compensate(&mut ctx).await {
                Ok(()) => {}
                Err(SagaError::CompensationFailed { step, reason }) => {
                    // The saga stays inconsistent; surface it loudly but
                    // still hand the caller a structured result.
                    tracing::error!(
                        %transaction_id,
                        step = %step,
                        reason,
                        "purchase failed and compensation is incomplete"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let error = ctx.state().error.clone().unwrap_or(SagaErrorInfo {
            step: SagaStep::UserValidation,
            code: codes::INTERNAL_ERROR.to_string(),
            message: "unknown failure".to_string(),
        });
        self.bus
            .publish(self.factory.envelope(
                transaction_id,
                PurchaseEvent::purchase_failed(error.step, error.code, error.message),
            ))
            .await?;

        metrics::histogram!("saga_duration_seconds").record(saga_start.elapsed().as_secs_f64());
        metrics::counter!("saga_failed").increment(1);
        tracing::warn!(%transaction_id, status = %ctx.status(), "purchase saga failed");

        Ok(PurchaseResult::from_context(&ctx))
    }
}
