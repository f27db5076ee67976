//! Saga pattern implementation for purchase coordination.
//!
//! This crate coordinates a four-step purchase transaction with
//! compensating actions on failure:
//! 1. Validate the user and place a balance hold
//! 2. Grant the item into the user's inventory
//! 3. Write the audit log record
//! 4. Send the notification (advisory; a failure here never fails the saga)
//!
//! If a step fails, previously completed steps are compensated in
//! reverse order. Two interchangeable strategies drive the sequence:
//! a central [`orchestrator::PurchaseOrchestrator`] and an event-driven
//! [`choreography`] chain. [`PurchaseSaga`] wires either one up.

pub mod choreography;
pub mod compensation;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod facade;
pub mod locks;
pub mod orchestrator;
pub mod repository;
pub mod state;
pub mod types;

pub use choreography::{InitiatedPurchase, PurchaseCoordinator};
pub use compensation::CompensationEngine;
pub use config::CoordinationMode;
pub use context::SagaContext;
pub use error::{Result, SagaError};
pub use events::PurchaseEvent;
pub use facade::PurchaseSaga;
pub use locks::TransactionLocks;
pub use orchestrator::{PurchaseOrchestrator, PurchaseResult};
pub use repository::{InMemorySagaRepository, SagaRepository, SagaStatistics, SagaUpdate};
pub use state::{SagaStatus, SagaStep};
pub use types::{PurchaseData, SagaState, SagaStepResult, StepStatus};
