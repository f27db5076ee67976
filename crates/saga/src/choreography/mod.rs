//! Decentralized coordination strategy.
//!
//! No central driver: each handler subscribes to exactly one upstream
//! event type, performs one step, and publishes one downstream event.
//! Handlers never call each other; coupling is entirely through event
//! types and repository reads.

pub mod coordinator;
pub mod handlers;

pub use coordinator::{InitiatedPurchase, PurchaseCoordinator};
pub use handlers::{
    CompensationHandler, ItemGrantHandler, LogRecordHandler, NotificationHandler,
    UserValidationHandler,
};
