//! Mocked domain collaborators consumed by the saga core.
//!
//! Each collaborator is a narrow async trait plus an in-memory
//! implementation with seeded fixtures and failure injection. The saga
//! strategies treat them as black boxes: they await the result and
//! branch on its success flag. A returned `Err` models the service
//! itself blowing up rather than a business rejection.

pub mod codes;
pub mod error;
pub mod item;
pub mod log;
pub mod notification;
pub mod user;

pub use error::{DomainError, Result};
pub use item::{GrantRequest, InMemoryItemCatalog, ItemCatalog, ItemGrant, ItemInfo, StockDelta};
pub use log::{InMemoryPurchaseLog, LogRecord, LogRequest, LogStatistics, LogStatus, PurchaseLog, PurchaseLogEntry};
pub use notification::{
    InMemoryNotifier, NotificationKind, NotificationOutcome, NotificationRecord,
    NotificationRequest, NotificationStatistics, Notifier,
};
pub use user::{InMemoryUserDirectory, UserAccounts, UserProfile, UserStatus, UserValidation, ValidationRequest};
