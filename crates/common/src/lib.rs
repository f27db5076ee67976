//! Shared identifier newtypes used across the purchase saga workspace.

pub mod types;

pub use types::{EventId, TransactionId};
