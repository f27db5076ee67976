//! Stable error codes surfaced by the domain collaborators.

/// The user does not exist.
pub const USER_NOT_FOUND: &str = "USER_NOT_FOUND";

/// The user exists but is not in the `active` state.
pub const USER_NOT_ACTIVE: &str = "USER_NOT_ACTIVE";

/// The user's balance does not cover the purchase price.
pub const INSUFFICIENT_BALANCE: &str = "INSUFFICIENT_BALANCE";

/// The price exceeds the user's per-purchase limit.
pub const PURCHASE_LIMIT_EXCEEDED: &str = "PURCHASE_LIMIT_EXCEEDED";

/// The item does not exist in the catalog.
pub const ITEM_NOT_FOUND: &str = "ITEM_NOT_FOUND";

/// The item exists but has been disabled for sale.
pub const ITEM_NOT_AVAILABLE: &str = "ITEM_NOT_AVAILABLE";

/// The item's remaining stock does not cover the requested quantity.
pub const INSUFFICIENT_STOCK: &str = "INSUFFICIENT_STOCK";

/// The audit log subsystem rejected the write.
pub const LOG_WRITE_FAILED: &str = "LOG_WRITE_FAILED";

/// The notification channel failed to deliver.
pub const DELIVERY_FAILED: &str = "DELIVERY_FAILED";

/// No notification record exists for the given ID.
pub const NOTIFICATION_NOT_FOUND: &str = "NOTIFICATION_NOT_FOUND";

/// A notification retry was requested past the attempt cap.
pub const MAX_RETRIES_EXCEEDED: &str = "MAX_RETRIES_EXCEEDED";

/// A collaborator blew up instead of returning a business outcome.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
pub const AMOUNT_OVERFLOW: &str = "AMOUNT_OVERFLOW";
