use thiserror::Error;

/// Errors representing a domain collaborator itself failing, as opposed
/// to a business rejection (which travels in the result's success flag).
#[derive(Debug, Error)]
pub enum DomainError {
    /// User account service error.
    #[error("user account service error: {0}")]
    UserService(String),

    /// Item catalog service error.
    #[error("item catalog service error: {0}")]
    ItemService(String),

    /// Purchase log service error.
    #[error("purchase log service error: {0}")]
    LogService(String),

    /// Notification service error.
    #[error("notification service error: {0}")]
    NotificationService(String),

    /// A compensating call could not find its target.
    #[error("compensation target not found: {0}")]
    CompensationTargetMissing(String),
}

/// Result type for domain collaborator operations.
pub type Result<T> = std::result::Result<T, DomainError>;
