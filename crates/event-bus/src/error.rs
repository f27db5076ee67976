use thiserror::Error;

/// A failure reported by a single event handler.
#[derive(Debug, Clone, Error)]
#[error("handler '{handler}' failed for event '{event_type}': {message}")]
pub struct HandlerError {
    /// Name of the handler that failed.
    pub handler: &'static str,
    /// Event type being handled.
    pub event_type: &'static str,
    /// Human-readable failure description.
    pub message: String,
}

impl HandlerError {
    /// Creates a handler error for the given handler and event type.
    pub fn new(
        handler: &'static str,
        event_type: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            handler,
            event_type,
            message: message.into(),
        }
    }
}

/// Errors that can occur when publishing on the bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// A handler failed under the fail-fast join policy.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// Multiple handlers failed under the fail-fast join policy.
    #[error("{} handlers failed, first: {}", .0.len(), .0[0])]
    Handlers(Vec<HandlerError>),
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
