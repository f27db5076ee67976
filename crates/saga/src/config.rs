//! Coordination-mode configuration loaded from environment variables.

/// Which strategy drives purchase sagas.
///
/// The mode is consumed only by the wiring layer ([`crate::PurchaseSaga`]),
/// which decides which handlers to register with the event bus; the core
/// components are mode-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordinationMode {
    /// A central orchestrator drives each step directly.
    #[default]
    Orchestration,

    /// Each step is a handler reacting to the previous step's event.
    Choreography,
}

impl CoordinationMode {
    /// Reads the mode from the `SAGA_MODE` environment variable
    /// (`"orchestration"` or `"choreography"`), falling back to
    /// orchestration.
    pub fn from_env() -> Self {
        match std::env::var("SAGA_MODE").as_deref() {
            Ok("choreography") => CoordinationMode::Choreography,
            _ => CoordinationMode::Orchestration,
        }
    }

    /// Returns the mode name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinationMode::Orchestration => "orchestration",
            CoordinationMode::Choreography => "choreography",
        }
    }
}

impl std::fmt::Display for CoordinationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
