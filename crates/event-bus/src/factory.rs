use chrono::{DateTime, Utc};

use common::{EventId, TransactionId};

use crate::envelope::{Envelope, EventPayload};

/// Payload schema version stamped on every envelope.
const PAYLOAD_VERSION: u32 = 1;

/// Generates event identifiers, transaction identifiers, timestamps, and
/// version numbers for envelopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventFactory;

impl EventFactory {
    /// Creates a new factory.
    pub fn new() -> Self {
        Self
    }

    /// Generates a fresh event ID.
    pub fn event_id(&self) -> EventId {
        EventId::new()
    }

    /// Generates a fresh transaction ID.
    pub fn transaction_id(&self) -> TransactionId {
        TransactionId::new()
    }

    /// Returns the current timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Returns the payload schema version for new events.
    pub fn version(&self) -> u32 {
        PAYLOAD_VERSION
    }

    /// Wraps a payload in a fully stamped envelope for the given saga.
    pub fn envelope<P: EventPayload>(
        &self,
        transaction_id: TransactionId,
        payload: P,
    ) -> Envelope<P> {
        Envelope {
            event_id: self.event_id(),
            timestamp: self.timestamp(),
            transaction_id,
            version: self.version(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Ping;

    impl EventPayload for Ping {
        fn event_type(&self) -> &'static str {
            "Ping"
        }
    }

    #[test]
    fn envelope_is_fully_stamped() {
        let factory = EventFactory::new();
        let txn = factory.transaction_id();
        let envelope = factory.envelope(txn, Ping);

        assert_eq!(envelope.transaction_id, txn);
        assert_eq!(envelope.version, 1);
        assert_eq!(envelope.event_type(), "Ping");
    }

    #[test]
    fn generated_ids_are_unique() {
        let factory = EventFactory::new();
        assert_ne!(factory.event_id(), factory.event_id());
        assert_ne!(factory.transaction_id(), factory.transaction_id());
    }
}
