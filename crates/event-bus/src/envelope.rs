use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::{EventId, TransactionId};

/// A payload that can travel on the bus.
///
/// Dispatch is keyed on `event_type`, so the string must be stable for
/// the lifetime of the vocabulary.
pub trait EventPayload: Clone + Send + Sync + 'static {
    /// Stable name of this event, used as the subscription key.
    fn event_type(&self) -> &'static str;
}

/// An immutable event: metadata plus a type-specific payload.
///
/// Envelopes are the only cross-component communication artifact and are
/// never mutated after creation. The aggregate ID is the transaction ID
/// of the saga the event belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<P> {
    /// Unique identifier of this event instance.
    pub event_id: EventId,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// The saga this event belongs to.
    pub transaction_id: TransactionId,
    /// Schema version of the payload.
    pub version: u32,
    /// The type-specific payload.
    pub payload: P,
}

impl<P: EventPayload> Envelope<P> {
    /// Returns the payload's stable event type name.
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Ping;

    impl EventPayload for Ping {
        fn event_type(&self) -> &'static str {
            "Ping"
        }
    }

    #[test]
    fn envelope_exposes_payload_type() {
        let envelope = Envelope {
            event_id: EventId::new(),
            timestamp: Utc::now(),
            transaction_id: TransactionId::new(),
            version: 1,
            payload: Ping,
        };
        assert_eq!(envelope.event_type(), "Ping");
    }

    #[test]
    fn envelope_serialization_roundtrip() {
        let envelope = Envelope {
            event_id: EventId::new(),
            timestamp: Utc::now(),
            transaction_id: TransactionId::new(),
            version: 1,
            payload: Ping,
        };

        let json = serde_json::to_string(&envelope).unwrap();
        let deserialized: Envelope<Ping> = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.event_id, envelope.event_id);
        assert_eq!(deserialized.transaction_id, envelope.transaction_id);
        assert_eq!(deserialized.payload, Ping);
    }
}
