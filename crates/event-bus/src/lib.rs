//! In-process publish/subscribe event bus.
//!
//! The bus dispatches immutable event envelopes to subscribed handlers
//! without knowing anything about their semantics. Fan-out to multiple
//! handlers for one event type is concurrent, with the join policy
//! ([`DispatchPolicy`]) fixed per bus instance and overridable per call
//! site via [`EventBus::publish_with`].

pub mod bus;
pub mod envelope;
pub mod error;
pub mod factory;

pub use bus::{DispatchPolicy, EventBus, EventHandler};
pub use common::{EventId, TransactionId};
pub use envelope::{Envelope, EventPayload};
pub use error::{BusError, HandlerError, Result};
pub use factory::EventFactory;
