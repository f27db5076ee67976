use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::RwLock;

use crate::envelope::{Envelope, EventPayload};
use crate::error::{BusError, HandlerError, Result};

/// An asynchronous subscriber for one or more event types.
#[async_trait]
pub trait EventHandler<P: EventPayload>: Send + Sync {
    /// Stable handler name, used for subscription identity and logging.
    fn name(&self) -> &'static str;

    /// Handles one event. Errors are reported to the publisher according
    /// to the dispatch policy in effect.
    async fn handle(&self, event: Envelope<P>) -> std::result::Result<(), HandlerError>;
}

/// Join policy applied when fanning out one publish to its handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchPolicy {
    /// Wait for all handlers; if any fails, the publish call fails.
    #[default]
    FailFast,
    /// Wait for all handlers; individual failures are logged and do not
    /// abort sibling handlers or the publish call.
    BestEffort,
}

/// In-process publish/subscribe dispatcher.
///
/// Subscriptions map an event-type string to a set of handlers, keyed by
/// handler name so that subscribing the same handler twice is a no-op.
/// The bus has no knowledge of saga semantics; it dispatches whatever
/// payload type it is instantiated with.
pub struct EventBus<P> {
    policy: DispatchPolicy,
    subscriptions: RwLock<HashMap<&'static str, Vec<Arc<dyn EventHandler<P>>>>>,
}

impl<P: EventPayload> EventBus<P> {
    /// Creates a bus with the given default dispatch policy.
    pub fn new(policy: DispatchPolicy) -> Self {
        Self {
            policy,
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the bus's default dispatch policy.
    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// Subscribes a handler to an event type.
    ///
    /// Subscribing a handler whose name is already registered for the
    /// same event type is a no-op.
    pub async fn subscribe(&self, event_type: &'static str, handler: Arc<dyn EventHandler<P>>) {
        let mut subs = self.subscriptions.write().await;
        let handlers = subs.entry(event_type).or_default();
        if handlers.iter().any(|h| h.name() == handler.name()) {
            tracing::debug!(event_type, handler = handler.name(), "already subscribed");
            return;
        }
        tracing::debug!(event_type, handler = handler.name(), "subscribed");
        handlers.push(handler);
    }

    /// Removes a handler (by name) from an event type's subscription set.
    pub async fn unsubscribe(&self, event_type: &str, handler_name: &str) {
        let mut subs = self.subscriptions.write().await;
        if let Some(handlers) = subs.get_mut(event_type) {
            handlers.retain(|h| h.name() != handler_name);
            if handlers.is_empty() {
                subs.remove(event_type);
            }
            tracing::debug!(event_type, handler = handler_name, "unsubscribed");
        }
    }

    /// Publishes an event using the bus's default dispatch policy.
    pub async fn publish(&self, event: Envelope<P>) -> Result<()> {
        self.publish_with(event, self.policy).await
    }

    /// Publishes an event with an explicit dispatch policy.
    ///
    /// All currently subscribed handlers for the event's type run
    /// concurrently. Publishing to a type with zero subscribers is not
    /// an error. One handler's failure never corrupts another's
    /// execution; whether it fails the publish depends on the policy.
    pub async fn publish_with(&self, event: Envelope<P>, policy: DispatchPolicy) -> Result<()> {
        let event_type = event.event_type();
        let handlers: Vec<Arc<dyn EventHandler<P>>> = {
            let subs = self.subscriptions.read().await;
            subs.get(event_type).cloned().unwrap_or_default()
        };

        if handlers.is_empty() {
            tracing::debug!(
                event_type,
                transaction_id = %event.transaction_id,
                "no subscribers for event, ignoring"
            );
            return Ok(());
        }

        tracing::debug!(
            event_type,
            event_id = %event.event_id,
            transaction_id = %event.transaction_id,
            handlers = handlers.len(),
            "publishing event"
        );

        let dispatches = handlers.iter().map(|handler| {
            let event = event.clone();
            async move { handler.handle(event).await }
        });

        let failures: Vec<HandlerError> = join_all(dispatches)
            .await
            .into_iter()
            .filter_map(|outcome| outcome.err())
            .collect();

        if failures.is_empty() {
            return Ok(());
        }

        match policy {
            DispatchPolicy::FailFast => {
                let mut failures = failures;
                if failures.len() == 1 {
                    Err(BusError::Handler(failures.remove(0)))
                } else {
                    Err(BusError::Handlers(failures))
                }
            }
            DispatchPolicy::BestEffort => {
                for failure in &failures {
                    tracing::error!(
                        event_type,
                        handler = failure.handler,
                        error = %failure.message,
                        "handler failed, continuing"
                    );
                }
                Ok(())
            }
        }
    }

    /// Returns the number of handlers subscribed to an event type.
    pub async fn subscriber_count(&self, event_type: &str) -> usize {
        let subs = self.subscriptions.read().await;
        subs.get(event_type).map(|h| h.len()).unwrap_or(0)
    }

    /// Returns every event type that currently has subscribers.
    pub async fn event_types(&self) -> Vec<&'static str> {
        let subs = self.subscriptions.read().await;
        subs.keys().copied().collect()
    }

    /// Removes all subscriptions.
    pub async fn clear(&self) {
        self.subscriptions.write().await.clear();
        tracing::debug!("event bus cleared all subscriptions");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use common::{EventId, TransactionId};
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum TestEvent {
        Started,
        Finished,
    }

    impl EventPayload for TestEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TestEvent::Started => "Started",
                TestEvent::Finished => "Finished",
            }
        }
    }

    fn envelope(payload: TestEvent) -> Envelope<TestEvent> {
        Envelope {
            event_id: EventId::new(),
            timestamp: Utc::now(),
            transaction_id: TransactionId::new(),
            version: 1,
            payload,
        }
    }

    struct CountingHandler {
        name: &'static str,
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingHandler {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                fail,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventHandler<TestEvent> for CountingHandler {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn handle(
            &self,
            event: Envelope<TestEvent>,
        ) -> std::result::Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(HandlerError::new(self.name, event.event_type(), "boom"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn publish_dispatches_to_subscribers() {
        let bus = EventBus::new(DispatchPolicy::FailFast);
        let handler = CountingHandler::new("counter", false);
        bus.subscribe("Started", handler.clone()).await;

        bus.publish(envelope(TestEvent::Started)).await.unwrap();
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let bus: EventBus<TestEvent> = EventBus::new(DispatchPolicy::FailFast);
        bus.publish(envelope(TestEvent::Finished)).await.unwrap();
    }

    #[tokio::test]
    async fn subscribe_is_idempotent_per_handler_name() {
        let bus = EventBus::new(DispatchPolicy::FailFast);
        let handler = CountingHandler::new("counter", false);
        bus.subscribe("Started", handler.clone()).await;
        bus.subscribe("Started", handler.clone()).await;

        assert_eq!(bus.subscriber_count("Started").await, 1);
        bus.publish(envelope(TestEvent::Started)).await.unwrap();
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_removes_handler() {
        let bus = EventBus::new(DispatchPolicy::FailFast);
        let handler = CountingHandler::new("counter", false);
        bus.subscribe("Started", handler.clone()).await;
        bus.unsubscribe("Started", "counter").await;

        assert_eq!(bus.subscriber_count("Started").await, 0);
        bus.publish(envelope(TestEvent::Started)).await.unwrap();
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn fail_fast_propagates_handler_failure() {
        let bus = EventBus::new(DispatchPolicy::FailFast);
        bus.subscribe("Started", CountingHandler::new("bad", true))
            .await;

        let result = bus.publish(envelope(TestEvent::Started)).await;
        assert!(matches!(result, Err(BusError::Handler(_))));
    }

    #[tokio::test]
    async fn fail_fast_still_runs_sibling_handlers() {
        let bus = EventBus::new(DispatchPolicy::FailFast);
        let good = CountingHandler::new("good", false);
        bus.subscribe("Started", CountingHandler::new("bad", true))
            .await;
        bus.subscribe("Started", good.clone()).await;

        let result = bus.publish(envelope(TestEvent::Started)).await;
        assert!(result.is_err());
        assert_eq!(good.calls(), 1);
    }

    #[tokio::test]
    async fn best_effort_absorbs_handler_failures() {
        let bus = EventBus::new(DispatchPolicy::BestEffort);
        let good = CountingHandler::new("good", false);
        bus.subscribe("Started", CountingHandler::new("bad", true))
            .await;
        bus.subscribe("Started", good.clone()).await;

        bus.publish(envelope(TestEvent::Started)).await.unwrap();
        assert_eq!(good.calls(), 1);
    }

    #[tokio::test]
    async fn publish_with_overrides_default_policy() {
        let bus = EventBus::new(DispatchPolicy::FailFast);
        bus.subscribe("Started", CountingHandler::new("bad", true))
            .await;

        bus.publish_with(envelope(TestEvent::Started), DispatchPolicy::BestEffort)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dispatch_is_keyed_by_event_type() {
        let bus = EventBus::new(DispatchPolicy::FailFast);
        let started = CountingHandler::new("started", false);
        let finished = CountingHandler::new("finished", false);
        bus.subscribe("Started", started.clone()).await;
        bus.subscribe("Finished", finished.clone()).await;

        bus.publish(envelope(TestEvent::Started)).await.unwrap();
        assert_eq!(started.calls(), 1);
        assert_eq!(finished.calls(), 0);
    }
}
