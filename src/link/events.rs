use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};

use super::StatusSnapshot;

/// Notifications raised by the link
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Socket to the bot established
    Connected,
    /// Socket to the bot lost or closed
    Disconnected,
    /// Connection failure or bot-reported error
    Error(String),
    /// Snapshot changed
    StatusUpdated(Box<StatusSnapshot>),
    /// Bot reported a catch
    FishCaught(Map<String, Value>),
    /// Bot pushed session data
    SessionData(Map<String, Value>),
    /// Bot switched on or off
    BotStateChanged(bool),
    /// Detection settings changed on the bot
    DetectionDataUpdated(Map<String, Value>),
    /// Automation settings changed on the bot
    AutomationStatusUpdated(Map<String, Value>),
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&LinkEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: Vec<(SubscriptionId, Handler)>,
}

/// Synchronous fan-out of [`LinkEvent`]s.
///
/// Handlers run on whichever thread emits the event, in subscription order.
/// The registry lock is not held while handlers run, so a handler may
/// subscribe or unsubscribe.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<RwLock<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&LinkEvent) + Send + Sync + 'static,
    {
        let mut registry = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry.handlers.push((id, Arc::new(handler)));
        id
    }

    /// Returns false if the id was not subscribed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = registry.handlers.len();
        registry.handlers.retain(|(sub, _)| *sub != id);
        registry.handlers.len() != before
    }

    pub fn emit(&self, event: LinkEvent) {
        let handlers: Vec<Handler> = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            handler(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_emit_reaches_all_subscribers_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            bus.subscribe(move |event| {
                if let LinkEvent::BotStateChanged(active) = event {
                    seen.lock().unwrap().push((tag, *active));
                }
            });
        }

        bus.emit(LinkEvent::BotStateChanged(true));
        assert_eq!(*seen.lock().unwrap(), vec![("first", true), ("second", true)]);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        let id = bus.subscribe(move |_| *counter.lock().unwrap() += 1);

        bus.emit(LinkEvent::Connected);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(LinkEvent::Disconnected);

        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_handler_may_subscribe_during_emit() {
        let bus = EventBus::new();
        let inner = bus.clone();
        bus.subscribe(move |_| {
            inner.subscribe(|_| {});
        });

        bus.emit(LinkEvent::Connected);
        assert_eq!(bus.subscriber_count(), 2);
    }
}
