// Single live subscription to the progress topic.
//
// The manager keeps the registration (listener id + cancellation token); the run loop
// owns the `Subscription` that actually receives and dispatches payloads. Releasing the
// registration cancels the token first, so a `Subscription` still held by the run loop
// stops dispatching immediately, queued payloads included.

use crate::events::{EventBus, Listener, ListenerId};
use crate::progress::{self, ProgressEvent};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub type Handler = Box<dyn FnMut(ProgressEvent) + Send>;

#[derive(Debug)]
struct Registration {
    listener_id: ListenerId,
    cancel: CancellationToken,
}

#[derive(Debug)]
pub struct SubscriptionManager {
    bus: EventBus,
    topic: String,
    active: Option<Registration>,
}

impl SubscriptionManager {
    pub fn new(bus: EventBus, topic: impl Into<String>) -> Self {
        SubscriptionManager { bus, topic: topic.into(), active: None }
    }

    /// Installs `handler` as the only receiver of progress events. A registration left
    /// over from an earlier run is released first.
    pub fn subscribe(&mut self, handler: Handler) -> Subscription {
        if let Some(stale) = self.active.take() {
            warn!(topic = %self.topic, listener = stale.listener_id, "releasing stale progress subscription");
            self.release(stale);
        }
        let listener = self.bus.listen(&self.topic);
        let cancel = CancellationToken::new();
        debug!(topic = %self.topic, listener = listener.id(), "progress subscription installed");
        self.active = Some(Registration { listener_id: listener.id(), cancel: cancel.clone() });
        Subscription { listener, cancel, handler }
    }

    /// Idempotent. Returns true only for the call that actually released something.
    pub fn unsubscribe(&mut self) -> bool {
        match self.active.take() {
            Some(registration) => {
                self.release(registration);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    fn release(&self, registration: Registration) {
        registration.cancel.cancel();
        self.bus.unlisten(&self.topic, registration.listener_id);
        debug!(topic = %self.topic, listener = registration.listener_id, "progress subscription released");
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Receiving half of a subscription.
pub struct Subscription {
    listener: Listener,
    cancel: CancellationToken,
    handler: Handler,
}

impl Subscription {
    /// Waits for the next payload. Resolves to None once the subscription is released.
    pub async fn recv(&mut self) -> Option<Value> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            payload = self.listener.recv() => payload,
        }
    }

    /// Decodes and hands one payload to the handler. Undecodable payloads are dropped.
    pub fn dispatch(&mut self, payload: Value) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        match progress::decode(&payload) {
            Ok(event) => {
                debug!(phase = %event.phase, progress = event.progress, "progress event");
                (self.handler)(event);
                true
            }
            Err(e) => {
                warn!(error = %e, "dropping progress payload");
                false
            }
        }
    }

    /// Dispatches everything already queued, in order. Returns how many were applied.
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while !self.cancel.is_cancelled() {
            let Some(payload) = self.listener.try_recv() else {
                break;
            };
            if self.dispatch(payload) {
                applied += 1;
            }
        }
        applied
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    const TOPIC: &str = "speed-test-progress";

    fn recording_handler() -> (Handler, Arc<Mutex<Vec<f64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: Handler = Box::new(move |event: ProgressEvent| sink.lock().unwrap().push(event.progress));
        (handler, seen)
    }

    fn tick(progress: f64) -> Value {
        json!({"phase": "download", "progress": progress, "speed_mbps": null, "latency_ms": null})
    }

    #[test]
    fn test_subscribe_and_drain() {
        let bus = EventBus::new();
        let mut manager = SubscriptionManager::new(bus.clone(), TOPIC);
        let (handler, seen) = recording_handler();
        let mut subscription = manager.subscribe(handler);
        assert!(manager.is_active());
        assert_eq!(bus.listener_count(TOPIC), 1);

        bus.emit_value(TOPIC, tick(10.0));
        bus.emit_value(TOPIC, tick(20.0));
        assert_eq!(subscription.drain(), 2);
        assert_eq!(*seen.lock().unwrap(), vec![10.0, 20.0]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let mut manager = SubscriptionManager::new(bus.clone(), TOPIC);
        let (handler, _seen) = recording_handler();
        let subscription = manager.subscribe(handler);

        assert!(manager.unsubscribe());
        assert!(!manager.unsubscribe());
        assert!(!manager.is_active());
        assert!(subscription.is_cancelled());
        assert_eq!(bus.listener_count(TOPIC), 0);
    }

    #[test]
    fn test_no_dispatch_after_unsubscribe() {
        let bus = EventBus::new();
        let mut manager = SubscriptionManager::new(bus.clone(), TOPIC);
        let (handler, seen) = recording_handler();
        let mut subscription = manager.subscribe(handler);

        bus.emit_value(TOPIC, tick(1.0)); // queued before release
        manager.unsubscribe();
        assert_eq!(bus.emit_value(TOPIC, tick(2.0)), 0);
        assert_eq!(subscription.drain(), 0);
        assert!(!subscription.dispatch(tick(3.0)));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_stale_subscription_replaced() {
        let bus = EventBus::new();
        let mut manager = SubscriptionManager::new(bus.clone(), TOPIC);
        let (stale_handler, stale_seen) = recording_handler();
        let mut stale = manager.subscribe(stale_handler);
        let (handler, seen) = recording_handler();
        let mut fresh = manager.subscribe(handler);

        assert!(stale.is_cancelled());
        assert_eq!(bus.listener_count(TOPIC), 1);
        bus.emit_value(TOPIC, tick(42.0));
        assert_eq!(stale.drain(), 0);
        assert_eq!(fresh.drain(), 1);
        assert!(stale_seen.lock().unwrap().is_empty());
        assert_eq!(*seen.lock().unwrap(), vec![42.0]);
    }

    #[test]
    fn test_malformed_payload_skipped() {
        let bus = EventBus::new();
        let mut manager = SubscriptionManager::new(bus.clone(), TOPIC);
        let (handler, seen) = recording_handler();
        let mut subscription = manager.subscribe(handler);

        bus.emit_value(TOPIC, json!({"progress": "nope"}));
        bus.emit_value(TOPIC, tick(5.0));
        assert_eq!(subscription.drain(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![5.0]);
    }

    #[tokio::test]
    async fn test_recv_returns_none_once_released() {
        let bus = EventBus::new();
        let mut manager = SubscriptionManager::new(bus.clone(), TOPIC);
        let (handler, _seen) = recording_handler();
        let mut subscription = manager.subscribe(handler);

        bus.emit_value(TOPIC, tick(1.0));
        assert_eq!(subscription.recv().await, Some(tick(1.0)));
        manager.unsubscribe();
        assert_eq!(subscription.recv().await, None);
    }

    #[test]
    fn test_manager_drop_releases() {
        let bus = EventBus::new();
        let mut manager = SubscriptionManager::new(bus.clone(), TOPIC);
        let (handler, _seen) = recording_handler();
        let subscription = manager.subscribe(handler);
        drop(manager);
        assert!(subscription.is_cancelled());
        assert_eq!(bus.listener_count(TOPIC), 0);
    }
}
