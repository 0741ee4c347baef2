// Topic-keyed progress event bus.
//
// Every listener gets its own unbounded FIFO queue, so a burst of N emits turns into N
// deliveries in emit order. Nothing is coalesced.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::trace;

pub type ListenerId = u64;

#[derive(Debug, Default)]
struct Registry {
    next_id: ListenerId,
    topics: HashMap<String, Vec<(ListenerId, mpsc::UnboundedSender<Value>)>>,
}

/// Cloning shares the same registry.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Default::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serializes `payload` and delivers it to every listener on `topic`.
    /// Returns how many listeners it reached.
    pub fn emit<T: Serialize>(&self, topic: &str, payload: &T) -> Result<usize, serde_json::Error> {
        let value = serde_json::to_value(payload)?;
        Ok(self.emit_value(topic, value))
    }

    pub fn emit_value(&self, topic: &str, value: Value) -> usize {
        let mut registry = self.registry();
        let Some(listeners) = registry.topics.get_mut(topic) else {
            trace!(topic, "no listeners, payload dropped");
            return 0;
        };
        listeners.retain(|(_, tx)| !tx.is_closed());
        for (_, tx) in listeners.iter() {
            // Closed between retain and send only if the receiver was dropped concurrently.
            let _ = tx.send(value.clone());
        }
        listeners.len()
    }

    pub fn listen(&self, topic: &str) -> Listener {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.registry();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.topics.entry(topic.to_string()).or_default().push((id, tx));
        Listener { id, topic: topic.to_string(), rx }
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn unlisten(&self, topic: &str, id: ListenerId) -> bool {
        let mut registry = self.registry();
        let Some(listeners) = registry.topics.get_mut(topic) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            registry.topics.remove(topic);
        }
        removed
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        self.registry()
            .topics
            .get(topic)
            .map_or(0, |listeners| listeners.iter().filter(|(_, tx)| !tx.is_closed()).count())
    }
}

/// Receiving end of one registration on the bus.
#[derive(Debug)]
pub struct Listener {
    id: ListenerId,
    topic: String,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl Listener {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next payload, or None once the listener is unregistered and its queue is empty.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.try_recv().ok()
    }
}
