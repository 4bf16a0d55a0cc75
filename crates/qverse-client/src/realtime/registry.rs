//! Topic -> listener registry and panic-isolated dispatch

use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::error;

/// Callback invoked with a frame's `data`
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Unique per registration, so the same closure registered twice gets two ids
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, PartialEq, Eq)]
pub enum Removal {
    /// Listener was not registered (already removed, or registry cleared)
    NotFound,
    /// Listener removed, topic still has others
    Removed,
    /// Last listener removed, topic entry deleted
    TopicEmptied,
}

/// Invariant: a topic key exists iff its listener list is non-empty
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: u64,
    topics: HashMap<String, Vec<(ListenerId, Listener)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; the flag is true when it is the topic's first
    pub fn add(&mut self, topic: &str, listener: Listener) -> (ListenerId, bool) {
        let id = ListenerId(self.next_id);
        self.next_id += 1;

        let entry = self.topics.entry(topic.to_string()).or_default();
        let first = entry.is_empty();
        entry.push((id, listener));
        (id, first)
    }

    pub fn remove(&mut self, topic: &str, id: ListenerId) -> Removal {
        let Some(listeners) = self.topics.get_mut(topic) else {
            return Removal::NotFound;
        };

        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        if listeners.len() == before {
            return Removal::NotFound;
        }

        if listeners.is_empty() {
            self.topics.remove(topic);
            Removal::TopicEmptied
        } else {
            Removal::Removed
        }
    }

    /// Copy of the topic's listeners in registration order
    pub fn snapshot(&self, topic: &str) -> Vec<Listener> {
        self.topics
            .get(topic)
            .map(|listeners| listeners.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }

    pub fn topics(&self) -> Vec<String> {
        self.topics.keys().cloned().collect()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, Vec::len)
    }

    pub fn clear(&mut self) {
        self.topics.clear();
    }
}

/// Lock ignoring poison: listeners never run while the lock is held
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Invoke every listener currently registered for `topic`
///
/// The listener list is snapshotted and the lock released before any callback
/// runs, so callbacks may subscribe or unsubscribe. A panicking listener is
/// logged and skipped. Returns the number of listeners invoked.
pub fn dispatch(registry: &Mutex<ListenerRegistry>, topic: &str, data: &Value) -> usize {
    let listeners = lock(registry).snapshot(topic);

    for listener in &listeners {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(data))) {
            error!("Error in listener for {}: {}", topic, panic_message(payload.as_ref()));
        }
    }

    listeners.len()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "listener panicked".to_string()
    }
}
