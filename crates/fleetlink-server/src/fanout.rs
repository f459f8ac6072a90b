//! Per-device observer fan-out.
//!
//! One upstream status consumer feeds many UI-side observers. The latest
//! message per device key is cached independently of the observer sets, so
//! a late joiner (or a resubscribe after the last observer left) starts
//! with the last known state instead of waiting for the next broadcast.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::link::FrameSink;
use crate::metrics::FANOUT_DROPS_TOTAL;

#[derive(Default)]
struct FanoutState {
    observers: HashMap<String, HashMap<Uuid, Arc<dyn FrameSink>>>,
    latest: HashMap<String, Value>,
}

/// Observer registry with a latest-message cache per device key.
#[derive(Default)]
pub struct SubscriberFanout {
    inner: Mutex<FanoutState>,
}

impl SubscriberFanout {
    /// Empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer for `key` and immediately deliver the cached
    /// latest message, if any.
    pub fn subscribe(&self, key: &str, observer_id: Uuid, sink: Arc<dyn FrameSink>) {
        let cached = {
            let mut state = self.inner.lock();
            let _ = state
                .observers
                .entry(key.to_string())
                .or_default()
                .insert(observer_id, Arc::clone(&sink));
            state.latest.get(key).cloned()
        };
        if let Some(message) = cached {
            if let Err(err) = sink.send_text(&message.to_string()) {
                debug!(key, observer = %observer_id, error = %err, "cached replay failed");
            }
        }
    }

    /// Remove an observer; the key is dropped once its set is empty. The
    /// cached message is retained for future subscribers.
    pub fn unsubscribe(&self, key: &str, observer_id: Uuid) {
        let mut state = self.inner.lock();
        let emptied = match state.observers.get_mut(key) {
            Some(bucket) => {
                let _ = bucket.remove(&observer_id);
                bucket.is_empty()
            }
            None => false,
        };
        if emptied {
            let _ = state.observers.remove(key);
        }
    }

    /// Replace the cache for `key`, then send to every subscribed
    /// observer. Observers whose transport has closed are dropped from the
    /// set; send failures to live-looking observers are swallowed so one
    /// broken observer never blocks the rest.
    pub fn broadcast(&self, key: &str, message: &Value) {
        let targets: Vec<(Uuid, Arc<dyn FrameSink>)> = {
            let mut state = self.inner.lock();
            let _ = state.latest.insert(key.to_string(), message.clone());
            state.observers.get(key).map_or_else(Vec::new, |bucket| {
                bucket
                    .iter()
                    .map(|(id, sink)| (*id, Arc::clone(sink)))
                    .collect()
            })
        };
        if targets.is_empty() {
            return;
        }

        let text = message.to_string();
        let mut stale = Vec::new();
        for (observer_id, sink) in targets {
            if !sink.is_open() {
                stale.push(observer_id);
                continue;
            }
            if let Err(err) = sink.send_text(&text) {
                counter!(FANOUT_DROPS_TOTAL).increment(1);
                debug!(key, observer = %observer_id, error = %err, "fan-out send dropped");
            }
        }

        if !stale.is_empty() {
            let mut state = self.inner.lock();
            let emptied = match state.observers.get_mut(key) {
                Some(bucket) => {
                    for observer_id in stale {
                        let _ = bucket.remove(&observer_id);
                    }
                    bucket.is_empty()
                }
                None => false,
            };
            if emptied {
                let _ = state.observers.remove(key);
            }
        }
    }

    /// Cached latest message for `key`.
    pub fn latest(&self, key: &str) -> Option<Value> {
        self.inner.lock().latest.get(key).cloned()
    }

    /// Number of observers currently subscribed to `key`.
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner
            .lock()
            .observers
            .get(key)
            .map_or(0, HashMap::len)
    }
}
