//! In-process stream store.
//!
//! Backs tests and `memory://` development mode. IDs are `<ms>-<seq>` like
//! the real store, so cursor ordering and time-based trimming behave the
//! same way.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::entry::{parse_entry_id, StreamCursor, StreamEntry};
use crate::error::StoreError;
use crate::store::StreamStore;

#[derive(Default)]
struct State {
    streams: HashMap<String, Vec<StreamEntry>>,
    last_ms: u64,
    last_seq: u64,
}

/// [`StreamStore`] kept entirely in process memory.
#[derive(Clone, Default)]
pub struct MemoryStreamStore {
    state: Arc<Mutex<State>>,
    appended: Arc<Notify>,
}

impl MemoryStreamStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held in `stream`.
    pub fn len(&self, stream: &str) -> usize {
        self.state
            .lock()
            .streams
            .get(stream)
            .map_or(0, Vec::len)
    }

    /// Whether `stream` holds no entries.
    pub fn is_empty(&self, stream: &str) -> bool {
        self.len(stream) == 0
    }

    /// Copy of the entries currently held in `stream`, oldest first.
    pub fn entries(&self, stream: &str) -> Vec<StreamEntry> {
        self.state
            .lock()
            .streams
            .get(stream)
            .cloned()
            .unwrap_or_default()
    }

    fn next_id(state: &mut State) -> String {
        let now_ms = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
        if now_ms > state.last_ms {
            state.last_ms = now_ms;
            state.last_seq = 0;
        } else {
            state.last_seq += 1;
        }
        format!("{}-{}", state.last_ms, state.last_seq)
    }

    /// Resolve a cursor to a concrete numeric position; `"$"` means the
    /// current tail of the stream at call time.
    fn resolve(state: &State, stream: &str, cursor: &StreamCursor) -> (u64, u64) {
        if cursor.as_str() == "$" {
            return state
                .streams
                .get(stream)
                .and_then(|entries| entries.last())
                .and_then(|entry| parse_entry_id(&entry.id))
                .unwrap_or((0, 0));
        }
        parse_entry_id(cursor.as_str()).unwrap_or((0, 0))
    }

    fn collect_after(
        state: &State,
        stream: &str,
        after: (u64, u64),
        count: usize,
    ) -> Vec<StreamEntry> {
        state.streams.get(stream).map_or_else(Vec::new, |entries| {
            entries
                .iter()
                .filter(|entry| parse_entry_id(&entry.id).is_some_and(|id| id > after))
                .take(count)
                .cloned()
                .collect()
        })
    }
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn append(
        &self,
        stream: &str,
        fields: &[(String, String)],
        maxlen: Option<usize>,
    ) -> Result<String, StoreError> {
        let id = {
            let mut state = self.state.lock();
            let id = Self::next_id(&mut state);
            let entries = state.streams.entry(stream.to_string()).or_default();
            entries.push(StreamEntry::new(id.clone(), fields));
            if let Some(cap) = maxlen {
                while entries.len() > cap {
                    let _ = entries.remove(0);
                }
            }
            id
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn read_after(
        &self,
        stream: &str,
        cursor: &StreamCursor,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let deadline = Instant::now() + block;
        let after = Self::resolve(&self.state.lock(), stream, cursor);
        loop {
            // Arm the notification before checking, so an append between the
            // check and the wait cannot be missed.
            let notified = self.appended.notified();
            let batch = Self::collect_after(&self.state.lock(), stream, after, count);
            if !batch.is_empty() {
                return Ok(batch);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }

    async fn ack(&self, stream: &str, id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if let Some(entries) = state.streams.get_mut(stream) {
            entries.retain(|entry| entry.id != id);
        }
        Ok(())
    }

    async fn trim_older_than(&self, stream: &str, min_id: &str) -> Result<u64, StoreError> {
        let floor = parse_entry_id(min_id)
            .ok_or_else(|| StoreError::Store(format!("invalid trim id '{min_id}'")))?;
        let mut state = self.state.lock();
        let Some(entries) = state.streams.get_mut(stream) else {
            return Ok(0);
        };
        let before = entries.len();
        entries.retain(|entry| parse_entry_id(&entry.id).is_some_and(|id| id >= floor));
        Ok((before - entries.len()) as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn reset(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
