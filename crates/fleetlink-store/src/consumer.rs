//! The generic stream tailing loop.
//!
//! A consumer reads batches after its cursor, applies each entry in stream
//! order, and in acknowledge mode deletes the entries it delivered. The
//! cursor advances *before* apply, so a crash between apply and the next
//! read never replays an entry within one process lifetime; replay across
//! restarts is the accepted at-least-once cost.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::entry::{StreamCursor, StreamEntry};
use crate::store::StreamStore;

/// Whether the consumer deletes entries it has delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Delete delivered entries; leave undelivered ones for a later pass.
    Acknowledge,
    /// Never delete; the stream's own retention is the only cleanup.
    ReadOnly,
}

/// What applying one entry came to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The entry reached its target; acknowledge it.
    Delivered,
    /// The target is not available right now; leave the entry for
    /// redelivery.
    Unavailable,
    /// The entry can never succeed (failed validation); discard it.
    Invalid,
    /// Something unexpected went wrong; leave the entry and keep going.
    Failed,
}

/// Downstream handler a consumer drives, e.g. "forward to a device" or
/// "cache and fan out". Implementations log their own failure details; the
/// outcome tells the loop what to do with the entry.
#[async_trait]
pub trait EntryApply: Send + Sync {
    /// Apply one entry.
    async fn apply(&self, entry: &StreamEntry) -> ApplyOutcome;
}

/// Per-consumer knobs.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Stream key to tail.
    pub stream: String,
    /// Cursor to start (and rewind to) from.
    pub start: StreamCursor,
    /// Acknowledge mode.
    pub ack: AckMode,
    /// Max entries per read.
    pub batch: usize,
    /// Bounded wait when no entries are available yet.
    pub block: Duration,
}

impl ConsumerConfig {
    /// Config with the default batch size (20) and block interval (5 s).
    pub fn new(stream: impl Into<String>, start: StreamCursor, ack: AckMode) -> Self {
        Self {
            stream: stream.into(),
            start,
            ack,
            batch: 20,
            block: Duration::from_secs(5),
        }
    }
}

/// One tailing loop over one stream.
pub struct StreamConsumer<A: EntryApply> {
    store: Arc<dyn StreamStore>,
    config: ConsumerConfig,
    apply: A,
}

impl<A: EntryApply> StreamConsumer<A> {
    /// Build a consumer; nothing runs until [`StreamConsumer::run`].
    pub fn new(store: Arc<dyn StreamStore>, config: ConsumerConfig, apply: A) -> Self {
        Self {
            store,
            config,
            apply,
        }
    }

    /// Tail the stream until `cancel` fires.
    ///
    /// Cancellation is observed between reads and between complete
    /// entry-apply cycles; no entry is ever left half-applied.
    pub async fn run(self, cancel: CancellationToken) {
        let ConsumerConfig {
            stream,
            start,
            ack,
            batch,
            block,
        } = self.config;
        let mut cursor = start.clone();
        // Set when a pass leaves an entry unacknowledged; a later empty
        // read rewinds to the start cursor so that entry is seen again.
        let mut redeliver = false;
        info!(stream = %stream, cursor = %cursor, ?ack, "stream consumer started");

        loop {
            let read = tokio::select! {
                () = cancel.cancelled() => break,
                read = self.store.read_after(&stream, &cursor, batch, block) => read,
            };
            match read {
                Ok(entries) if entries.is_empty() => {
                    if ack == AckMode::Acknowledge && redeliver && cursor != start {
                        debug!(stream = %stream, start = %start, "rewinding for redelivery");
                        cursor = start.clone();
                        redeliver = false;
                    }
                }
                Ok(entries) => {
                    for entry in &entries {
                        if cancel.is_cancelled() {
                            info!(stream = %stream, "stream consumer cancelled");
                            return;
                        }
                        cursor.advance_to(&entry.id);
                        match self.apply.apply(entry).await {
                            ApplyOutcome::Delivered => {
                                if ack == AckMode::Acknowledge {
                                    if let Err(err) = self.store.ack(&stream, &entry.id).await {
                                        warn!(stream = %stream, id = %entry.id, error = %err,
                                            "failed to acknowledge delivered entry");
                                    }
                                }
                            }
                            ApplyOutcome::Unavailable | ApplyOutcome::Failed => {
                                redeliver = true;
                            }
                            ApplyOutcome::Invalid => {
                                // An entry that can never validate is
                                // discarded so rewinds do not resurface it.
                                if ack == AckMode::Acknowledge {
                                    if let Err(err) = self.store.ack(&stream, &entry.id).await {
                                        warn!(stream = %stream, id = %entry.id, error = %err,
                                            "failed to discard invalid entry");
                                    }
                                }
                            }
                        }
                    }
                }
                Err(err) if err.is_connection() => {
                    warn!(stream = %stream, error = %err, "stream read lost the store connection");
                    if let Err(reset_err) = self.store.reset().await {
                        warn!(stream = %stream, error = %reset_err, "store reset failed");
                    }
                    if !pause(&cancel, Duration::from_millis(500)).await {
                        break;
                    }
                }
                Err(err) => {
                    warn!(stream = %stream, error = %err, "stream read failed");
                    if !pause(&cancel, Duration::from_secs(1)).await {
                        break;
                    }
                }
            }
        }
        info!(stream = %stream, "stream consumer stopped");
    }
}

/// Sleep unless cancelled first; returns `false` on cancellation.
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}
