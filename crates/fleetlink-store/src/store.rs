//! The stream store backend trait.

use std::time::Duration;

use async_trait::async_trait;

use crate::entry::{StreamCursor, StreamEntry};
use crate::error::StoreError;

/// An append-only log of named streams with totally ordered entry IDs.
///
/// Semantics every backend must honor:
///
/// - `append` assigns a strictly increasing entry ID per stream; `maxlen`
///   is an approximate cap, trimmed from the oldest end.
/// - `read_after` returns up to `count` entries strictly after `cursor`,
///   in stream order, waiting up to `block` when none are available yet.
///   An empty result after the wait is a timeout, not an error.
/// - `ack` removes one delivered entry; acknowledging an entry that is
///   already gone is not an error.
/// - `trim_older_than` drops entries with IDs below `min_id`
///   (approximate, store-defined granularity) and reports how many went.
/// - `reset` discards and rebuilds whatever connection state the backend
///   holds; callers invoke it after a connection-class failure instead of
///   retrying a dead handle.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Append one entry, returning its assigned ID.
    async fn append(
        &self,
        stream: &str,
        fields: &[(String, String)],
        maxlen: Option<usize>,
    ) -> Result<String, StoreError>;

    /// Read up to `count` entries strictly after `cursor`, waiting up to
    /// `block` for new data.
    async fn read_after(
        &self,
        stream: &str,
        cursor: &StreamCursor,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, StoreError>;

    /// Remove one entry after successful delivery.
    async fn ack(&self, stream: &str, id: &str) -> Result<(), StoreError>;

    /// Drop entries older than `min_id`; returns the trimmed count.
    async fn trim_older_than(&self, stream: &str, min_id: &str) -> Result<u64, StoreError>;

    /// Liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Discard and rebuild the backend connection state.
    async fn reset(&self) -> Result<(), StoreError>;
}
