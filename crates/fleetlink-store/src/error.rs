//! Store failure classification.

/// Errors surfaced by a [`crate::StreamStore`] backend.
///
/// The split matters for recovery: a connection-class failure means the
/// shared handle is unusable and the caller should `reset()` before
/// retrying; a store-class failure means the operation itself was rejected
/// and the handle is still fine.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying connection is unusable (refused, dropped, timed out,
    /// or exhausted its reconnect attempts).
    #[error("store connection error: {0}")]
    Connection(String),

    /// The store rejected the operation; the connection itself is healthy.
    #[error("store error: {0}")]
    Store(String),
}

impl StoreError {
    /// Whether this failure calls for a connection reset.
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}
