//! # fleetlink-store
//!
//! Access to the external append-only log for the Fleetlink relay.
//!
//! The log is a set of named streams with monotonically increasing entry
//! IDs, at-least-once delivery, and no consumer-offset tracking. This crate
//! provides:
//!
//! - **[`StreamStore`]**: the backend trait (append, bounded blocking read,
//!   acknowledge, trim, ping, reset)
//! - **[`RedisStreamStore`]**: Redis streams backend over a
//!   [`ResilientConn`] that validates, lazily (re)creates, and serializes
//!   access to one shared multiplexed connection
//! - **[`MemoryStreamStore`]**: in-process backend for tests and
//!   `memory://` development mode
//! - **[`StreamConsumer`]**: the generic "read after cursor, apply,
//!   optionally acknowledge" tailing loop
//! - **[`retention`]**: periodic time-based stream trimming
//!
//! ## Crate Position
//!
//! Depends only on `fleetlink-core`. The server crate supplies
//! [`EntryApply`] implementations and owns the spawned consumer tasks.

#![deny(unsafe_code)]

pub mod consumer;
pub mod entry;
pub mod error;
pub mod memory;
pub mod redis_store;
pub mod resilient;
pub mod retention;
pub mod store;

pub use consumer::{AckMode, ApplyOutcome, ConsumerConfig, EntryApply, StreamConsumer};
pub use entry::{parse_entry_id, StreamCursor, StreamEntry};
pub use error::StoreError;
pub use memory::MemoryStreamStore;
pub use redis_store::RedisStreamStore;
pub use resilient::ResilientConn;
pub use store::StreamStore;
