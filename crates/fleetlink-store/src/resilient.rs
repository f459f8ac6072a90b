//! The shared, self-healing Redis connection.
//!
//! One process holds one validated multiplexed connection. Every caller
//! that observes a connection-class failure mid-operation calls
//! [`ResilientConn::reset`] rather than retrying the dead handle, so the
//! handle heals in one place without call sites re-implementing backoff.

use fleetlink_core::retry::RetryPolicy;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::StoreError;

/// Zero-or-one live connection, guarded by its own lock.
///
/// The lock is held only while the handle is (re)constructed and
/// validated, never during ordinary reads and writes; callers get a cheap
/// clone of the multiplexed handle and use it outside the lock.
pub struct ResilientConn {
    url: String,
    retry: RetryPolicy,
    current: Mutex<Option<MultiplexedConnection>>,
}

impl ResilientConn {
    /// Wrap a store URL with the given reconnect policy.
    pub fn new(url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            url: url.into(),
            retry,
            current: Mutex::new(None),
        }
    }

    /// Current handle, lazily creating one if none is published.
    pub async fn get(&self) -> Result<MultiplexedConnection, StoreError> {
        let mut slot = self.current.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        self.rebuild(&mut slot).await
    }

    /// Discard any existing handle and publish a freshly validated one.
    pub async fn reset(&self) -> Result<MultiplexedConnection, StoreError> {
        let mut slot = self.current.lock().await;
        *slot = None;
        self.rebuild(&mut slot).await
    }

    async fn rebuild(
        &self,
        slot: &mut Option<MultiplexedConnection>,
    ) -> Result<MultiplexedConnection, StoreError> {
        let conn = self.connect_validated().await?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Connect with bounded exponential backoff and validate the new
    /// handle with a liveness probe before anyone sees it.
    async fn connect_validated(&self) -> Result<MultiplexedConnection, StoreError> {
        let mut last_error = String::new();
        for attempt in 0..self.retry.attempts {
            if attempt > 0 {
                tokio::time::sleep(self.retry.delay(attempt - 1)).await;
            }
            match self.try_connect().await {
                Ok(conn) => {
                    info!(attempt, "store connection established");
                    return Ok(conn);
                }
                Err(err) => {
                    warn!(attempt, error = %err, "store connection attempt failed");
                    last_error = err;
                }
            }
        }
        Err(StoreError::Connection(format!(
            "exhausted {} connection attempts: {last_error}",
            self.retry.attempts
        )))
    }

    async fn try_connect(&self) -> Result<MultiplexedConnection, String> {
        let client = redis::Client::open(self.url.as_str()).map_err(|e| e.to_string())?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| e.to_string())?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| format!("validation ping failed: {e}"))?;
        Ok(conn)
    }
}
