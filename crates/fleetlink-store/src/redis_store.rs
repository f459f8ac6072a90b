//! Redis streams backend.
//!
//! Raw `redis::cmd` calls over the shared [`ResilientConn`]; the handle is
//! cloned out of the wrapper and used outside its lock. Errors are split
//! into connection-class (reset and retry) and store-class (operation
//! rejected) before they leave this module.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use fleetlink_core::retry::RetryPolicy;

use crate::entry::{StreamCursor, StreamEntry};
use crate::error::StoreError;
use crate::resilient::ResilientConn;
use crate::store::StreamStore;

/// [`StreamStore`] over Redis streams (`XADD`/`XREAD`/`XDEL`/`XTRIM`).
pub struct RedisStreamStore {
    conn: ResilientConn,
}

impl RedisStreamStore {
    /// Backend for the given Redis URL.
    pub fn new(url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            conn: ResilientConn::new(url, retry),
        }
    }
}

#[async_trait]
impl StreamStore for RedisStreamStore {
    async fn append(
        &self,
        stream: &str,
        fields: &[(String, String)],
        maxlen: Option<usize>,
    ) -> Result<String, StoreError> {
        let mut conn = self.conn.get().await?;
        let mut cmd = redis::cmd("XADD");
        let _ = cmd.arg(stream);
        if let Some(cap) = maxlen {
            let _ = cmd.arg("MAXLEN").arg("~").arg(cap);
        }
        let _ = cmd.arg("*");
        for (name, value) in fields {
            let _ = cmd.arg(name).arg(value);
        }
        let id: String = cmd.query_async(&mut conn).await.map_err(classify)?;
        Ok(id)
    }

    async fn read_after(
        &self,
        stream: &str,
        cursor: &StreamCursor,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let mut conn = self.conn.get().await?;
        let value: redis::Value = redis::cmd("XREAD")
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(stream)
            .arg(cursor.as_str())
            .query_async(&mut conn)
            .await
            .map_err(classify)?;
        parse_read_reply(value)
    }

    async fn ack(&self, stream: &str, id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.get().await?;
        let _removed: u64 = redis::cmd("XDEL")
            .arg(stream)
            .arg(id)
            .query_async(&mut conn)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn trim_older_than(&self, stream: &str, min_id: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.get().await?;
        let trimmed: u64 = redis::cmd("XTRIM")
            .arg(stream)
            .arg("MINID")
            .arg("~")
            .arg(min_id)
            .query_async(&mut conn)
            .await
            .map_err(classify)?;
        Ok(trimmed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.get().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn reset(&self) -> Result<(), StoreError> {
        let _ = self.conn.reset().await?;
        Ok(())
    }
}

fn classify(err: redis::RedisError) -> StoreError {
    if err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_io_error()
        || err.is_timeout()
    {
        StoreError::Connection(err.to_string())
    } else {
        StoreError::Store(err.to_string())
    }
}

/// Decode an `XREAD` reply into entries.
///
/// Reply shape: array of `[stream-name, [[id, [field, value, ...]], ...]]`;
/// `Nil` when the blocking read timed out with nothing new.
fn parse_read_reply(value: redis::Value) -> Result<Vec<StreamEntry>, StoreError> {
    let mut entries = Vec::new();
    let redis::Value::Bulk(streams) = value else {
        return Ok(entries);
    };
    for stream in streams {
        let redis::Value::Bulk(parts) = stream else {
            continue;
        };
        let Some(redis::Value::Bulk(items)) = parts.into_iter().nth(1) else {
            continue;
        };
        for item in items {
            let redis::Value::Bulk(entry_parts) = item else {
                continue;
            };
            let (Some(id_value), Some(fields_value)) = (entry_parts.first(), entry_parts.get(1))
            else {
                continue;
            };
            let id: String = redis::from_redis_value(id_value).map_err(decode_error)?;
            let redis::Value::Bulk(raw_fields) = fields_value else {
                continue;
            };
            let mut fields = HashMap::new();
            let mut idx = 0;
            while idx + 1 < raw_fields.len() {
                let name: String = redis::from_redis_value(&raw_fields[idx]).map_err(decode_error)?;
                let value: String =
                    redis::from_redis_value(&raw_fields[idx + 1]).map_err(decode_error)?;
                let _ = fields.insert(name, value);
                idx += 2;
            }
            entries.push(StreamEntry { id, fields });
        }
    }
    Ok(entries)
}

fn decode_error(err: redis::RedisError) -> StoreError {
    StoreError::Store(format!("malformed stream reply: {err}"))
}
