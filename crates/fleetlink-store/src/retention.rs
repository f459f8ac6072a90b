//! Periodic time-based stream retention.
//!
//! Streams are capped on append (`maxlen`), but a quiet stream can still
//! hold arbitrarily old entries. This task trims every configured stream
//! down to a retention window on a fixed cadence.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::store::StreamStore;

/// Entry ID floor for a retention cutoff: everything assigned before
/// `cutoff` sorts below `<cutoff-ms>-0`.
pub fn min_id_for(cutoff: DateTime<Utc>) -> String {
    format!("{}-0", cutoff.timestamp_millis().max(0))
}

/// Trim `streams` to `retention` every `interval` until cancelled.
pub async fn run_retention(
    store: Arc<dyn StreamStore>,
    streams: Vec<String>,
    retention: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!(?retention, ?interval, "stream retention task started");
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
        let Ok(window) = chrono::Duration::from_std(retention) else {
            warn!(?retention, "retention window out of range, skipping pass");
            continue;
        };
        let min_id = min_id_for(Utc::now() - window);
        for stream in &streams {
            match store.trim_older_than(stream, &min_id).await {
                Ok(trimmed) => {
                    info!(stream = %stream, trimmed, min_id = %min_id, "retention trim");
                }
                Err(err) if err.is_connection() => {
                    warn!(stream = %stream, error = %err, "retention trim lost the store connection");
                    if let Err(reset_err) = store.reset().await {
                        warn!(error = %reset_err, "store reset failed");
                    }
                }
                Err(err) => {
                    warn!(stream = %stream, error = %err, "retention trim failed");
                }
            }
        }
    }
    info!("stream retention task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStreamStore;
    use crate::store::StreamStore;
    use chrono::TimeZone;

    #[test]
    fn min_id_floors_at_the_cutoff_millisecond() {
        let cutoff = Utc.with_ymd_and_hms(2026, 8, 7, 0, 0, 0).unwrap();
        assert_eq!(min_id_for(cutoff), format!("{}-0", cutoff.timestamp_millis()));
    }

    #[test]
    fn min_id_never_goes_negative() {
        let ancient = Utc.with_ymd_and_hms(1960, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(min_id_for(ancient), "0-0");
    }

    #[tokio::test]
    async fn retention_task_trims_and_stops_on_cancel() {
        let store = MemoryStreamStore::new();
        let _ = store
            .append("s", &[("n".to_string(), "1".to_string())], None)
            .await
            .unwrap();
        // Let the wall clock pass the append's millisecond.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_retention(
            Arc::new(store.clone()),
            vec!["s".to_string()],
            Duration::ZERO,
            Duration::from_millis(10),
            cancel.clone(),
        ));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !store.is_empty("s") {
            assert!(tokio::time::Instant::now() < deadline, "trim never ran");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("retention task should stop promptly")
            .unwrap();
    }
}
