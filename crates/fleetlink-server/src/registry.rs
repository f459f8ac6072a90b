//! Device presence registry.
//!
//! One record per known device ID. The record map sits behind a single
//! mutex held only for in-memory mutation; every socket send or close is
//! queued through a [`FrameSink`] outside the lock. Stale pruning runs
//! inline before each mutating operation and again on a fixed interval
//! from a background task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fleetlink_core::close::CloseReason;
use fleetlink_core::status::DeviceStatus;
use fleetlink_core::time::{iso8601, utc_now};
use metrics::counter;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::link::{FrameSink, SinkError};
use crate::metrics::{
    COMMANDS_FORWARDED_TOTAL, COMMANDS_UNROUTABLE_TOTAL, DEVICES_PRUNED_TOTAL,
    DEVICE_CONNECTIONS_TOTAL, DEVICE_DISCONNECTIONS_TOTAL,
};

/// Registry operation failure.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No live connection for the target device.
    #[error("device '{0}' is not connected")]
    NotConnected(String),

    /// The device socket rejected the frame.
    #[error("transport error for device '{0}': {1}")]
    Transport(String, SinkError),
}

struct DeviceRecord {
    link: Option<Arc<dyn FrameSink>>,
    connected_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    last_payload: Option<Map<String, Value>>,
    commands_sent: u64,
}

impl DeviceRecord {
    fn status(&self, device_id: &str, now: DateTime<Utc>) -> DeviceStatus {
        DeviceStatus {
            device_id: device_id.to_string(),
            connected: self.link.is_some(),
            connected_at: self.connected_at,
            last_seen: self.last_seen,
            commands_sent: self.commands_sent,
            last_payload: self.last_payload.clone(),
            stale_seconds: age(now, self.last_seen).as_secs_f64(),
        }
    }
}

/// Tracks which devices are currently connected and relays frames to them.
pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, DeviceRecord>>,
    stale_timeout: Duration,
}

impl DeviceRegistry {
    /// Registry with the given staleness threshold.
    pub fn new(stale_timeout: Duration) -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            stale_timeout: stale_timeout.max(Duration::from_secs(1)),
        }
    }

    /// Register a new device connection.
    ///
    /// The hello acknowledgment goes out over the new link before any
    /// shared state changes; a failed hello aborts the registration and
    /// leaves the prior connection (if any) untouched. A prior live link
    /// for the same ID is closed with [`CloseReason::Superseded`] after
    /// the swap; `last_payload` and `commands_sent` carry over.
    pub fn register(
        &self,
        device_id: &str,
        link: Arc<dyn FrameSink>,
    ) -> Result<DeviceStatus, RegistryError> {
        self.prune_stale();

        let hello = json!({
            "type": "hello",
            "deviceId": device_id,
            "acceptedAt": iso8601(utc_now()),
        });
        link.send_text(&hello.to_string())
            .map_err(|err| RegistryError::Transport(device_id.to_string(), err))?;

        let status = {
            let mut devices = self.devices.lock();
            let now = utc_now();
            let previous = devices.remove(device_id);
            let (last_payload, commands_sent, old_link) = match previous {
                Some(prev) => (prev.last_payload, prev.commands_sent, prev.link),
                None => (None, 0, None),
            };
            // Queue the policy close before the replacement becomes current.
            // This is an in-memory enqueue, not socket I/O; the old writer
            // task performs the actual close.
            if let Some(old) = old_link {
                debug!(device_id, "closing superseded connection");
                best_effort_close(old.as_ref(), CloseReason::Superseded);
            }
            let record = DeviceRecord {
                link: Some(link),
                connected_at: now,
                last_seen: now,
                last_payload,
                commands_sent,
            };
            let status = record.status(device_id, now);
            let _ = devices.insert(device_id.to_string(), record);
            status
        };

        counter!(DEVICE_CONNECTIONS_TOTAL).increment(1);
        Ok(status)
    }

    /// Clear the device's link and bump `last_seen`. The record is kept
    /// for snapshot continuity. No-op for unknown IDs.
    pub fn unregister(&self, device_id: &str) {
        self.prune_stale();
        let mut devices = self.devices.lock();
        if let Some(record) = devices.get_mut(device_id) {
            if record.link.take().is_some() {
                counter!(DEVICE_DISCONNECTIONS_TOTAL).increment(1);
            }
            record.last_seen = utc_now();
        }
    }

    /// Like [`DeviceRegistry::unregister`], but only when `link` is still
    /// the record's current connection. A read loop ending after its
    /// connection was superseded must not tear down the replacement.
    pub fn unregister_if_current(&self, device_id: &str, link: &Arc<dyn FrameSink>) {
        let current = {
            let devices = self.devices.lock();
            devices
                .get(device_id)
                .and_then(|record| record.link.as_ref())
                .is_some_and(|held| std::ptr::addr_eq(Arc::as_ptr(held), Arc::as_ptr(link)))
        };
        if current {
            self.unregister(device_id);
        }
    }

    /// Send a payload to one device.
    ///
    /// Fails with [`RegistryError::NotConnected`] when no live link
    /// exists; in that case `commands_sent` is untouched. When a link is
    /// found the counter is incremented before the send is attempted, so
    /// it counts delivery attempts, not confirmed receipt.
    pub fn forward(&self, device_id: &str, payload: &Value) -> Result<(), RegistryError> {
        self.prune_stale();
        let link = {
            let mut devices = self.devices.lock();
            let Some(record) = devices.get_mut(device_id) else {
                counter!(COMMANDS_UNROUTABLE_TOTAL).increment(1);
                return Err(RegistryError::NotConnected(device_id.to_string()));
            };
            let Some(link) = record.link.as_ref().map(Arc::clone) else {
                counter!(COMMANDS_UNROUTABLE_TOTAL).increment(1);
                return Err(RegistryError::NotConnected(device_id.to_string()));
            };
            record.commands_sent += 1;
            link
        };
        link.send_text(&payload.to_string())
            .map_err(|err| RegistryError::Transport(device_id.to_string(), err))?;
        counter!(COMMANDS_FORWARDED_TOTAL).increment(1);
        Ok(())
    }

    /// Refresh `last_seen`; replace `last_payload` only when a payload is
    /// supplied (pings and non-JSON frames never clobber cached
    /// telemetry). No-op for unknown IDs.
    pub fn update_last_seen(&self, device_id: &str, payload: Option<Map<String, Value>>) {
        let mut devices = self.devices.lock();
        if let Some(record) = devices.get_mut(device_id) {
            record.last_seen = utc_now();
            if let Some(payload) = payload {
                record.last_payload = Some(payload);
            }
        }
    }

    /// Current view of every known record, pruning stale ones first.
    /// Ordering is unspecified.
    pub fn snapshot(&self) -> Vec<DeviceStatus> {
        self.prune_stale();
        let devices = self.devices.lock();
        let now = utc_now();
        devices
            .iter()
            .map(|(device_id, record)| record.status(device_id, now))
            .collect()
    }

    /// Remove every record that is past the staleness threshold and holds
    /// no live link. A record with a live link is never pruned, whatever
    /// its `last_seen`.
    pub fn prune_stale(&self) {
        let evicted: Vec<(String, Option<Arc<dyn FrameSink>>)> = {
            let mut devices = self.devices.lock();
            let now = utc_now();
            let stale: Vec<String> = devices
                .iter()
                .filter(|(_, record)| {
                    record.link.is_none() && age(now, record.last_seen) > self.stale_timeout
                })
                .map(|(device_id, _)| device_id.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|device_id| {
                    devices
                        .remove(&device_id)
                        .map(|record| (device_id, record.link))
                })
                .collect()
        };
        for (device_id, link) in evicted {
            info!(device_id = %device_id, "pruned stale device record");
            counter!(DEVICES_PRUNED_TOTAL).increment(1);
            if let Some(link) = link {
                best_effort_close(link.as_ref(), CloseReason::Evicted);
            }
        }
    }

    /// Unconditionally remove the record and close any live link with
    /// [`CloseReason::AdminReset`]. Returns whether a record existed.
    pub fn force_reset(&self, device_id: &str) -> bool {
        let removed = self.devices.lock().remove(device_id);
        let Some(record) = removed else {
            return false;
        };
        if let Some(link) = record.link {
            best_effort_close(link.as_ref(), CloseReason::AdminReset);
        }
        info!(device_id, "forced device reset");
        true
    }

    /// Drain the registry, closing every live link with
    /// [`CloseReason::ShuttingDown`]. Each close is independent and
    /// best-effort.
    pub fn close_all(&self) {
        let entries: Vec<(String, Option<Arc<dyn FrameSink>>)> = {
            let mut devices = self.devices.lock();
            devices
                .drain()
                .map(|(device_id, record)| (device_id, record.link))
                .collect()
        };
        for (device_id, link) in entries {
            if let Some(link) = link {
                best_effort_close(link.as_ref(), CloseReason::ShuttingDown);
                info!(device_id = %device_id, "closed device connection during shutdown");
            }
        }
    }

    /// Prune on a fixed interval until cancelled.
    pub async fn run_auto_prune(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        info!(?interval, "registry auto-prune started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => self.prune_stale(),
            }
        }
        info!("registry auto-prune stopped");
    }

    #[cfg(test)]
    fn backdate(&self, device_id: &str, by: Duration) {
        let mut devices = self.devices.lock();
        if let Some(record) = devices.get_mut(device_id) {
            record.last_seen =
                record.last_seen - chrono::Duration::from_std(by).expect("test duration");
        }
    }
}

fn age(now: DateTime<Utc>, last_seen: DateTime<Utc>) -> Duration {
    now.signed_duration_since(last_seen)
        .to_std()
        .unwrap_or_default()
}

fn best_effort_close(link: &dyn FrameSink, reason: CloseReason) {
    if let Err(err) = link.close(reason) {
        warn!(reason = %reason, error = %err, "close attempt failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    const STALE: Duration = Duration::from_secs(600);

    /// Sink that records every frame and can be told to fail sends.
    #[derive(Default)]
    struct RecordingSink {
        frames: PlMutex<Vec<String>>,
        closes: PlMutex<Vec<CloseReason>>,
        fail_sends: AtomicBool,
    }

    impl RecordingSink {
        fn failing() -> Self {
            let sink = Self::default();
            sink.fail_sends.store(true, Ordering::SeqCst);
            sink
        }

        fn frames(&self) -> Vec<String> {
            self.frames.lock().clone()
        }

        fn closes(&self) -> Vec<CloseReason> {
            self.closes.lock().clone()
        }
    }

    impl FrameSink for RecordingSink {
        fn send_text(&self, text: &str) -> Result<(), SinkError> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(SinkError::Closed);
            }
            self.frames.lock().push(text.to_string());
            Ok(())
        }

        fn close(&self, reason: CloseReason) -> Result<(), SinkError> {
            self.closes.lock().push(reason);
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    fn sink() -> Arc<RecordingSink> {
        Arc::new(RecordingSink::default())
    }

    fn telemetry(speed: i64) -> Map<String, Value> {
        let mut map = Map::new();
        let _ = map.insert("speed".to_string(), Value::from(speed));
        let _ = map.insert("type".to_string(), Value::from("telemetry"));
        map
    }

    #[test]
    fn register_sends_hello_first() {
        let registry = DeviceRegistry::new(STALE);
        let link = sink();
        let status = registry.register("T1", link.clone()).unwrap();

        assert!(status.connected);
        let frames = link.frames();
        assert_eq!(frames.len(), 1);
        let hello: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(hello["type"], "hello");
        assert_eq!(hello["deviceId"], "T1");
        assert!(hello["acceptedAt"].is_string());
    }

    #[test]
    fn failed_hello_aborts_registration() {
        let registry = DeviceRegistry::new(STALE);
        let bad = Arc::new(RecordingSink::failing());
        let err = registry.register("T1", bad).unwrap_err();
        assert!(matches!(err, RegistryError::Transport(_, _)));
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn reregistration_supersedes_and_preserves_history() {
        let registry = DeviceRegistry::new(STALE);
        let first = sink();
        let _ = registry.register("T1", first.clone()).unwrap();
        registry.update_last_seen("T1", Some(telemetry(3)));
        let _ = registry
            .forward("T1", &json!({"command": "stop"}))
            .unwrap();

        let second = sink();
        let status = registry.register("T1", second).unwrap();

        assert_eq!(first.closes(), vec![CloseReason::Superseded]);
        assert_eq!(status.commands_sent, 1);
        assert_eq!(status.last_payload, Some(telemetry(3)));
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn forward_to_unknown_device_fails_not_connected() {
        let registry = DeviceRegistry::new(STALE);
        let err = registry.forward("ghost", &json!({"command": "stop"})).unwrap_err();
        assert!(matches!(err, RegistryError::NotConnected(_)));
    }

    #[test]
    fn forward_to_disconnected_device_never_increments() {
        let registry = DeviceRegistry::new(STALE);
        let link = sink();
        let _ = registry.register("T1", link).unwrap();
        registry.unregister("T1");

        let err = registry.forward("T1", &json!({"command": "stop"})).unwrap_err();
        assert!(matches!(err, RegistryError::NotConnected(_)));
        assert_eq!(registry.snapshot()[0].commands_sent, 0);
    }

    #[test]
    fn forward_counts_attempts_even_when_the_send_fails() {
        let registry = DeviceRegistry::new(STALE);
        let link = Arc::new(RecordingSink::default());
        let _ = registry.register("T1", link.clone()).unwrap();
        link.fail_sends.store(true, Ordering::SeqCst);

        let err = registry.forward("T1", &json!({"command": "stop"})).unwrap_err();
        assert!(matches!(err, RegistryError::Transport(_, _)));
        assert_eq!(registry.snapshot()[0].commands_sent, 1);
    }

    #[test]
    fn forward_delivers_the_serialized_payload() {
        let registry = DeviceRegistry::new(STALE);
        let link = sink();
        let _ = registry.register("T1", link.clone()).unwrap();

        registry
            .forward("T1", &json!({"command": "setspeed", "leftSpeed": 90}))
            .unwrap();

        let frames = link.frames();
        let sent: Value = serde_json::from_str(frames.last().unwrap()).unwrap();
        assert_eq!(sent["command"], "setspeed");
        assert_eq!(sent["leftSpeed"], 90);
    }

    #[test]
    fn update_last_seen_keeps_payload_when_none_supplied() {
        let registry = DeviceRegistry::new(STALE);
        let _ = registry.register("T1", sink()).unwrap();
        registry.update_last_seen("T1", Some(telemetry(3)));
        registry.update_last_seen("T1", None);

        assert_eq!(registry.snapshot()[0].last_payload, Some(telemetry(3)));
    }

    #[test]
    fn unregister_retains_the_record() {
        let registry = DeviceRegistry::new(STALE);
        let _ = registry.register("T1", sink()).unwrap();
        registry.update_last_seen("T1", Some(telemetry(3)));
        registry.unregister("T1");

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot[0].connected);
        assert_eq!(snapshot[0].last_payload, Some(telemetry(3)));
    }

    #[test]
    fn unregister_unknown_device_is_a_noop() {
        let registry = DeviceRegistry::new(STALE);
        registry.unregister("ghost");
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn unregister_if_current_ignores_a_superseded_link() {
        let registry = DeviceRegistry::new(STALE);
        let first = sink();
        let _ = registry.register("T1", first.clone()).unwrap();
        let second = sink();
        let _ = registry.register("T1", second.clone()).unwrap();

        // The superseded read loop winds down; the replacement stays live.
        let first_dyn: Arc<dyn FrameSink> = first;
        registry.unregister_if_current("T1", &first_dyn);
        assert!(registry.snapshot()[0].connected);

        let second_dyn: Arc<dyn FrameSink> = second;
        registry.unregister_if_current("T1", &second_dyn);
        assert!(!registry.snapshot()[0].connected);
    }

    #[test]
    fn prune_removes_only_stale_disconnected_records() {
        let registry = DeviceRegistry::new(STALE);
        let live = sink();
        let _ = registry.register("live", live.clone()).unwrap();
        let _ = registry.register("gone", sink()).unwrap();
        registry.unregister("gone");

        registry.backdate("live", Duration::from_secs(3600));
        registry.backdate("gone", Duration::from_secs(3600));
        registry.prune_stale();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].device_id, "live");
        assert!(live.closes().is_empty());
    }

    #[test]
    fn fresh_disconnected_records_survive_pruning() {
        let registry = DeviceRegistry::new(STALE);
        let _ = registry.register("T1", sink()).unwrap();
        registry.unregister("T1");
        registry.prune_stale();
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn force_reset_closes_and_reports_existence() {
        let registry = DeviceRegistry::new(STALE);
        let link = sink();
        let _ = registry.register("T1", link.clone()).unwrap();

        assert!(registry.force_reset("T1"));
        assert_eq!(link.closes(), vec![CloseReason::AdminReset]);
        assert!(registry.snapshot().is_empty());
        assert!(!registry.force_reset("T1"));
    }

    #[test]
    fn close_all_drains_and_uses_the_shutdown_code() {
        let registry = DeviceRegistry::new(STALE);
        let a = sink();
        let b = sink();
        let _ = registry.register("A", a.clone()).unwrap();
        let _ = registry.register("B", b.clone()).unwrap();
        let _ = registry.register("C", sink()).unwrap();
        registry.unregister("C");

        registry.close_all();
        assert_eq!(a.closes(), vec![CloseReason::ShuttingDown]);
        assert_eq!(b.closes(), vec![CloseReason::ShuttingDown]);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn snapshot_reports_stale_seconds() {
        let registry = DeviceRegistry::new(STALE);
        let _ = registry.register("T1", sink()).unwrap();
        registry.backdate("T1", Duration::from_secs(42));

        let snapshot = registry.snapshot();
        assert!(snapshot[0].stale_seconds >= 42.0);
        assert!(snapshot[0].stale_seconds < 45.0);
    }

    #[tokio::test]
    async fn auto_prune_task_stops_on_cancel() {
        let registry = Arc::new(DeviceRegistry::new(STALE));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            Arc::clone(&registry).run_auto_prune(Duration::from_millis(10), cancel.clone()),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("prune task should stop promptly")
            .unwrap();
    }
}
