//! Stream consumer adapters.
//!
//! The generic consumer loop knows nothing about devices or observers;
//! these two [`EntryApply`] implementations connect it to the registry
//! (command stream, acknowledging) and the fan-out (status stream,
//! read-only).

use std::sync::Arc;

use async_trait::async_trait;
use fleetlink_core::command::StreamCommand;
use fleetlink_core::time::{iso8601, utc_now};
use fleetlink_store::{ApplyOutcome, EntryApply, StreamEntry};
use metrics::counter;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::fanout::SubscriberFanout;
use crate::metrics::STATUS_BROADCASTS_TOTAL;
use crate::registry::{DeviceRegistry, RegistryError};

/// Command-stream apply: validate, strip the device ID, forward the body.
pub struct ForwardApply {
    registry: Arc<DeviceRegistry>,
}

impl ForwardApply {
    /// Apply that forwards through `registry`.
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl EntryApply for ForwardApply {
    async fn apply(&self, entry: &StreamEntry) -> ApplyOutcome {
        let command = match StreamCommand::from_fields(&entry.fields) {
            Ok(command) => command,
            Err(err) => {
                warn!(id = %entry.id, error = %err, "dropping invalid command entry");
                return ApplyOutcome::Invalid;
            }
        };
        let body = Value::Object(command.payload.to_object());
        match self.registry.forward(&command.device_id, &body) {
            Ok(()) => {
                debug!(device_id = %command.device_id, id = %entry.id, "command dispatched");
                ApplyOutcome::Delivered
            }
            Err(RegistryError::NotConnected(_)) => {
                warn!(device_id = %command.device_id, id = %entry.id,
                    "device unavailable, leaving command for redelivery");
                ApplyOutcome::Unavailable
            }
            Err(err) => {
                error!(device_id = %command.device_id, id = %entry.id, error = %err,
                    "command forward failed");
                ApplyOutcome::Failed
            }
        }
    }
}

/// Status-stream apply: decode, cache, and fan out to observers.
pub struct BroadcastApply {
    fanout: Arc<SubscriberFanout>,
}

impl BroadcastApply {
    /// Apply that broadcasts through `fanout`.
    pub fn new(fanout: Arc<SubscriberFanout>) -> Self {
        Self { fanout }
    }
}

#[async_trait]
impl EntryApply for BroadcastApply {
    async fn apply(&self, entry: &StreamEntry) -> ApplyOutcome {
        let Some(device_id) = entry.field("deviceId").filter(|id| !id.trim().is_empty()) else {
            warn!(id = %entry.id, "dropping status entry without a deviceId");
            return ApplyOutcome::Invalid;
        };
        let payload = match entry.field("payload") {
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|_| json!({ "raw": raw })),
            None => json!({}),
        };
        let received_at = entry
            .field("receivedAt")
            .map_or_else(|| iso8601(utc_now()), str::to_string);
        let message = json!({
            "type": "telemetry",
            "deviceId": device_id,
            "payload": payload,
            "receivedAt": received_at,
            "id": entry.id,
        });
        self.fanout.broadcast(device_id, &message);
        counter!(STATUS_BROADCASTS_TOTAL).increment(1);
        ApplyOutcome::Delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{FrameSink, SinkError};
    use fleetlink_core::close::CloseReason;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Default)]
    struct CollectingSink {
        frames: Mutex<Vec<String>>,
    }

    impl FrameSink for CollectingSink {
        fn send_text(&self, text: &str) -> Result<(), SinkError> {
            self.frames.lock().push(text.to_string());
            Ok(())
        }

        fn close(&self, _reason: CloseReason) -> Result<(), SinkError> {
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    fn entry(id: &str, pairs: &[(&str, &str)]) -> StreamEntry {
        let fields: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        StreamEntry {
            id: id.to_string(),
            fields,
        }
    }

    #[tokio::test]
    async fn forward_apply_delivers_to_a_connected_device() {
        let registry = Arc::new(DeviceRegistry::new(Duration::from_secs(600)));
        let sink = Arc::new(CollectingSink::default());
        let _ = registry.register("T1", sink.clone()).unwrap();

        let apply = ForwardApply::new(Arc::clone(&registry));
        let outcome = apply
            .apply(&entry(
                "1-0",
                &[("deviceId", "T1"), ("command", "stop"), ("sequence", "4")],
            ))
            .await;

        assert_eq!(outcome, ApplyOutcome::Delivered);
        let frames = sink.frames.lock().clone();
        let sent: Value = serde_json::from_str(frames.last().unwrap()).unwrap();
        assert_eq!(sent["command"], "stop");
        assert_eq!(sent["sequence"], 4);
        // The routing field never reaches the device.
        assert!(sent.get("deviceId").is_none());
    }

    #[tokio::test]
    async fn forward_apply_reports_offline_targets_as_unavailable() {
        let registry = Arc::new(DeviceRegistry::new(Duration::from_secs(600)));
        let apply = ForwardApply::new(registry);
        let outcome = apply
            .apply(&entry("1-0", &[("deviceId", "T1"), ("command", "stop")]))
            .await;
        assert_eq!(outcome, ApplyOutcome::Unavailable);
    }

    #[tokio::test]
    async fn forward_apply_rejects_invalid_entries() {
        let registry = Arc::new(DeviceRegistry::new(Duration::from_secs(600)));
        let apply = ForwardApply::new(registry);

        let missing_device = apply
            .apply(&entry("1-0", &[("command", "stop")]))
            .await;
        assert_eq!(missing_device, ApplyOutcome::Invalid);

        let bad_command = apply
            .apply(&entry("2-0", &[("deviceId", "T1"), ("command", "fly")]))
            .await;
        assert_eq!(bad_command, ApplyOutcome::Invalid);
    }

    #[tokio::test]
    async fn broadcast_apply_caches_and_fans_out() {
        let fanout = Arc::new(SubscriberFanout::new());
        let sink = Arc::new(CollectingSink::default());
        fanout.subscribe("T1", Uuid::now_v7(), sink.clone());

        let apply = BroadcastApply::new(Arc::clone(&fanout));
        let outcome = apply
            .apply(&entry(
                "7-0",
                &[
                    ("deviceId", "T1"),
                    ("payload", r#"{"speed":3,"type":"telemetry"}"#),
                    ("receivedAt", "2026-08-07T12:00:00.000Z"),
                ],
            ))
            .await;

        assert_eq!(outcome, ApplyOutcome::Delivered);
        let frames = sink.frames.lock().clone();
        let message: Value = serde_json::from_str(frames.last().unwrap()).unwrap();
        assert_eq!(message["type"], "telemetry");
        assert_eq!(message["deviceId"], "T1");
        assert_eq!(message["payload"]["speed"], 3);
        assert_eq!(message["id"], "7-0");

        let cached = fanout.latest("T1").unwrap();
        assert_eq!(cached["payload"]["speed"], 3);
    }

    #[tokio::test]
    async fn broadcast_apply_wraps_unparseable_payloads() {
        let fanout = Arc::new(SubscriberFanout::new());
        let apply = BroadcastApply::new(Arc::clone(&fanout));
        let outcome = apply
            .apply(&entry(
                "8-0",
                &[("deviceId", "T1"), ("payload", "not json")],
            ))
            .await;

        assert_eq!(outcome, ApplyOutcome::Delivered);
        let cached = fanout.latest("T1").unwrap();
        assert_eq!(cached["payload"]["raw"], "not json");
    }

    #[tokio::test]
    async fn broadcast_apply_rejects_entries_without_device_id() {
        let fanout = Arc::new(SubscriberFanout::new());
        let apply = BroadcastApply::new(fanout);
        let outcome = apply.apply(&entry("9-0", &[("payload", "{}")])).await;
        assert_eq!(outcome, ApplyOutcome::Invalid);
    }
}
