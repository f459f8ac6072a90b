//! The device channel.
//!
//! One connection per device. After the registry accepts the link, the
//! read loop waits for inbound text frames, probing a quiet peer with a
//! ping after the configured inactivity window. Every frame refreshes the
//! device's presence; parsed telemetry is also appended to the status
//! stream for the fan-out side of the relay.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use fleetlink_core::frame::parse_device_frame;
use fleetlink_core::time::{iso8601, utc_now};
use futures::StreamExt;
use metrics::counter;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{run_writer, OUTBOUND_BUFFER};
use crate::link::{ChannelSink, FrameSink};
use crate::metrics::TELEMETRY_FRAMES_TOTAL;
use crate::state::AppState;

/// `GET /ws/device/{device_id}`: upgrade and run the device channel.
pub async fn device_channel(
    ws: WebSocketUpgrade,
    Path(device_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_device(socket, device_id, state))
}

async fn handle_device(socket: WebSocket, device_id: String, state: AppState) {
    let (sink_half, mut frames) = socket.split();
    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let writer = tokio::spawn(run_writer(sink_half, rx));
    let link: Arc<dyn FrameSink> = Arc::new(ChannelSink::new(tx));

    if let Err(err) = state.registry.register(&device_id, Arc::clone(&link)) {
        warn!(device_id = %device_id, error = %err, "device registration failed");
        drop(link);
        let _ = writer.await;
        return;
    }
    info!(device_id = %device_id, "device connected");

    let read_timeout = state.settings.server.read_timeout;
    loop {
        match tokio::time::timeout(read_timeout, frames.next()).await {
            Err(_) => {
                // Quiet peer: probe instead of failing the connection.
                debug!(device_id = %device_id, "read timeout, sending ping");
                let ping = json!({
                    "type": "ping",
                    "timestamp": iso8601(utc_now()),
                });
                if link.send_text(&ping.to_string()).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                debug!(device_id = %device_id, error = %err, "device socket error");
                break;
            }
            Ok(Some(Ok(Message::Text(text)))) => {
                handle_frame(&state, &device_id, text.as_str()).await;
            }
            Ok(Some(Ok(Message::Close(_)))) => break,
            Ok(Some(Ok(_))) => {}
        }
    }

    state.registry.unregister_if_current(&device_id, &link);
    info!(device_id = %device_id, "device disconnected");
    drop(link);
    let _ = writer.await;
}

/// Record one inbound frame: refresh presence, then append parsed
/// telemetry to the status stream.
async fn handle_frame(state: &AppState, device_id: &str, text: &str) {
    counter!(TELEMETRY_FRAMES_TOTAL).increment(1);
    let payload = parse_device_frame(text);
    state.registry.update_last_seen(device_id, payload.clone());
    let Some(payload) = payload else {
        return;
    };

    let fields = vec![
        ("deviceId".to_string(), device_id.to_string()),
        ("payload".to_string(), Value::Object(payload).to_string()),
        ("receivedAt".to_string(), iso8601(utc_now())),
    ];
    let stream = &state.settings.store.status_stream;
    let maxlen = Some(state.settings.store.status_maxlen);
    match state.store.append(stream, &fields, maxlen).await {
        Ok(_) => {}
        Err(err) if err.is_connection() => {
            warn!(device_id = %device_id, error = %err,
                "store connection lost while appending telemetry, resetting");
            if let Err(reset_err) = state.store.reset().await {
                warn!(error = %reset_err, "store reset failed");
            }
        }
        Err(err) => {
            warn!(device_id = %device_id, error = %err, "failed to append telemetry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::SubscriberFanout;
    use crate::registry::DeviceRegistry;
    use fleetlink_settings::FleetSettings;
    use fleetlink_store::MemoryStreamStore;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::Map;

    fn test_state() -> (AppState, MemoryStreamStore) {
        let store = MemoryStreamStore::new();
        let settings = Arc::new(FleetSettings::default());
        let registry = Arc::new(DeviceRegistry::new(settings.registry.stale_timeout));
        let fanout = Arc::new(SubscriberFanout::new());
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let state = AppState::new(
            settings,
            Arc::new(store.clone()),
            registry,
            fanout,
            handle,
        );
        (state, store)
    }

    fn register_stub(state: &AppState, device_id: &str) {
        let (tx, _rx) = mpsc::channel(8);
        let link: Arc<dyn FrameSink> = Arc::new(ChannelSink::new(tx));
        let _ = state.registry.register(device_id, link).unwrap();
    }

    #[tokio::test]
    async fn json_frame_updates_presence_and_appends_telemetry() {
        let (state, store) = test_state();
        register_stub(&state, "T1");

        handle_frame(&state, "T1", r#"{"speed":3}"#).await;

        let snapshot = state.registry.snapshot();
        let expected: Map<String, Value> =
            serde_json::from_str(r#"{"speed":3,"type":"telemetry"}"#).unwrap();
        assert_eq!(snapshot[0].last_payload, Some(expected));

        let entries = store.entries(&state.settings.store.status_stream);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].field("deviceId"), Some("T1"));
        let stored: Value =
            serde_json::from_str(entries[0].field("payload").unwrap()).unwrap();
        assert_eq!(stored["speed"], 3);
        assert_eq!(stored["type"], "telemetry");
    }

    #[tokio::test]
    async fn raw_text_frame_is_wrapped_before_caching() {
        let (state, store) = test_state();
        register_stub(&state, "T1");

        handle_frame(&state, "T1", "BATT 87%").await;

        let snapshot = state.registry.snapshot();
        let payload = snapshot[0].last_payload.clone().unwrap();
        assert_eq!(payload.get("type"), Some(&Value::from("telemetry")));
        assert_eq!(payload.get("raw"), Some(&Value::from("BATT 87%")));
        assert_eq!(store.len(&state.settings.store.status_stream), 1);
    }

    #[tokio::test]
    async fn scalar_frame_refreshes_presence_without_payload() {
        let (state, store) = test_state();
        register_stub(&state, "T1");
        handle_frame(&state, "T1", r#"{"speed":3}"#).await;

        handle_frame(&state, "T1", "42").await;

        let snapshot = state.registry.snapshot();
        let payload = snapshot[0].last_payload.clone().unwrap();
        // The keep-alive did not clobber the cached telemetry.
        assert_eq!(payload.get("speed"), Some(&Value::from(3)));
        assert_eq!(store.len(&state.settings.store.status_stream), 1);
    }
}
