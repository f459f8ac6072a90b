//! Read-only device views emitted by the registry snapshot.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// One device's presence and telemetry summary.
///
/// Serialized as camelCase JSON for the status page; `last_payload` is
/// `null` until the device has sent telemetry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    /// Stable device key.
    pub device_id: String,
    /// Whether a live socket is currently attached.
    pub connected: bool,
    /// When the current (or last) registration completed.
    pub connected_at: DateTime<Utc>,
    /// Last inbound frame or keep-alive.
    pub last_seen: DateTime<Utc>,
    /// Delivery attempts relayed to this device. Never reset.
    pub commands_sent: u64,
    /// Most recent parsed telemetry object, retained across reconnects.
    pub last_payload: Option<Map<String, Value>>,
    /// Seconds since `last_seen`.
    pub stale_seconds: f64,
}
