//! Injectable process state.
//!
//! Constructed once by the composition root and cloned into every handler
//! and background task. No globals: each registry carries its own lock and
//! its lifetime is the process's.

use std::sync::Arc;

use fleetlink_settings::FleetSettings;
use fleetlink_store::StreamStore;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::fanout::SubscriberFanout;
use crate::registry::DeviceRegistry;

/// Shared state handed to HTTP handlers, WebSocket channels, and tasks.
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub settings: Arc<FleetSettings>,
    /// Shared log store.
    pub store: Arc<dyn StreamStore>,
    /// Device presence registry.
    pub registry: Arc<DeviceRegistry>,
    /// UI observer fan-out.
    pub fanout: Arc<SubscriberFanout>,
    /// Handle for rendering `/metrics`.
    pub metrics: PrometheusHandle,
}

impl AppState {
    /// Assemble the shared state.
    pub fn new(
        settings: Arc<FleetSettings>,
        store: Arc<dyn StreamStore>,
        registry: Arc<DeviceRegistry>,
        fanout: Arc<SubscriberFanout>,
        metrics: PrometheusHandle,
    ) -> Self {
        Self {
            settings,
            store,
            registry,
            fanout,
            metrics,
        }
    }
}
