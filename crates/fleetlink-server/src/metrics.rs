//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at server startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// Device registrations total (counter).
pub const DEVICE_CONNECTIONS_TOTAL: &str = "device_connections_total";
/// Device disconnections total (counter).
pub const DEVICE_DISCONNECTIONS_TOTAL: &str = "device_disconnections_total";
/// Stale device records pruned total (counter).
pub const DEVICES_PRUNED_TOTAL: &str = "devices_pruned_total";
/// Commands forwarded to a device socket total (counter).
pub const COMMANDS_FORWARDED_TOTAL: &str = "commands_forwarded_total";
/// Commands that found no connected device total (counter).
pub const COMMANDS_UNROUTABLE_TOTAL: &str = "commands_unroutable_total";
/// Commands accepted into the command stream total (counter).
pub const COMMANDS_ENQUEUED_TOTAL: &str = "commands_enqueued_total";
/// Inbound device frames total (counter).
pub const TELEMETRY_FRAMES_TOTAL: &str = "telemetry_frames_total";
/// Status messages broadcast to observers total (counter).
pub const STATUS_BROADCASTS_TOTAL: &str = "status_broadcasts_total";
/// Fan-out sends dropped on a full observer queue total (counter).
pub const FANOUT_DROPS_TOTAL: &str = "fanout_drops_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_render() {
        // Build a recorder + handle (no global install to avoid test conflicts).
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            DEVICE_CONNECTIONS_TOTAL,
            DEVICE_DISCONNECTIONS_TOTAL,
            DEVICES_PRUNED_TOTAL,
            COMMANDS_FORWARDED_TOTAL,
            COMMANDS_UNROUTABLE_TOTAL,
            COMMANDS_ENQUEUED_TOTAL,
            TELEMETRY_FRAMES_TOTAL,
            STATUS_BROADCASTS_TOTAL,
            FANOUT_DROPS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
