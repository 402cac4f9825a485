//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` endpoint.
/// Must be called once at startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// WebSocket sessions accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "parley_ws_connections_total";
/// Live registered connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "parley_ws_connections_active";
/// Session lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "parley_ws_connection_duration_seconds";
/// Connections evicted for a full or closed queue (counter).
pub const EVICTIONS_TOTAL: &str = "parley_evictions_total";
/// Inbound frames (counter, labels: type).
pub const FRAMES_IN_TOTAL: &str = "parley_frames_in_total";
/// Error frames sent (counter, labels: code).
pub const FRAMES_ERROR_TOTAL: &str = "parley_frames_error_total";
/// Messages received from the pub/sub transport (counter).
pub const BRIDGE_MESSAGES_TOTAL: &str = "parley_bridge_messages_total";
/// Group fan-outs abandoned because membership was unavailable (counter).
pub const GROUP_FANOUT_FAILURES_TOTAL: &str = "parley_group_fanout_failures_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_names_are_prefixed_snake_case() {
        for name in [
            WS_CONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTION_DURATION_SECONDS,
            EVICTIONS_TOTAL,
            FRAMES_IN_TOTAL,
            FRAMES_ERROR_TOTAL,
            BRIDGE_MESSAGES_TOTAL,
            GROUP_FANOUT_FAILURES_TOTAL,
        ] {
            assert!(name.starts_with("parley_"), "{name}");
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
