//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle used to render `/metrics`. Fails if another recorder
/// is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections accepted (counter).
pub const VIGIL_CONNECTIONS_TOTAL: &str = "vigil_connections_total";
/// WebSocket disconnections (counter).
pub const VIGIL_DISCONNECTIONS_TOTAL: &str = "vigil_disconnections_total";
/// Connections refused during the handshake (counter, labels: reason).
pub const VIGIL_HANDSHAKE_REJECTIONS_TOTAL: &str = "vigil_handshake_rejections_total";
/// Connected clients (gauge).
pub const VIGIL_CLIENTS_ACTIVE: &str = "vigil_clients_active";
/// Session length in seconds (histogram).
pub const VIGIL_SESSION_DURATION_SECONDS: &str = "vigil_session_duration_seconds";
/// Advertised server channels (gauge).
pub const VIGIL_CHANNELS_ACTIVE: &str = "vigil_channels_active";
/// Messages published on server channels (counter).
pub const VIGIL_MESSAGES_PUBLISHED_TOTAL: &str = "vigil_messages_published_total";
/// Data frames evicted from full client queues (counter).
pub const VIGIL_DATA_FRAMES_DROPPED_TOTAL: &str = "vigil_data_frames_dropped_total";
/// Clients disconnected for overflowing their control queue (counter).
pub const VIGIL_SLOW_CLIENT_DISCONNECTS_TOTAL: &str = "vigil_slow_client_disconnects_total";
/// Client control requests (counter, labels: op).
pub const VIGIL_REQUESTS_TOTAL: &str = "vigil_requests_total";
/// Client requests rejected (counter, labels: kind).
pub const VIGIL_REQUEST_ERRORS_TOTAL: &str = "vigil_request_errors_total";
/// Service calls completed (counter, labels: outcome).
pub const VIGIL_SERVICE_CALLS_TOTAL: &str = "vigil_service_calls_total";
/// Service handler latency in seconds (histogram).
pub const VIGIL_SERVICE_CALL_DURATION_SECONDS: &str = "vigil_service_call_duration_seconds";
/// Asset fetches completed (counter, labels: outcome).
pub const VIGIL_ASSET_FETCHES_TOTAL: &str = "vigil_asset_fetches_total";
/// Heartbeat timeouts (counter).
pub const VIGIL_HEARTBEAT_TIMEOUTS_TOTAL: &str = "vigil_heartbeat_timeouts_total";
/// Subscription events waiting for the listener (gauge).
pub const VIGIL_LISTENER_EVENTS_PENDING: &str = "vigil_listener_events_pending";
