//! `VigilServer`: Axum HTTP + WebSocket server and its control handle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use bytes::Bytes;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use vigil_core::{CapabilitySet, ChannelId, Parameter, Schema, SessionId, Status, VigilError};
use vigil_protocol::SUBPROTOCOL;

use crate::assets::AssetHandler;
use crate::broadcast::{PublishStats, RecordingSink};
use crate::channel::Channel;
use crate::config::ServerConfig;
use crate::connection_graph::ConnectionGraph;
use crate::health::HealthResponse;
use crate::listener::ServerListener;
use crate::notifier::{Notifier, spawn_notifier};
use crate::service::Service;
use crate::session::run_session;
use crate::state::ServerState;

/// Time allowed for the HTTP listener to wind down after sessions drained.
const SERVE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
struct AppState {
    server: Arc<ServerState>,
    metrics: Option<PrometheusHandle>,
}

/// Builder for a Vigil server. Everything is registered before [`start`](Self::start).
pub struct VigilServer {
    config: ServerConfig,
    listener: Option<Arc<dyn ServerListener>>,
    services: Vec<Service>,
    asset_handler: Option<Arc<dyn AssetHandler>>,
    sinks: Vec<Arc<dyn RecordingSink>>,
    metrics: Option<PrometheusHandle>,
}

impl VigilServer {
    /// Create a server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            listener: None,
            services: Vec::new(),
            asset_handler: None,
            sinks: Vec::new(),
            metrics: None,
        }
    }

    /// Set the application listener.
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn ServerListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Register services. Enables the `services` capability when non-empty.
    #[must_use]
    pub fn services(mut self, services: impl IntoIterator<Item = Service>) -> Self {
        self.services.extend(services);
        self
    }

    /// Set the asset handler. Enables the `assets` capability.
    #[must_use]
    pub fn asset_handler(mut self, handler: Arc<dyn AssetHandler>) -> Self {
        self.asset_handler = Some(handler);
        self
    }

    /// Add a recording sink.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn RecordingSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Serve `/metrics` from this Prometheus handle.
    #[must_use]
    pub fn metrics_handle(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Bind and start serving.
    pub async fn start(self) -> Result<ServerHandle, VigilError> {
        self.config.validate()?;

        let (events, notifier) = match &self.listener {
            Some(listener) => {
                let (events, notifier) = spawn_notifier(listener.clone());
                (Some(events), Some(notifier))
            }
            None => (None, None),
        };
        let bind_addr = self.config.bind_addr();
        let state = Arc::new(ServerState::new(
            self.config,
            self.services,
            self.listener,
            self.asset_handler,
            events,
        )?);
        for sink in self.sinks {
            state.broadcast.add_sink(sink);
        }

        let tcp = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| VigilError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let local_addr = tcp.local_addr().map_err(|source| VigilError::Bind {
            addr: bind_addr,
            source,
        })?;

        let app = router(state.clone(), self.metrics);
        let token = state.shutdown.root_token();
        let serve = tokio::spawn(async move {
            let result = axum::serve(tcp, app.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(error) = result {
                error!(%error, "server error");
            }
        });

        info!(
            %local_addr,
            name = %state.config.name,
            capabilities = ?state.capabilities().iter().map(|c| c.as_str()).collect::<Vec<_>>(),
            session_id = %state.session_id(),
            "vigil server listening"
        );

        Ok(ServerHandle {
            state,
            local_addr,
            serve,
            notifier,
        })
    }
}

/// Handle to a running server.
///
/// Dropping the handle does not stop the server; call [`stop`](Self::stop).
pub struct ServerHandle {
    state: Arc<ServerState>,
    local_addr: SocketAddr,
    serve: JoinHandle<()>,
    notifier: Option<Notifier>,
}

impl ServerHandle {
    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Effective capabilities, including those implied by registered services
    /// and asset handlers.
    pub fn capabilities(&self) -> CapabilitySet {
        self.state.capabilities()
    }

    /// Advertise a channel to every client.
    pub fn advertise_channel(
        &self,
        topic: &str,
        message_encoding: &str,
        schema: Option<Schema>,
    ) -> Result<Channel, VigilError> {
        let entry = self.state.advertise_channel(topic, message_encoding, schema)?;
        Ok(Channel::new(entry, &self.state.broadcast))
    }

    /// Withdraw a channel. Returns `false` if it was unknown.
    pub fn withdraw_channel(&self, channel_id: ChannelId) -> bool {
        self.state.withdraw_channel(channel_id)
    }

    /// Publish on a channel by id. Prefer [`Channel::log`] when a handle is at hand.
    pub fn publish(
        &self,
        channel_id: ChannelId,
        payload: impl Into<Bytes>,
        log_time: u64,
        publish_time: u64,
        sequence: Option<u32>,
    ) -> PublishStats {
        self.state
            .broadcast
            .publish(channel_id, payload.into(), log_time, publish_time, sequence)
    }

    /// Send a status message to every client.
    pub fn publish_status(&self, status: Status) {
        self.state.publish_status(status);
    }

    /// Retract status messages by id.
    pub fn remove_status(&self, status_ids: Vec<String>) {
        self.state.remove_status(status_ids);
    }

    /// Broadcast the server time in nanoseconds. Requires the `time` capability.
    pub fn broadcast_time(&self, timestamp: u64) -> Result<(), VigilError> {
        self.state.broadcast_time(timestamp)
    }

    /// Start a new session, generating an id unless one is given. Clients
    /// receive a fresh `serverInfo` and should discard cached state.
    pub fn clear_session(&self, new_id: Option<String>) -> SessionId {
        self.state.clear_session(new_id)
    }

    /// Current session id.
    pub fn session_id(&self) -> SessionId {
        self.state.session_id()
    }

    /// Push changed parameter values to subscribed clients. Returns the
    /// number of clients notified.
    pub fn publish_parameter_values(&self, parameters: Vec<Parameter>) -> usize {
        self.state.push_parameter_values(&parameters, None)
    }

    /// Replace the connection graph. Requires the `connectionGraph` capability.
    pub fn publish_connection_graph(&self, graph: ConnectionGraph) -> Result<(), VigilError> {
        self.state.publish_connection_graph(graph)
    }

    /// Attach a recording sink to a running server.
    pub fn add_sink(&self, sink: Arc<dyn RecordingSink>) {
        self.state.broadcast.add_sink(sink);
    }

    /// Connected clients.
    pub fn client_count(&self) -> usize {
        self.state.clients.len()
    }

    /// Advertised channels.
    pub fn channel_count(&self) -> usize {
        self.state.channels.len()
    }

    /// Stop the server: cancel every session, let them drain for the grace
    /// period, close the listener socket, then deliver any subscription
    /// events still queued for the [`ServerListener`].
    pub async fn stop(self) {
        info!("stopping vigil server");
        let grace = self.state.config.shutdown_grace();
        if !self.state.shutdown.drain(grace + SERVE_SHUTDOWN_TIMEOUT).await {
            warn!("sessions still running after the grace period");
        }

        let abort = self.serve.abort_handle();
        if tokio::time::timeout(SERVE_SHUTDOWN_TIMEOUT, self.serve).await.is_err() {
            abort.abort();
        }
        if let Some(notifier) = self.notifier {
            let _ = notifier.finish(SERVE_SHUTDOWN_TIMEOUT).await;
        }
        info!("vigil server stopped");
    }
}

/// Build the Axum router with all routes.
fn router(server: Arc<ServerState>, metrics: Option<PrometheusHandle>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { server, metrics })
}

/// Whether the request's `Sec-WebSocket-Protocol` list names our subprotocol.
fn offers_subprotocol(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|protocol| protocol.trim() == SUBPROTOCOL)
}

/// GET / with an upgrade: a client session.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(app): State<AppState>,
) -> Response {
    if app.server.shutdown.is_stopping() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let accepted = offers_subprotocol(&headers);
    let server = app.server.clone();
    let tracker = server.shutdown.sessions().clone();
    ws.protocols([SUBPROTOCOL])
        .max_message_size(server.config.max_message_size)
        .on_upgrade(move |socket| tracker.track_future(run_session(socket, server, addr, accepted)))
}

/// GET /health
async fn health_handler(State(app): State<AppState>) -> Json<HealthResponse> {
    let server = &app.server;
    Json(HealthResponse::snapshot(
        server.started_at,
        server.session_id().as_str(),
        server.health_counts(),
        server.shutdown.is_stopping(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(app): State<AppState>) -> Response {
    match &app.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
