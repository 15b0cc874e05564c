//! State shared by the HTTP handlers, every session and the server handle.

use std::sync::Arc;
use std::time::Instant;

use metrics::gauge;
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use vigil_core::{
    Capability, CapabilitySet, ChannelId, ClientId, Parameter, Schema, SessionId, Status,
    VigilError,
};
use vigil_protocol::{AdvertisedChannel, ServerBinaryMessage, ServerMessage, WireParameter};

use crate::assets::{AssetHandler, AssetResolver};
use crate::broadcast::BroadcastEngine;
use crate::client::{ClientRegistry, OutboundFrame};
use crate::config::ServerConfig;
use crate::connection_graph::{ConnectionGraph, GraphTracker};
use crate::dispatcher::ServiceDispatcher;
use crate::health::HealthCounts;
use crate::listener::ServerListener;
use crate::metrics::VIGIL_CHANNELS_ACTIVE;
use crate::notifier::{EventSender, ListenerEvent};
use crate::parameters::ParameterBridge;
use crate::registry::{ChannelEntry, ChannelRegistry};
use crate::service::Service;
use crate::shutdown::SessionSupervisor;

/// Everything a running server owns.
pub(crate) struct ServerState {
    pub(crate) config: ServerConfig,
    capabilities: CapabilitySet,
    pub(crate) channels: Arc<ChannelRegistry>,
    pub(crate) clients: Arc<ClientRegistry>,
    pub(crate) broadcast: Arc<BroadcastEngine>,
    pub(crate) parameters: ParameterBridge,
    pub(crate) services: ServiceDispatcher,
    pub(crate) assets: Option<AssetResolver>,
    pub(crate) graph: GraphTracker,
    pub(crate) listener: Option<Arc<dyn ServerListener>>,
    events: Option<EventSender>,
    session_id: RwLock<SessionId>,
    pub(crate) shutdown: SessionSupervisor,
    pub(crate) started_at: Instant,
}

impl ServerState {
    /// Assemble the state. Registering services or an asset handler enables
    /// the matching capability.
    pub(crate) fn new(
        config: ServerConfig,
        services: Vec<Service>,
        listener: Option<Arc<dyn ServerListener>>,
        asset_handler: Option<Arc<dyn AssetHandler>>,
        events: Option<EventSender>,
    ) -> Result<Self, VigilError> {
        config.validate()?;
        let mut capabilities = config.capabilities;
        if !services.is_empty() {
            capabilities.insert(Capability::Services);
        }
        if asset_handler.is_some() {
            capabilities.insert(Capability::Assets);
        }

        let channels = Arc::new(ChannelRegistry::new());
        let clients = Arc::new(ClientRegistry::new());
        let broadcast = Arc::new(BroadcastEngine::new(channels.clone(), clients.clone()));
        let services = ServiceDispatcher::new(services, config.supported_encodings.clone())?;
        let assets = asset_handler
            .map(|handler| AssetResolver::new(handler, config.max_concurrent_asset_fetches));
        let session_id = config
            .session_id
            .clone()
            .map_or_else(SessionId::new, SessionId::from_raw);

        Ok(Self {
            capabilities,
            channels,
            clients,
            broadcast,
            parameters: ParameterBridge::new(listener.clone()),
            services,
            assets,
            graph: GraphTracker::default(),
            listener,
            events,
            session_id: RwLock::new(session_id),
            shutdown: SessionSupervisor::new(),
            started_at: Instant::now(),
            config,
        })
    }

    /// Effective capabilities.
    pub(crate) fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    /// Fail with `Capability` unless `capability` is enabled.
    pub(crate) fn require(&self, capability: Capability) -> Result<(), VigilError> {
        if self.capabilities.contains(capability) {
            Ok(())
        } else {
            Err(VigilError::Capability(capability))
        }
    }

    /// Current session id.
    pub(crate) fn session_id(&self) -> SessionId {
        self.session_id.read().clone()
    }

    /// Report a subscription change to the listener.
    pub(crate) fn emit(&self, event: ListenerEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    /// The `serverInfo` message for the current session.
    pub(crate) fn server_info(&self) -> ServerMessage {
        ServerMessage::ServerInfo {
            name: self.config.name.clone(),
            capabilities: self.capabilities,
            supported_encodings: self.config.supported_encodings.clone(),
            metadata: self.config.metadata.clone(),
            session_id: self.session_id().to_string(),
        }
    }

    /// Counters for `/health`.
    pub(crate) fn health_counts(&self) -> HealthCounts {
        HealthCounts {
            clients: self.clients.len(),
            channels: self.channels.len(),
            services: self.services.len(),
        }
    }

    // ── channels ────────────────────────────────────────────────────────

    /// Register a channel and advertise it to every active client.
    pub(crate) fn advertise_channel(
        &self,
        topic: &str,
        message_encoding: &str,
        schema: Option<Schema>,
    ) -> Result<Arc<ChannelEntry>, VigilError> {
        let _announce = self.channels.lock_announcements();
        let entry = self.channels.advertise(topic, message_encoding, schema)?;
        gauge!(VIGIL_CHANNELS_ACTIVE).increment(1.0);
        self.broadcast.channel_added(entry.info());
        let _ = self.broadcast.broadcast_message(&ServerMessage::Advertise {
            channels: vec![AdvertisedChannel::from(entry.info())],
        });
        info!(channel_id = %entry.id(), topic, "channel advertised");
        Ok(entry)
    }

    /// Withdraw a channel, unsubscribing everyone. Returns `false` if unknown.
    pub(crate) fn withdraw_channel(&self, channel_id: ChannelId) -> bool {
        let _announce = self.channels.lock_announcements();
        let Some(withdrawn) = self.channels.withdraw(channel_id) else {
            return false;
        };
        gauge!(VIGIL_CHANNELS_ACTIVE).decrement(1.0);
        for (client_id, _) in &withdrawn.subscribers {
            if let Some(client) = self.clients.get(*client_id) {
                let _ = client.forget_channel(channel_id);
            }
            self.emit(ListenerEvent::Unsubscribed {
                client: *client_id,
                channel: withdrawn.info.clone(),
            });
        }
        self.broadcast.channel_removed(&withdrawn.info);
        let _ = self.broadcast.broadcast_message(&ServerMessage::Unadvertise {
            channel_ids: vec![channel_id],
        });
        info!(
            channel_id = %channel_id,
            topic = %withdrawn.info.topic,
            subscribers = withdrawn.subscribers.len(),
            "channel withdrawn"
        );
        true
    }

    // ── broadcasts ──────────────────────────────────────────────────────

    /// Send a status message to every client.
    pub(crate) fn publish_status(&self, status: Status) {
        let _ = self.broadcast.broadcast_message(&ServerMessage::Status(status));
    }

    /// Retract status messages by id.
    pub(crate) fn remove_status(&self, status_ids: Vec<String>) {
        let _ = self.broadcast.broadcast_message(&ServerMessage::RemoveStatus { status_ids });
    }

    /// Broadcast the server clock.
    pub(crate) fn broadcast_time(&self, timestamp: u64) -> Result<(), VigilError> {
        self.require(Capability::Time)?;
        let frame = ServerBinaryMessage::Time { timestamp }.encode();
        let _ = self.broadcast.broadcast_data(&frame);
        Ok(())
    }

    /// Switch to a new session id and re-send `serverInfo`.
    pub(crate) fn clear_session(&self, new_id: Option<String>) -> SessionId {
        let session_id = new_id.map_or_else(SessionId::new, SessionId::from_raw);
        *self.session_id.write() = session_id.clone();
        let recipients = self.broadcast.broadcast_message(&self.server_info());
        info!(session_id = %session_id, recipients, "session cleared");
        session_id
    }

    // ── parameters ──────────────────────────────────────────────────────

    /// Push parameter values to clients subscribed to them, skipping `exclude`.
    /// Each client only receives the names it asked for.
    pub(crate) fn push_parameter_values(
        &self,
        parameters: &[Parameter],
        exclude: Option<ClientId>,
    ) -> usize {
        if parameters.is_empty() {
            return 0;
        }
        let mut recipients = 0;
        for client in self.clients.active() {
            if Some(client.id()) == exclude {
                continue;
            }
            let relevant: Vec<WireParameter> = parameters
                .iter()
                .filter(|p| client.is_interested_in(&p.name))
                .map(WireParameter::from)
                .collect();
            if relevant.is_empty() {
                continue;
            }
            if client.send_message(&ServerMessage::ParameterValues {
                parameters: relevant,
                id: None,
            }) {
                recipients += 1;
            }
        }
        debug!(count = parameters.len(), recipients, "pushed parameter values");
        recipients
    }

    // ── connection graph ────────────────────────────────────────────────

    /// Replace the connection graph and send the diff to subscribers.
    pub(crate) fn publish_connection_graph(&self, graph: ConnectionGraph) -> Result<(), VigilError> {
        self.require(Capability::ConnectionGraph)?;
        let update = self.graph.replace(graph);
        if update.is_empty() {
            return Ok(());
        }
        let message = ServerMessage::ConnectionGraphUpdate(update);
        let json: Arc<str> = match message.to_json() {
            Ok(json) => json.into(),
            Err(error) => {
                warn!(%error, "failed to serialize connection graph update");
                return Ok(());
            }
        };
        for client in self.clients.active() {
            if client.is_graph_subscribed() {
                let _ = client.send_control(OutboundFrame::Text(json.clone()));
            }
        }
        Ok(())
    }
}
