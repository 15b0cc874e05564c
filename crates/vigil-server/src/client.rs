//! Per-client connection state.
//!
//! A [`Client`] owns two outbound queues drained by its writer task: the
//! data queue carries message frames and evicts the oldest frame when full;
//! the control queue carries replies and advertisements and disconnects the
//! client when full, since dropping control traffic would desync it.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vigil_core::ids::IdSequence;
use vigil_core::{CallId, ChannelId, ClientChannelId, ClientId, SubscriptionId, VigilError};
use vigil_protocol::{ServerBinaryMessage, ServerMessage};

use crate::metrics::{VIGIL_DATA_FRAMES_DROPPED_TOTAL, VIGIL_SLOW_CLIENT_DISCONNECTS_TOTAL};
use crate::queue::{BoundedQueue, PushError, PushOutcome};

/// A frame waiting in one of a client's outbound queues.
#[derive(Clone, Debug)]
pub enum OutboundFrame {
    /// A serialized JSON control message, shared between recipients.
    Text(Arc<str>),
    /// A pre-encoded binary frame.
    Binary(Bytes),
    /// Message data, encoded by the writer so publishers only pay for a clone.
    Message {
        /// Recipient's subscription id.
        subscription_id: SubscriptionId,
        /// Log time in nanoseconds.
        log_time: u64,
        /// Publish time in nanoseconds.
        publish_time: u64,
        /// Per-channel sequence number.
        sequence: u32,
        /// Message bytes.
        payload: Bytes,
    },
}

impl OutboundFrame {
    /// Encode to WebSocket payload bytes. Text frames return `Err` with the text.
    pub fn into_binary(self) -> Result<Bytes, Arc<str>> {
        match self {
            Self::Text(text) => Err(text),
            Self::Binary(bytes) => Ok(bytes),
            Self::Message {
                subscription_id,
                log_time,
                publish_time,
                sequence,
                payload,
            } => Ok(ServerBinaryMessage::MessageData {
                subscription_id,
                log_time,
                publish_time,
                sequence,
                payload,
            }
            .encode()),
        }
    }
}

/// Lifecycle of a client session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    /// Upgrade accepted, nothing sent yet.
    Connecting = 0,
    /// Sending `serverInfo` and the initial advertisements.
    Negotiating = 1,
    /// Handshake complete; requests and broadcasts flow.
    Active = 2,
    /// Teardown in progress.
    Closing = 3,
    /// All resources released.
    Closed = 4,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Negotiating,
            2 => Self::Active,
            3 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// A channel advertised by a client for client publishing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientChannel {
    /// Client-chosen id, unique per client.
    pub id: ClientChannelId,
    /// Topic name.
    pub topic: String,
    /// Message encoding.
    pub encoding: String,
    /// Schema name.
    pub schema_name: String,
    /// Schema definition, if the client sent one.
    pub schema: Option<String>,
    /// Schema encoding, if the client sent one.
    pub schema_encoding: Option<String>,
}

#[derive(Default)]
struct Subscriptions {
    by_id: HashMap<SubscriptionId, ChannelId>,
    by_channel: HashMap<ChannelId, SubscriptionId>,
    retired: HashSet<SubscriptionId>,
}

/// A connected client.
pub struct Client {
    id: ClientId,
    addr: SocketAddr,
    state: AtomicU8,
    cancel: CancellationToken,
    data: BoundedQueue<OutboundFrame>,
    control: BoundedQueue<OutboundFrame>,
    subscriptions: Mutex<Subscriptions>,
    channels: Mutex<HashMap<ClientChannelId, Arc<ClientChannel>>>,
    parameter_interest: Mutex<HashSet<String>>,
    calls: Mutex<HashSet<CallId>>,
    graph_subscribed: AtomicBool,
    /// When this connection was established.
    pub connected_at: Instant,
    is_alive: AtomicBool,
    dropped_frames: AtomicU64,
}

impl Client {
    /// Create a client with the given queue capacities.
    pub fn new(
        id: ClientId,
        addr: SocketAddr,
        message_backlog: usize,
        control_backlog: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            addr,
            state: AtomicU8::new(SessionState::Connecting as u8),
            cancel,
            data: BoundedQueue::new(message_backlog),
            control: BoundedQueue::new(control_backlog),
            subscriptions: Mutex::new(Subscriptions::default()),
            channels: Mutex::new(HashMap::new()),
            parameter_interest: Mutex::new(HashSet::new()),
            calls: Mutex::new(HashSet::new()),
            graph_subscribed: AtomicBool::new(false),
            connected_at: Instant::now(),
            is_alive: AtomicBool::new(true),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Server-assigned id.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Peer address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Advance the lifecycle. States only move forward; returns `false` if
    /// the client is already at or past `next`.
    pub fn advance(&self, next: SessionState) -> bool {
        let next = next as u8;
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= next {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Whether broadcasts and replies should be delivered.
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active && !self.cancel.is_cancelled()
    }

    /// Token cancelled when this client must disconnect.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Ask the session to disconnect this client.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    /// Whether a disconnect was requested.
    pub fn is_disconnecting(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // ── outbound ────────────────────────────────────────────────────────

    /// Queue a message data frame, evicting the oldest one if the queue is full.
    pub fn send_data(&self, frame: OutboundFrame) -> PushOutcome {
        let outcome = self.data.push_drop_oldest(frame);
        if outcome == PushOutcome::DroppedOldest {
            let dropped = self.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
            counter!(VIGIL_DATA_FRAMES_DROPPED_TOTAL).increment(1);
            if dropped.is_power_of_two() {
                debug!(client_id = %self.id, dropped, "data queue full, dropping oldest frames");
            }
        }
        outcome
    }

    /// Queue a control frame. A full control queue disconnects the client.
    pub fn send_control(&self, frame: OutboundFrame) -> bool {
        match self.control.try_push(frame) {
            Ok(()) => true,
            Err(PushError::Closed) => false,
            Err(PushError::Full) => {
                warn!(
                    client_id = %self.id,
                    backlog = self.control.capacity(),
                    "control queue full, disconnecting slow client"
                );
                counter!(VIGIL_SLOW_CLIENT_DISCONNECTS_TOTAL).increment(1);
                self.disconnect();
                false
            }
        }
    }

    /// Serialize and queue a control message.
    pub fn send_message(&self, message: &ServerMessage) -> bool {
        match message.to_json() {
            Ok(json) => self.send_control(OutboundFrame::Text(json.into())),
            Err(error) => {
                warn!(client_id = %self.id, op = message.op(), %error, "failed to serialize message");
                false
            }
        }
    }

    /// Encode and queue a binary control frame.
    pub fn send_binary(&self, message: &ServerBinaryMessage) -> bool {
        self.send_control(OutboundFrame::Binary(message.encode()))
    }

    /// Control queue, drained by the writer.
    pub(crate) fn control_queue(&self) -> &BoundedQueue<OutboundFrame> {
        &self.control
    }

    /// Data queue, drained by the writer.
    pub(crate) fn data_queue(&self) -> &BoundedQueue<OutboundFrame> {
        &self.data
    }

    /// Pop whatever is left, control frames first. Used while draining.
    pub(crate) fn next_pending(&self) -> Option<OutboundFrame> {
        self.control.try_pop().or_else(|| self.data.try_pop())
    }

    /// Stop accepting outbound frames. Queued frames can still be drained.
    pub(crate) fn close_queues(&self) {
        self.control.close();
        self.data.close();
    }

    /// Data frames evicted so far.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    // ── subscriptions ───────────────────────────────────────────────────

    /// Record a subscription. Ids are never reused within a session, and a
    /// channel can only be subscribed once per client.
    pub fn add_subscription(
        &self,
        id: SubscriptionId,
        channel_id: ChannelId,
    ) -> Result<(), VigilError> {
        let mut subs = self.subscriptions.lock();
        if subs.by_id.contains_key(&id) {
            return Err(VigilError::DuplicateSubscription { id, reason: "id in use" });
        }
        if subs.retired.contains(&id) {
            return Err(VigilError::DuplicateSubscription { id, reason: "id was already used" });
        }
        if subs.by_channel.contains_key(&channel_id) {
            return Err(VigilError::DuplicateSubscription {
                id,
                reason: "channel already subscribed",
            });
        }
        let _ = subs.by_id.insert(id, channel_id);
        let _ = subs.by_channel.insert(channel_id, id);
        Ok(())
    }

    /// Drop a subscription, retiring its id. Returns the channel it pointed at.
    pub fn remove_subscription(&self, id: SubscriptionId) -> Option<ChannelId> {
        let mut subs = self.subscriptions.lock();
        let channel_id = subs.by_id.remove(&id)?;
        let _ = subs.by_channel.remove(&channel_id);
        let _ = subs.retired.insert(id);
        Some(channel_id)
    }

    /// Forget the subscription on a withdrawn channel.
    pub fn forget_channel(&self, channel_id: ChannelId) -> Option<SubscriptionId> {
        let mut subs = self.subscriptions.lock();
        let id = subs.by_channel.remove(&channel_id)?;
        let _ = subs.by_id.remove(&id);
        let _ = subs.retired.insert(id);
        Some(id)
    }

    /// Subscription id for a channel, if subscribed.
    pub fn subscription_for(&self, channel_id: ChannelId) -> Option<SubscriptionId> {
        self.subscriptions.lock().by_channel.get(&channel_id).copied()
    }

    /// Remove every subscription.
    pub fn drain_subscriptions(&self) -> Vec<(SubscriptionId, ChannelId)> {
        let mut subs = self.subscriptions.lock();
        let drained: Vec<_> = subs.by_id.drain().collect();
        subs.by_channel.clear();
        for (id, _) in &drained {
            let _ = subs.retired.insert(*id);
        }
        drained
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().by_id.len()
    }

    // ── client channels ─────────────────────────────────────────────────

    /// Record a client-advertised channel.
    pub fn add_client_channel(&self, channel: ClientChannel) -> Result<Arc<ClientChannel>, VigilError> {
        let mut channels = self.channels.lock();
        if channels.contains_key(&channel.id) {
            return Err(VigilError::DuplicateClientChannel(channel.id));
        }
        let channel = Arc::new(channel);
        let _ = channels.insert(channel.id, channel.clone());
        Ok(channel)
    }

    /// Remove a client-advertised channel.
    pub fn remove_client_channel(&self, id: ClientChannelId) -> Option<Arc<ClientChannel>> {
        self.channels.lock().remove(&id)
    }

    /// Look up a client-advertised channel.
    pub fn client_channel(&self, id: ClientChannelId) -> Option<Arc<ClientChannel>> {
        self.channels.lock().get(&id).cloned()
    }

    /// Remove every client-advertised channel.
    pub fn drain_client_channels(&self) -> Vec<Arc<ClientChannel>> {
        let mut channels: Vec<_> = self.channels.lock().drain().map(|(_, c)| c).collect();
        channels.sort_by_key(|c| c.id);
        channels
    }

    // ── parameter interest ──────────────────────────────────────────────

    /// Add names to this client's parameter interest. Returns the names
    /// that were not already present.
    pub fn add_parameter_interest(&self, names: &[String]) -> Vec<String> {
        let mut interest = self.parameter_interest.lock();
        names
            .iter()
            .filter(|name| interest.insert((*name).clone()))
            .cloned()
            .collect()
    }

    /// Remove names from this client's parameter interest. Returns the
    /// names that were present.
    pub fn remove_parameter_interest(&self, names: &[String]) -> Vec<String> {
        let mut interest = self.parameter_interest.lock();
        names.iter().filter(|name| interest.remove(*name)).cloned().collect()
    }

    /// Whether the client wants updates for `name`.
    pub fn is_interested_in(&self, name: &str) -> bool {
        self.parameter_interest.lock().contains(name)
    }

    /// Clear all parameter interest.
    pub fn drain_parameter_interest(&self) -> Vec<String> {
        let mut names: Vec<_> = self.parameter_interest.lock().drain().collect();
        names.sort();
        names
    }

    // ── service calls ───────────────────────────────────────────────────

    /// Mark a call as in flight.
    pub fn begin_call(&self, call_id: CallId) -> Result<(), VigilError> {
        if self.calls.lock().insert(call_id) {
            Ok(())
        } else {
            Err(VigilError::DuplicateCallId(call_id))
        }
    }

    /// Mark a call as finished.
    pub fn finish_call(&self, call_id: CallId) {
        let _ = self.calls.lock().remove(&call_id);
    }

    /// Calls currently in flight.
    pub fn in_flight_calls(&self) -> usize {
        self.calls.lock().len()
    }

    // ── connection graph ────────────────────────────────────────────────

    /// Set the connection graph subscription flag. Returns the previous value.
    pub fn set_graph_subscribed(&self, subscribed: bool) -> bool {
        self.graph_subscribed.swap(subscribed, Ordering::AcqRel)
    }

    /// Whether the client receives connection graph updates.
    pub fn is_graph_subscribed(&self) -> bool {
        self.graph_subscribed.load(Ordering::Acquire)
    }

    // ── liveness ────────────────────────────────────────────────────────

    /// Mark the connection as alive (pong or any frame received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// All connected clients.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<Client>>,
    ids: IdSequence<ClientId>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            ids: IdSequence::new(),
        }
    }

    /// Allocate an id and register a new client.
    pub fn register(
        &self,
        addr: SocketAddr,
        message_backlog: usize,
        control_backlog: usize,
        cancel: CancellationToken,
    ) -> Arc<Client> {
        let id = self.ids.next_id();
        let client = Arc::new(Client::new(id, addr, message_backlog, control_backlog, cancel));
        let _ = self.clients.insert(id, client.clone());
        client
    }

    /// Remove a client.
    pub fn remove(&self, id: ClientId) -> Option<Arc<Client>> {
        self.clients.remove(&id).map(|(_, c)| c)
    }

    /// Look up a client.
    pub fn get(&self, id: ClientId) -> Option<Arc<Client>> {
        self.clients.get(&id).map(|c| c.value().clone())
    }

    /// Snapshot of clients whose handshake has completed.
    pub fn active(&self) -> Vec<Arc<Client>> {
        self.clients
            .iter()
            .filter(|c| c.value().is_active())
            .map(|c| c.value().clone())
            .collect()
    }

    /// Number of registered clients, in any state.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no clients are registered.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_client(backlog: usize) -> Client {
        Client::new(
            ClientId::new(1),
            "127.0.0.1:5000".parse().unwrap(),
            backlog,
            backlog,
            CancellationToken::new(),
        )
    }

    fn text(s: &str) -> OutboundFrame {
        OutboundFrame::Text(s.into())
    }

    #[test]
    fn new_client_is_connecting() {
        let client = make_client(4);
        assert_eq!(client.state(), SessionState::Connecting);
        assert!(!client.is_active());
    }

    #[test]
    fn state_only_moves_forward() {
        let client = make_client(4);
        assert!(client.advance(SessionState::Negotiating));
        assert!(client.advance(SessionState::Active));
        assert!(client.is_active());
        assert!(!client.advance(SessionState::Negotiating));
        assert!(client.advance(SessionState::Closed));
        assert!(!client.advance(SessionState::Closing));
        assert_eq!(client.state(), SessionState::Closed);
    }

    #[test]
    fn disconnect_deactivates() {
        let client = make_client(4);
        let _ = client.advance(SessionState::Active);
        client.disconnect();
        assert!(client.is_disconnecting());
        assert!(!client.is_active());
    }

    #[test]
    fn data_queue_drops_oldest_and_counts() {
        let client = make_client(2);
        for i in 0..5 {
            let _ = client.send_data(text(&i.to_string()));
        }
        assert_eq!(client.drop_count(), 3);
        let remaining: Vec<_> = std::iter::from_fn(|| client.data_queue().try_pop())
            .map(|f| match f {
                OutboundFrame::Text(t) => t.to_string(),
                _ => String::new(),
            })
            .collect();
        assert_eq!(remaining, vec!["3", "4"]);
    }

    #[test]
    fn control_overflow_disconnects() {
        let client = make_client(1);
        assert!(client.send_control(text("a")));
        assert!(!client.is_disconnecting());
        assert!(!client.send_control(text("b")));
        assert!(client.is_disconnecting());
    }

    #[test]
    fn closed_queues_reject_but_drain() {
        let client = make_client(4);
        assert!(client.send_control(text("ctl")));
        let _ = client.send_data(text("data"));
        client.close_queues();
        assert!(!client.send_control(text("late")));
        assert_eq!(client.send_data(text("late")), PushOutcome::Closed);
        assert!(matches!(client.next_pending(), Some(OutboundFrame::Text(t)) if &*t == "ctl"));
        assert!(matches!(client.next_pending(), Some(OutboundFrame::Text(t)) if &*t == "data"));
        assert!(client.next_pending().is_none());
    }

    #[test]
    fn message_frame_encodes_as_message_data() {
        let frame = OutboundFrame::Message {
            subscription_id: SubscriptionId::new(7),
            log_time: 1,
            publish_time: 2,
            sequence: 3,
            payload: Bytes::from_static(b"xyz"),
        };
        let bytes = frame.into_binary().unwrap();
        let decoded = ServerBinaryMessage::decode(bytes).unwrap();
        assert_eq!(
            decoded,
            ServerBinaryMessage::MessageData {
                subscription_id: SubscriptionId::new(7),
                log_time: 1,
                publish_time: 2,
                sequence: 3,
                payload: Bytes::from_static(b"xyz"),
            }
        );
    }

    #[test]
    fn subscription_ids_are_not_reused() {
        let client = make_client(4);
        let sub = SubscriptionId::new(1);
        client.add_subscription(sub, ChannelId::new(10)).unwrap();
        assert!(matches!(
            client.add_subscription(sub, ChannelId::new(11)),
            Err(VigilError::DuplicateSubscription { .. })
        ));
        assert_eq!(client.remove_subscription(sub), Some(ChannelId::new(10)));
        assert!(client.remove_subscription(sub).is_none());
        assert!(matches!(
            client.add_subscription(sub, ChannelId::new(10)),
            Err(VigilError::DuplicateSubscription { reason: "id was already used", .. })
        ));
    }

    #[test]
    fn one_subscription_per_channel() {
        let client = make_client(4);
        client.add_subscription(SubscriptionId::new(1), ChannelId::new(10)).unwrap();
        assert!(client.add_subscription(SubscriptionId::new(2), ChannelId::new(10)).is_err());
        assert_eq!(client.subscription_for(ChannelId::new(10)), Some(SubscriptionId::new(1)));
    }

    #[test]
    fn forget_channel_retires_subscription() {
        let client = make_client(4);
        client.add_subscription(SubscriptionId::new(3), ChannelId::new(10)).unwrap();
        assert_eq!(client.forget_channel(ChannelId::new(10)), Some(SubscriptionId::new(3)));
        assert_eq!(client.subscription_count(), 0);
        assert!(client.add_subscription(SubscriptionId::new(3), ChannelId::new(11)).is_err());
    }

    #[test]
    fn drain_subscriptions_empties() {
        let client = make_client(4);
        client.add_subscription(SubscriptionId::new(1), ChannelId::new(10)).unwrap();
        client.add_subscription(SubscriptionId::new(2), ChannelId::new(11)).unwrap();
        let mut drained = client.drain_subscriptions();
        drained.sort();
        assert_eq!(drained.len(), 2);
        assert_eq!(client.subscription_count(), 0);
        assert!(client.subscription_for(ChannelId::new(10)).is_none());
    }

    #[test]
    fn client_channels_are_unique() {
        let client = make_client(4);
        let channel = ClientChannel {
            id: ClientChannelId::new(1),
            topic: "/cmd".into(),
            encoding: "json".into(),
            schema_name: "Cmd".into(),
            schema: None,
            schema_encoding: None,
        };
        let _ = client.add_client_channel(channel.clone()).unwrap();
        assert!(matches!(
            client.add_client_channel(channel),
            Err(VigilError::DuplicateClientChannel(_))
        ));
        assert!(client.client_channel(ClientChannelId::new(1)).is_some());
        assert!(client.remove_client_channel(ClientChannelId::new(1)).is_some());
        assert!(client.client_channel(ClientChannelId::new(1)).is_none());
    }

    #[test]
    fn parameter_interest_reports_changes() {
        let client = make_client(4);
        let names = vec!["a".to_string(), "b".to_string()];
        assert_eq!(client.add_parameter_interest(&names), names);
        assert!(client.add_parameter_interest(&["a".to_string()]).is_empty());
        assert!(client.is_interested_in("b"));
        assert_eq!(client.remove_parameter_interest(&["b".into(), "c".into()]), vec!["b"]);
        assert_eq!(client.drain_parameter_interest(), vec!["a"]);
    }

    #[test]
    fn duplicate_call_id_rejected_until_finished() {
        let client = make_client(4);
        client.begin_call(CallId::new(9)).unwrap();
        assert!(matches!(client.begin_call(CallId::new(9)), Err(VigilError::DuplicateCallId(_))));
        client.finish_call(CallId::new(9));
        assert!(client.begin_call(CallId::new(9)).is_ok());
    }

    #[test]
    fn graph_flag_swaps() {
        let client = make_client(4);
        assert!(!client.set_graph_subscribed(true));
        assert!(client.is_graph_subscribed());
        assert!(client.set_graph_subscribed(false));
    }

    #[test]
    fn check_alive_resets_flag() {
        let client = make_client(4);
        assert!(client.check_alive());
        assert!(!client.check_alive());
        client.mark_alive();
        assert!(client.check_alive());
    }

    #[test]
    fn registry_assigns_unique_ids() {
        let registry = ClientRegistry::new();
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let a = registry.register(addr, 4, 4, CancellationToken::new());
        let b = registry.register(addr, 4, 4, CancellationToken::new());
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);
        assert!(registry.active().is_empty());
        let _ = a.advance(SessionState::Active);
        assert_eq!(registry.active().len(), 1);
        assert!(registry.remove(a.id()).is_some());
        assert!(registry.get(a.id()).is_none());
        assert_eq!(registry.len(), 1);
    }
}
