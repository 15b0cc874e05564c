//! Fan-out of message data and control broadcasts to connected clients.

use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use parking_lot::RwLock;
use tracing::{debug, warn};
use vigil_core::{ChannelId, ChannelInfo};
use vigil_protocol::ServerMessage;

use crate::client::{ClientRegistry, OutboundFrame};
use crate::metrics::{VIGIL_DATA_FRAMES_DROPPED_TOTAL, VIGIL_MESSAGES_PUBLISHED_TOTAL};
use crate::queue::PushOutcome;
use crate::registry::{ChannelEntry, ChannelRegistry};

/// Timing and ordering attached to a published message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageMeta {
    /// When the message was logged, in nanoseconds.
    pub log_time: u64,
    /// When the message was published, in nanoseconds.
    pub publish_time: u64,
    /// Per-channel sequence number.
    pub sequence: u32,
}

/// Receives every message published on a server channel, whether or not a
/// client is subscribed. Used to record data alongside live streaming.
///
/// Called while the channel's publish lock is held; implementations must not block.
pub trait RecordingSink: Send + Sync + 'static {
    /// A channel was advertised.
    fn add_channel(&self, _channel: &ChannelInfo) {}

    /// A channel was withdrawn.
    fn remove_channel(&self, _channel: &ChannelInfo) {}

    /// A message was published.
    fn log(&self, channel: &ChannelInfo, payload: &[u8], meta: &MessageMeta);
}

/// Outcome of one publish.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishStats {
    /// Subscribers the frame was queued for.
    pub delivered: usize,
    /// Frames lost: evicted from full queues or not queued at all.
    pub dropped: usize,
}

/// Routes published messages to subscribers and control messages to clients.
pub struct BroadcastEngine {
    channels: Arc<ChannelRegistry>,
    clients: Arc<ClientRegistry>,
    sinks: RwLock<Vec<Arc<dyn RecordingSink>>>,
}

impl BroadcastEngine {
    /// Create an engine over the given registries.
    pub fn new(channels: Arc<ChannelRegistry>, clients: Arc<ClientRegistry>) -> Self {
        Self {
            channels,
            clients,
            sinks: RwLock::new(Vec::new()),
        }
    }

    /// Attach a recording sink. It is told about every live channel first.
    pub fn add_sink(&self, sink: Arc<dyn RecordingSink>) {
        for info in self.channels.infos() {
            sink.add_channel(&info);
        }
        self.sinks.write().push(sink);
    }

    /// Tell sinks about a new channel.
    pub fn channel_added(&self, info: &ChannelInfo) {
        for sink in self.sinks.read().iter() {
            sink.add_channel(info);
        }
    }

    /// Tell sinks a channel is gone.
    pub fn channel_removed(&self, info: &ChannelInfo) {
        for sink in self.sinks.read().iter() {
            sink.remove_channel(info);
        }
    }

    /// Publish by channel id. Unknown channels count as a single drop.
    pub fn publish(
        &self,
        channel_id: ChannelId,
        payload: Bytes,
        log_time: u64,
        publish_time: u64,
        sequence: Option<u32>,
    ) -> PublishStats {
        match self.channels.get(channel_id) {
            Some(entry) => self.publish_entry(&entry, payload, log_time, publish_time, sequence),
            None => {
                debug!(channel_id = %channel_id, "publish on unknown channel dropped");
                counter!(VIGIL_DATA_FRAMES_DROPPED_TOTAL).increment(1);
                PublishStats { delivered: 0, dropped: 1 }
            }
        }
    }

    /// Publish on a channel entry.
    ///
    /// Holds the channel's publish lock while assigning the sequence number
    /// and enqueueing, so every subscriber sees messages in sequence order.
    pub fn publish_entry(
        &self,
        entry: &ChannelEntry,
        payload: Bytes,
        log_time: u64,
        publish_time: u64,
        sequence: Option<u32>,
    ) -> PublishStats {
        let _order = entry.lock_publish();
        if entry.is_withdrawn() {
            counter!(VIGIL_DATA_FRAMES_DROPPED_TOTAL).increment(1);
            return PublishStats { delivered: 0, dropped: 1 };
        }
        let meta = MessageMeta {
            log_time,
            publish_time,
            sequence: sequence.unwrap_or_else(|| entry.next_sequence()),
        };
        counter!(VIGIL_MESSAGES_PUBLISHED_TOTAL).increment(1);

        for sink in self.sinks.read().iter() {
            sink.log(entry.info(), &payload, &meta);
        }

        let mut stats = PublishStats::default();
        for (client_id, subscription_id) in entry.subscribers() {
            let Some(client) = self.clients.get(client_id) else {
                stats.dropped += 1;
                continue;
            };
            let frame = OutboundFrame::Message {
                subscription_id,
                log_time: meta.log_time,
                publish_time: meta.publish_time,
                sequence: meta.sequence,
                payload: payload.clone(),
            };
            match client.send_data(frame) {
                PushOutcome::Queued => stats.delivered += 1,
                PushOutcome::DroppedOldest => {
                    stats.delivered += 1;
                    stats.dropped += 1;
                }
                PushOutcome::Closed => stats.dropped += 1,
            }
        }
        stats
    }

    /// Send a control message to every active client. Returns the recipient count.
    pub fn broadcast_message(&self, message: &ServerMessage) -> usize {
        let json: Arc<str> = match message.to_json() {
            Ok(json) => json.into(),
            Err(error) => {
                warn!(op = message.op(), %error, "failed to serialize broadcast");
                return 0;
            }
        };
        let clients = self.clients.active();
        debug!(op = message.op(), recipients = clients.len(), "broadcast message");
        clients
            .iter()
            .filter(|c| c.send_control(OutboundFrame::Text(json.clone())))
            .count()
    }

    /// Send a binary frame on every active client's data queue.
    pub fn broadcast_data(&self, frame: &Bytes) -> usize {
        self.clients
            .active()
            .iter()
            .filter(|c| c.send_data(OutboundFrame::Binary(frame.clone())) != PushOutcome::Closed)
            .count()
    }
}
