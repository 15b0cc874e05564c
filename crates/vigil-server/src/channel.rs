//! Publishing handle for an advertised channel.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use vigil_core::time::now_nanos;
use vigil_core::{ChannelId, ChannelInfo};

use crate::broadcast::{BroadcastEngine, PublishStats};
use crate::registry::ChannelEntry;

/// Optional overrides for [`Channel::log_with`].
#[derive(Clone, Copy, Debug, Default)]
pub struct LogOptions {
    /// Log time in nanoseconds. Defaults to now.
    pub log_time: Option<u64>,
    /// Publish time in nanoseconds. Defaults to the log time.
    pub publish_time: Option<u64>,
    /// Sequence number. Defaults to the channel's next sequence number.
    pub sequence: Option<u32>,
}

/// A handle to an advertised channel, returned by
/// [`ServerHandle::advertise_channel`](crate::ServerHandle::advertise_channel).
///
/// Cheap to clone and safe to use from any thread. Publishing after the
/// channel is withdrawn or the server is dropped is a silent no-op.
#[derive(Clone)]
pub struct Channel {
    entry: Arc<ChannelEntry>,
    engine: Weak<BroadcastEngine>,
}

impl Channel {
    pub(crate) fn new(entry: Arc<ChannelEntry>, engine: &Arc<BroadcastEngine>) -> Self {
        Self {
            entry,
            engine: Arc::downgrade(engine),
        }
    }

    /// Channel id.
    pub fn id(&self) -> ChannelId {
        self.entry.id()
    }

    /// Topic name.
    pub fn topic(&self) -> &str {
        &self.entry.info().topic
    }

    /// Full descriptor.
    pub fn info(&self) -> &ChannelInfo {
        self.entry.info()
    }

    /// Whether the channel has been withdrawn.
    pub fn is_withdrawn(&self) -> bool {
        self.entry.is_withdrawn()
    }

    /// Clients currently subscribed.
    pub fn subscriber_count(&self) -> usize {
        self.entry.subscriber_count()
    }

    /// Whether any client is subscribed. Lets callers skip encoding work.
    pub fn has_subscribers(&self) -> bool {
        self.subscriber_count() > 0
    }

    /// Publish a message stamped with the current time.
    pub fn log(&self, payload: &[u8]) -> PublishStats {
        self.log_with(payload, LogOptions::default())
    }

    /// Publish a message with explicit timing or sequencing.
    pub fn log_with(&self, payload: &[u8], options: LogOptions) -> PublishStats {
        self.log_bytes(Bytes::copy_from_slice(payload), options)
    }

    /// Publish an owned payload without copying it.
    pub fn log_bytes(&self, payload: Bytes, options: LogOptions) -> PublishStats {
        let Some(engine) = self.engine.upgrade() else {
            return PublishStats { delivered: 0, dropped: 1 };
        };
        let log_time = options.log_time.unwrap_or_else(now_nanos);
        let publish_time = options.publish_time.unwrap_or(log_time);
        engine.publish_entry(&self.entry, payload, log_time, publish_time, options.sequence)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id())
            .field("topic", &self.topic())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tokio_util::sync::CancellationToken;
    use vigil_core::SubscriptionId;
    use vigil_protocol::ServerBinaryMessage;

    use super::*;
    use crate::client::{ClientRegistry, SessionState};
    use crate::registry::ChannelRegistry;

    fn setup() -> (Arc<ChannelRegistry>, Arc<ClientRegistry>, Arc<BroadcastEngine>) {
        let channels = Arc::new(ChannelRegistry::new());
        let clients = Arc::new(ClientRegistry::new());
        let engine = Arc::new(BroadcastEngine::new(channels.clone(), clients.clone()));
        (channels, clients, engine)
    }

    #[test]
    fn log_stamps_time_and_sequence() {
        let (channels, clients, engine) = setup();
        let channel = Channel::new(channels.advertise("/a", "json", None).unwrap(), &engine);
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let client = clients.register(addr, 8, 8, CancellationToken::new());
        let _ = client.advance(SessionState::Active);
        client.add_subscription(SubscriptionId::new(1), channel.id()).unwrap();
        let _ = channels.subscribe(client.id(), SubscriptionId::new(1), channel.id()).unwrap();
        assert!(channel.has_subscribers());

        let before = now_nanos();
        let _ = channel.log(b"one");
        let _ = channel.log_with(b"two", LogOptions { log_time: Some(42), ..LogOptions::default() });

        let frames: Vec<_> = std::iter::from_fn(|| client.data_queue().try_pop())
            .map(|f| ServerBinaryMessage::decode(f.into_binary().unwrap()).unwrap())
            .collect();
        match &frames[..] {
            [
                ServerBinaryMessage::MessageData { log_time: t1, sequence: 0, .. },
                ServerBinaryMessage::MessageData { log_time: 42, publish_time: 42, sequence: 1, .. },
            ] => assert!(*t1 >= before),
            other => panic!("unexpected frames {other:?}"),
        }
    }

    #[test]
    fn log_after_engine_dropped_is_noop() {
        let (channels, _clients, engine) = setup();
        let channel = Channel::new(channels.advertise("/a", "json", None).unwrap(), &engine);
        drop(engine);
        assert_eq!(channel.log(b"x").delivered, 0);
    }

    #[test]
    fn withdrawn_channel_reports_state() {
        let (channels, _clients, engine) = setup();
        let channel = Channel::new(channels.advertise("/a", "json", None).unwrap(), &engine);
        assert!(!channel.is_withdrawn());
        let _ = channels.withdraw(channel.id());
        assert!(channel.is_withdrawn());
        assert_eq!(channel.log(b"x").dropped, 1);
        assert_eq!(channel.topic(), "/a");
    }
}
