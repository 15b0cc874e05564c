//! Server channel registry.
//!
//! Each channel keeps its own subscriber map and publish lock, so publishing
//! on one channel never contends with another. Topics are unique among live
//! channels; ids are never reused.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, MutexGuard, RwLock};
use vigil_core::ids::IdSequence;
use vigil_core::{ChannelId, ChannelInfo, ClientId, Schema, SubscriptionId, VigilError};

/// A live channel.
pub struct ChannelEntry {
    info: ChannelInfo,
    subscribers: RwLock<HashMap<ClientId, SubscriptionId>>,
    withdrawn: AtomicBool,
    sequence: AtomicU32,
    publish_lock: Mutex<()>,
}

impl ChannelEntry {
    fn new(info: ChannelInfo) -> Self {
        Self {
            info,
            subscribers: RwLock::new(HashMap::new()),
            withdrawn: AtomicBool::new(false),
            sequence: AtomicU32::new(0),
            publish_lock: Mutex::new(()),
        }
    }

    /// Channel descriptor.
    pub fn info(&self) -> &ChannelInfo {
        &self.info
    }

    /// Channel id.
    pub fn id(&self) -> ChannelId {
        self.info.id
    }

    /// Whether the channel has been withdrawn.
    pub fn is_withdrawn(&self) -> bool {
        self.withdrawn.load(Ordering::Acquire)
    }

    /// Next per-channel sequence number, starting at 0 and wrapping.
    pub fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Serialize publishes on this channel.
    pub fn lock_publish(&self) -> MutexGuard<'_, ()> {
        self.publish_lock.lock()
    }

    /// Current subscribers.
    pub fn subscribers(&self) -> Vec<(ClientId, SubscriptionId)> {
        self.subscribers.read().iter().map(|(c, s)| (*c, *s)).collect()
    }

    /// Number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

/// A withdrawn channel and the subscriptions it had.
#[derive(Debug)]
pub struct Withdrawn {
    /// Descriptor of the withdrawn channel.
    pub info: ChannelInfo,
    /// Subscriptions that were live at withdrawal.
    pub subscribers: Vec<(ClientId, SubscriptionId)>,
}

/// All advertised server channels.
pub struct ChannelRegistry {
    channels: DashMap<ChannelId, Arc<ChannelEntry>>,
    topics: DashMap<String, ChannelId>,
    ids: IdSequence<ChannelId>,
    announce: Mutex<()>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            topics: DashMap::new(),
            ids: IdSequence::new(),
            announce: Mutex::new(()),
        }
    }

    /// Held while advertising or withdrawing and while a new client takes its
    /// initial channel snapshot, so the snapshot and the broadcasts agree.
    pub fn lock_announcements(&self) -> MutexGuard<'_, ()> {
        self.announce.lock()
    }

    /// Register a channel under a fresh id.
    pub fn advertise(
        &self,
        topic: &str,
        message_encoding: &str,
        schema: Option<Schema>,
    ) -> Result<Arc<ChannelEntry>, VigilError> {
        match self.topics.entry(topic.to_string()) {
            Entry::Occupied(_) => Err(VigilError::DuplicateTopic(topic.to_string())),
            Entry::Vacant(vacant) => {
                let id = self.ids.next_id();
                let entry = Arc::new(ChannelEntry::new(ChannelInfo {
                    id,
                    topic: topic.to_string(),
                    message_encoding: message_encoding.to_string(),
                    schema,
                }));
                let _ = self.channels.insert(id, entry.clone());
                let _ = vacant.insert(id);
                Ok(entry)
            }
        }
    }

    /// Remove a channel. Returns `None` if it was unknown or already withdrawn.
    ///
    /// The topic slot stays locked until the channel is gone, so an
    /// `advertise` racing on the same topic sees either the live channel or
    /// a free topic.
    pub fn withdraw(&self, id: ChannelId) -> Option<Withdrawn> {
        let topic = self.get(id)?.info.topic.clone();
        let Entry::Occupied(slot) = self.topics.entry(topic) else {
            return None;
        };
        if *slot.get() != id {
            return None;
        }
        let (_, entry) = self.channels.remove(&id)?;
        let _ = slot.remove();
        let subscribers = {
            let mut subs = entry.subscribers.write();
            entry.withdrawn.store(true, Ordering::Release);
            subs.drain().collect()
        };
        Some(Withdrawn {
            info: entry.info.clone(),
            subscribers,
        })
    }

    /// Look up a live channel.
    pub fn get(&self, id: ChannelId) -> Option<Arc<ChannelEntry>> {
        self.channels.get(&id).map(|e| e.value().clone())
    }

    #[cfg(test)]
    pub(crate) fn by_topic(&self, topic: &str) -> Option<Arc<ChannelEntry>> {
        let id = *self.topics.get(topic)?;
        self.get(id)
    }

    /// Add a subscriber to a channel.
    pub fn subscribe(
        &self,
        client: ClientId,
        subscription: SubscriptionId,
        channel_id: ChannelId,
    ) -> Result<ChannelInfo, VigilError> {
        let entry = self.get(channel_id).ok_or(VigilError::UnknownChannel(channel_id))?;
        let mut subs = entry.subscribers.write();
        // Checked under the lock: withdraw drains subscribers while holding it.
        if entry.is_withdrawn() {
            return Err(VigilError::UnknownChannel(channel_id));
        }
        let _ = subs.insert(client, subscription);
        Ok(entry.info.clone())
    }

    /// Remove a subscriber. Returns the channel if the client was subscribed.
    pub fn unsubscribe(&self, client: ClientId, channel_id: ChannelId) -> Option<ChannelInfo> {
        let entry = self.get(channel_id)?;
        let removed = entry.subscribers.write().remove(&client);
        removed.map(|_| entry.info.clone())
    }

    #[cfg(test)]
    pub(crate) fn subscribers(&self, channel_id: ChannelId) -> Vec<(ClientId, SubscriptionId)> {
        self.get(channel_id).map(|e| e.subscribers()).unwrap_or_default()
    }

    /// Descriptors of every live channel, ordered by id.
    pub fn infos(&self) -> Vec<ChannelInfo> {
        let mut infos: Vec<_> = self.channels.iter().map(|e| e.value().info.clone()).collect();
        infos.sort_by_key(|i| i.id);
        infos
    }

    /// Number of live channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channels are live.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
