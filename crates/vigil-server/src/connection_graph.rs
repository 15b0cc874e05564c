//! Connection graph: which ids publish, subscribe to and provide what.
//!
//! The application replaces the whole graph; subscribers receive only the
//! difference from the previous one. A new subscriber gets the full graph.

use std::collections::{BTreeMap, BTreeSet};
use parking_lot::Mutex;
use vigil_protocol::{
    AdvertisedServiceEntry, ConnectionGraphUpdate, PublishedTopic, SubscribedTopic,
};

/// A snapshot of the connection graph.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionGraph {
    published_topics: BTreeMap<String, BTreeSet<String>>,
    subscribed_topics: BTreeMap<String, BTreeSet<String>>,
    advertised_services: BTreeMap<String, BTreeSet<String>>,
}

impl ConnectionGraph {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the publishers of a topic.
    pub fn set_published_topic<I, S>(&mut self, topic: impl Into<String>, publisher_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let _ = self
            .published_topics
            .insert(topic.into(), publisher_ids.into_iter().map(Into::into).collect());
    }

    /// Set the subscribers of a topic.
    pub fn set_subscribed_topic<I, S>(&mut self, topic: impl Into<String>, subscriber_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let _ = self
            .subscribed_topics
            .insert(topic.into(), subscriber_ids.into_iter().map(Into::into).collect());
    }

    /// Set the providers of a service.
    pub fn set_advertised_service<I, S>(&mut self, service: impl Into<String>, provider_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let _ = self
            .advertised_services
            .insert(service.into(), provider_ids.into_iter().map(Into::into).collect());
    }

    /// Changes needed to turn `previous` into `self`.
    pub fn diff(&self, previous: &ConnectionGraph) -> ConnectionGraphUpdate {
        let published_topics = changed(&self.published_topics, &previous.published_topics)
            .map(|(name, ids)| PublishedTopic { name, publisher_ids: ids })
            .collect();
        let subscribed_topics = changed(&self.subscribed_topics, &previous.subscribed_topics)
            .map(|(name, ids)| SubscribedTopic { name, subscriber_ids: ids })
            .collect();
        let advertised_services = changed(&self.advertised_services, &previous.advertised_services)
            .map(|(name, ids)| AdvertisedServiceEntry { name, provider_ids: ids })
            .collect();

        // A topic is removed once it is neither published nor subscribed.
        let removed_topics = previous
            .published_topics
            .keys()
            .chain(previous.subscribed_topics.keys())
            .filter(|t| {
                !self.published_topics.contains_key(*t) && !self.subscribed_topics.contains_key(*t)
            })
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let removed_services = previous
            .advertised_services
            .keys()
            .filter(|s| !self.advertised_services.contains_key(*s))
            .cloned()
            .collect();

        ConnectionGraphUpdate {
            published_topics,
            subscribed_topics,
            advertised_services,
            removed_topics,
            removed_services,
        }
    }

    /// The whole graph as an update, for a new subscriber.
    pub fn full(&self) -> ConnectionGraphUpdate {
        self.diff(&ConnectionGraph::default())
    }
}

fn changed<'a>(
    current: &'a BTreeMap<String, BTreeSet<String>>,
    previous: &'a BTreeMap<String, BTreeSet<String>>,
) -> impl Iterator<Item = (String, BTreeSet<String>)> + 'a {
    current
        .iter()
        .filter(move |(name, ids)| previous.get(*name) != Some(*ids))
        .map(|(name, ids)| (name.clone(), ids.clone()))
}

/// Current graph plus the number of subscribed clients.
#[derive(Default)]
pub struct GraphTracker {
    current: Mutex<ConnectionGraph>,
    subscribers: Mutex<usize>,
}

impl GraphTracker {
    /// Replace the graph, returning the difference from the previous one.
    pub fn replace(&self, graph: ConnectionGraph) -> ConnectionGraphUpdate {
        let mut current = self.current.lock();
        let update = graph.diff(&current);
        *current = graph;
        update
    }

    /// The current graph as a full update.
    pub fn full(&self) -> ConnectionGraphUpdate {
        self.current.lock().full()
    }

    /// Count a subscriber, running `on_first` under the count lock when it
    /// is the first. Returns `true` for the first one.
    pub fn add_subscriber(&self, on_first: impl FnOnce()) -> bool {
        let mut count = self.subscribers.lock();
        *count += 1;
        let first = *count == 1;
        if first {
            on_first();
        }
        first
    }

    /// Drop a subscriber, running `on_last` under the count lock when the
    /// last one leaves. Returns `true` in that case.
    pub fn remove_subscriber(&self, on_last: impl FnOnce()) -> bool {
        let mut count = self.subscribers.lock();
        let Some(remaining) = count.checked_sub(1) else {
            return false;
        };
        *count = remaining;
        if remaining == 0 {
            on_last();
        }
        remaining == 0
    }

    /// Subscribed clients.
    pub fn subscriber_count(&self) -> usize {
        *self.subscribers.lock()
    }
}
