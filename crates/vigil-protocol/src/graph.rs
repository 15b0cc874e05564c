//! Body of the `connectionGraphUpdate` message.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A topic and the ids publishing to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedTopic {
    /// Topic name.
    pub name: String,
    /// Publisher ids.
    pub publisher_ids: BTreeSet<String>,
}

/// A topic and the ids subscribed to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribedTopic {
    /// Topic name.
    pub name: String,
    /// Subscriber ids.
    pub subscriber_ids: BTreeSet<String>,
}

/// A service and the ids providing it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvertisedServiceEntry {
    /// Service name.
    pub name: String,
    /// Provider ids.
    pub provider_ids: BTreeSet<String>,
}

/// Changes since the previous graph. New and changed entries carry their full
/// id sets; removals carry names only.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionGraphUpdate {
    /// New or changed published topics.
    pub published_topics: Vec<PublishedTopic>,
    /// New or changed subscribed topics.
    pub subscribed_topics: Vec<SubscribedTopic>,
    /// New or changed services.
    pub advertised_services: Vec<AdvertisedServiceEntry>,
    /// Topics neither published nor subscribed any more.
    pub removed_topics: Vec<String>,
    /// Services no longer advertised.
    pub removed_services: Vec<String>,
}

impl ConnectionGraphUpdate {
    /// Whether the update carries no changes.
    pub fn is_empty(&self) -> bool {
        self.published_topics.is_empty()
            && self.subscribed_topics.is_empty()
            && self.advertised_services.is_empty()
            && self.removed_topics.is_empty()
            && self.removed_services.is_empty()
    }
}
