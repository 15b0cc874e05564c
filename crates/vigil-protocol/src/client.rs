//! JSON control messages sent by clients.

use serde::{Deserialize, Serialize};
use vigil_core::{ChannelId, ClientChannelId, SubscriptionId};

use crate::error::ProtocolError;
use crate::parameter::WireParameter;

/// One entry of a `subscribe` request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    /// Client-chosen subscription id.
    pub id: SubscriptionId,
    /// Channel to subscribe to.
    pub channel_id: ChannelId,
}

/// A channel a client intends to publish on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientChannelAdvertisement {
    /// Client-chosen channel id.
    pub id: ClientChannelId,
    /// Topic name.
    pub topic: String,
    /// Message encoding.
    pub encoding: String,
    /// Schema name.
    pub schema_name: String,
    /// Optional schema definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Optional schema encoding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_encoding: Option<String>,
}

/// A control message from a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Subscribe to server channels.
    Subscribe {
        /// Requested subscriptions.
        subscriptions: Vec<SubscribeRequest>,
    },
    /// Drop subscriptions.
    Unsubscribe {
        /// Subscriptions to drop.
        subscription_ids: Vec<SubscriptionId>,
    },
    /// Advertise client-published channels.
    Advertise {
        /// Channels to advertise.
        channels: Vec<ClientChannelAdvertisement>,
    },
    /// Withdraw client-published channels.
    Unadvertise {
        /// Channels to withdraw.
        channel_ids: Vec<ClientChannelId>,
    },
    /// Read parameters. An empty list asks for all of them.
    GetParameters {
        /// Names to read.
        parameter_names: Vec<String>,
        /// Correlation token echoed in the reply.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Write parameters. An unset value deletes.
    SetParameters {
        /// Parameters to write.
        parameters: Vec<WireParameter>,
        /// Correlation token echoed in the reply.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Start receiving updates for the named parameters.
    SubscribeParameterUpdates {
        /// Names of interest.
        parameter_names: Vec<String>,
    },
    /// Stop receiving updates for the named parameters.
    UnsubscribeParameterUpdates {
        /// Names no longer of interest.
        parameter_names: Vec<String>,
    },
    /// Start receiving connection graph updates.
    SubscribeConnectionGraph,
    /// Stop receiving connection graph updates.
    UnsubscribeConnectionGraph,
    /// Fetch an asset by URI.
    FetchAsset {
        /// Asset URI.
        uri: String,
        /// Correlation id echoed in the binary response.
        request_id: u32,
    },
}

impl ClientMessage {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// The `op` name, for logs.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Advertise { .. } => "advertise",
            Self::Unadvertise { .. } => "unadvertise",
            Self::GetParameters { .. } => "getParameters",
            Self::SetParameters { .. } => "setParameters",
            Self::SubscribeParameterUpdates { .. } => "subscribeParameterUpdates",
            Self::UnsubscribeParameterUpdates { .. } => "unsubscribeParameterUpdates",
            Self::SubscribeConnectionGraph => "subscribeConnectionGraph",
            Self::UnsubscribeConnectionGraph => "unsubscribeConnectionGraph",
            Self::FetchAsset { .. } => "fetchAsset",
        }
    }

    /// Serialize to a text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
