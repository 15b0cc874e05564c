//! JSON control messages sent by the server.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use vigil_core::{CallId, CapabilitySet, ChannelId, ChannelInfo, Schema, ServiceId, Status};

use crate::error::ProtocolError;
use crate::graph::ConnectionGraphUpdate;
use crate::parameter::WireParameter;

/// A server channel as listed in `advertise`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvertisedChannel {
    /// Channel id.
    pub id: ChannelId,
    /// Topic name.
    pub topic: String,
    /// Message encoding.
    pub encoding: String,
    /// Schema name, empty when the channel has no schema.
    pub schema_name: String,
    /// Schema text, or base64 for binary schema encodings.
    pub schema: String,
    /// Schema encoding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_encoding: Option<String>,
}

impl From<&ChannelInfo> for AdvertisedChannel {
    fn from(info: &ChannelInfo) -> Self {
        let (schema_name, schema, schema_encoding) = match &info.schema {
            Some(s) => (s.name.clone(), schema_text(s), Some(s.encoding.clone())),
            None => (String::new(), String::new(), None),
        };
        Self {
            id: info.id,
            topic: info.topic.clone(),
            encoding: info.message_encoding.clone(),
            schema_name,
            schema,
            schema_encoding,
        }
    }
}

/// Request or response schema of a service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessageSchema {
    /// Message encoding.
    pub encoding: String,
    /// Schema name.
    pub schema_name: String,
    /// Schema encoding.
    pub schema_encoding: String,
    /// Schema text, or base64 for binary schema encodings.
    pub schema: String,
}

impl WireMessageSchema {
    /// Build from a message encoding and its schema.
    pub fn new(encoding: &str, schema: &Schema) -> Self {
        Self {
            encoding: encoding.to_string(),
            schema_name: schema.name.clone(),
            schema_encoding: schema.encoding.clone(),
            schema: schema_text(schema),
        }
    }
}

/// A service as listed in `advertiseServices`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AdvertisedService {
    /// Service id.
    pub id: ServiceId,
    /// Unique service name.
    pub name: String,
    /// Service schema name.
    #[serde(rename = "type")]
    pub r#type: String,
    /// Request schema.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<WireMessageSchema>,
    /// Response schema.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<WireMessageSchema>,
}

/// A control message from the server.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// First message of every session.
    ServerInfo {
        /// Server name.
        name: String,
        /// Enabled capabilities.
        capabilities: CapabilitySet,
        /// Encodings accepted for client publishing and service calls.
        supported_encodings: Vec<String>,
        /// Free-form key/value metadata.
        metadata: BTreeMap<String, String>,
        /// Current session id.
        session_id: String,
    },
    /// A status message.
    Status(Status),
    /// Remove previously sent status messages.
    RemoveStatus {
        /// Ids to remove.
        status_ids: Vec<String>,
    },
    /// Channels now available.
    Advertise {
        /// Channel descriptors.
        channels: Vec<AdvertisedChannel>,
    },
    /// Channels no longer available.
    Unadvertise {
        /// Withdrawn channel ids.
        channel_ids: Vec<ChannelId>,
    },
    /// Parameter values, either a reply or a pushed update.
    ParameterValues {
        /// Values.
        parameters: Vec<WireParameter>,
        /// Correlation token from the request, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Services now available.
    AdvertiseServices {
        /// Service descriptors.
        services: Vec<AdvertisedService>,
    },
    /// Services no longer available.
    UnadvertiseServices {
        /// Withdrawn service ids.
        service_ids: Vec<ServiceId>,
    },
    /// A service call failed.
    ServiceCallFailure {
        /// Service that was called.
        service_id: ServiceId,
        /// Call that failed.
        call_id: CallId,
        /// Diagnostic text.
        message: String,
    },
    /// Connection graph changes.
    ConnectionGraphUpdate(ConnectionGraphUpdate),
}

impl ServerMessage {
    /// Serialize to a text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The `op` name, for logs.
    pub fn op(&self) -> &'static str {
        match self {
            Self::ServerInfo { .. } => "serverInfo",
            Self::Status(_) => "status",
            Self::RemoveStatus { .. } => "removeStatus",
            Self::Advertise { .. } => "advertise",
            Self::Unadvertise { .. } => "unadvertise",
            Self::ParameterValues { .. } => "parameterValues",
            Self::AdvertiseServices { .. } => "advertiseServices",
            Self::UnadvertiseServices { .. } => "unadvertiseServices",
            Self::ServiceCallFailure { .. } => "serviceCallFailure",
            Self::ConnectionGraphUpdate(_) => "connectionGraphUpdate",
        }
    }
}

fn schema_text(schema: &Schema) -> String {
    if schema.is_text_encoding() {
        String::from_utf8_lossy(&schema.data).into_owned()
    } else {
        STANDARD.encode(&schema.data)
    }
}
