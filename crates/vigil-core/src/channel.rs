//! Channel and schema descriptors.

use bytes::Bytes;

use crate::ids::ChannelId;

/// Describes the structure of the messages on a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    /// Schema name, e.g. `foxglove.Log`.
    pub name: String,
    /// Schema encoding, e.g. `jsonschema`, `protobuf`.
    pub encoding: String,
    /// Raw schema definition.
    pub data: Bytes,
}

impl Schema {
    /// Create a schema.
    pub fn new(name: impl Into<String>, encoding: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            encoding: encoding.into(),
            data: data.into(),
        }
    }

    /// Whether the schema definition is human-readable text on the wire.
    ///
    /// Binary encodings (e.g. `protobuf`, `flatbuffer`) are base64-encoded
    /// inside JSON control messages.
    pub fn is_text_encoding(&self) -> bool {
        matches!(
            self.encoding.as_str(),
            "jsonschema" | "ros1msg" | "ros2msg" | "ros2idl" | "omgidl"
        )
    }
}

/// An advertised server channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Server-assigned id.
    pub id: ChannelId,
    /// Unique topic name.
    pub topic: String,
    /// Encoding of the message payloads, e.g. `json`.
    pub message_encoding: String,
    /// Optional message schema.
    pub schema: Option<Schema>,
}
