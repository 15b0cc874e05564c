//! # vigil-protocol
//!
//! Wire format spoken over the `vigil.ws.v1` WebSocket subprotocol.
//!
//! - JSON text frames carry control messages tagged by `op`
//! - Binary frames start with a one-byte opcode; integers are little-endian
//! - Parameters travel as `{name, value, type}` with base64 byte arrays

#![deny(unsafe_code)]

pub mod binary;
pub mod client;
pub mod error;
pub mod graph;
pub mod parameter;
pub mod server;

pub use binary::{ClientBinaryMessage, ServerBinaryMessage, ServiceCallRequest};
pub use client::{ClientChannelAdvertisement, ClientMessage, SubscribeRequest};
pub use error::ProtocolError;
pub use graph::{AdvertisedServiceEntry, ConnectionGraphUpdate, PublishedTopic, SubscribedTopic};
pub use parameter::WireParameter;
pub use server::{AdvertisedChannel, AdvertisedService, ServerMessage, WireMessageSchema};

/// WebSocket subprotocol a client must offer during the upgrade.
pub const SUBPROTOCOL: &str = "vigil.ws.v1";
