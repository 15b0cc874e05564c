//! # vigil-core
//!
//! Domain types shared by every Vigil crate.
//!
//! - Numeric handles for clients, channels, subscriptions, services and calls
//! - Capability flags and the [`CapabilitySet`] bitset
//! - Channel and schema descriptors
//! - Parameters and their typed values
//! - Status messages
//! - The [`VigilError`] taxonomy

#![deny(unsafe_code)]

pub mod capability;
pub mod channel;
pub mod errors;
pub mod ids;
pub mod parameter;
pub mod status;
pub mod time;

pub use capability::{Capability, CapabilitySet};
pub use channel::{ChannelInfo, Schema};
pub use errors::{Result, VigilError};
pub use ids::{CallId, ChannelId, ClientChannelId, ClientId, ServiceId, SessionId, SubscriptionId};
pub use parameter::{Parameter, ParameterType, ParameterValue};
pub use status::{Status, StatusLevel};
