//! Error taxonomy shared by the protocol engine.

use crate::capability::Capability;
use crate::ids::{CallId, ChannelId, ClientChannelId, SubscriptionId};

/// Typed error hierarchy for server operations.
///
/// Everything except `Bind` and `Config` is local to one request: it is
/// reported to the requesting client and never tears down the server.
#[derive(Debug, thiserror::Error)]
pub enum VigilError {
    // Connection-local
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("server does not support the {0} capability")]
    Capability(Capability),

    // Request-local
    #[error("topic already advertised: {0}")]
    DuplicateTopic(String),
    #[error("unknown channel: {0}")]
    UnknownChannel(ChannelId),
    #[error("subscription {id} rejected: {reason}")]
    DuplicateSubscription { id: SubscriptionId, reason: &'static str },
    #[error("client channel {0} already advertised")]
    DuplicateClientChannel(ClientChannelId),
    #[error("unknown client channel: {0}")]
    UnknownClientChannel(ClientChannelId),
    #[error("unknown service: {0}")]
    UnknownService(String),
    #[error("service already registered: {0}")]
    DuplicateService(String),
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),
    #[error("call id {0} is already in flight")]
    DuplicateCallId(CallId),
    #[error("handler error: {0}")]
    Handler(String),

    // Fatal to startup
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Config(String),

    // Operational
    #[error("server is stopped")]
    Stopped,
}

impl VigilError {
    /// Errors that abort server startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Bind { .. } | Self::Config(_))
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::Capability(_) => "capability",
            Self::DuplicateTopic(_) => "duplicate_topic",
            Self::UnknownChannel(_) => "unknown_channel",
            Self::DuplicateSubscription { .. } => "duplicate_subscription",
            Self::DuplicateClientChannel(_) => "duplicate_client_channel",
            Self::UnknownClientChannel(_) => "unknown_client_channel",
            Self::UnknownService(_) => "unknown_service",
            Self::DuplicateService(_) => "duplicate_service",
            Self::UnsupportedEncoding(_) => "unsupported_encoding",
            Self::DuplicateCallId(_) => "duplicate_call_id",
            Self::Handler(_) => "handler",
            Self::Bind { .. } => "bind",
            Self::Config(_) => "config",
            Self::Stopped => "stopped",
        }
    }
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, VigilError>;
