//! Server configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vigil_core::{Capability, CapabilitySet, VigilError};
use vigil_settings::ServerSettings;

/// Configuration for the Vigil server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `8765`; `0` auto-assigns).
    pub port: u16,
    /// Name advertised in `serverInfo`.
    pub name: String,
    /// Enabled capabilities.
    pub capabilities: CapabilitySet,
    /// Encodings accepted for client publishing and untyped service calls.
    pub supported_encodings: Vec<String>,
    /// Fixed session id; generated when absent.
    pub session_id: Option<String>,
    /// Metadata advertised in `serverInfo`.
    pub metadata: BTreeMap<String, String>,
    /// Per-client data queue length.
    pub message_backlog: usize,
    /// Per-client control queue length.
    pub control_backlog: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Heartbeat timeout in seconds.
    pub heartbeat_timeout_secs: u64,
    /// Grace period for draining queues on shutdown, in milliseconds.
    pub shutdown_grace_ms: u64,
    /// Concurrent asset fetches across all clients.
    pub max_concurrent_asset_fetches: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8765,
            name: "vigil".into(),
            capabilities: CapabilitySet::empty(),
            supported_encodings: vec!["json".into()],
            session_id: None,
            metadata: BTreeMap::new(),
            message_backlog: 1024,
            control_backlog: 1024,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            shutdown_grace_ms: 5_000,
            max_concurrent_asset_fetches: 32,
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            name: settings.name.clone(),
            capabilities: settings.capabilities.iter().copied().collect(),
            supported_encodings: settings.supported_encodings.clone(),
            session_id: settings.session_id.clone(),
            metadata: settings.metadata.clone(),
            message_backlog: settings.message_backlog,
            control_backlog: settings.control_backlog,
            max_message_size: settings.max_message_size,
            heartbeat_interval_secs: settings.heartbeat_interval_secs,
            heartbeat_timeout_secs: settings.heartbeat_timeout_secs,
            shutdown_grace_ms: settings.shutdown_grace_ms,
            max_concurrent_asset_fetches: settings.max_concurrent_asset_fetches,
        }
    }

    /// Enable a capability.
    #[must_use]
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    /// `host:port` to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Heartbeat timeout.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs.max(1))
    }

    /// Shutdown grace period.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Reject configurations the server cannot start with.
    pub fn validate(&self) -> Result<(), VigilError> {
        if self.message_backlog == 0 || self.control_backlog == 0 {
            return Err(VigilError::Config("queue backlogs must be > 0".into()));
        }
        if self.name.trim().is_empty() {
            return Err(VigilError::Config("server name must not be empty".into()));
        }
        if self.capabilities.contains(Capability::ClientPublish) && self.supported_encodings.is_empty() {
            return Err(VigilError::Config(
                "clientPublish requires at least one supported encoding".into(),
            ));
        }
        if self.capabilities.contains(Capability::ParametersSubscribe)
            && !self.capabilities.contains(Capability::Parameters)
        {
            return Err(VigilError::Config(
                "parametersSubscribe requires the parameters capability".into(),
            ));
        }
        Ok(())
    }
}
