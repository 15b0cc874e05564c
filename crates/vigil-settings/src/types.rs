//! Settings types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vigil_core::Capability;

use crate::errors::{Result, SettingsError};

/// Root settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VigilSettings {
    /// Server network and protocol settings.
    pub server: ServerSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl VigilSettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        let invalid = |field, reason| Err(SettingsError::InvalidValue { field, reason });
        if server.message_backlog == 0 {
            return invalid("server.messageBacklog", "must be > 0");
        }
        if server.control_backlog == 0 {
            return invalid("server.controlBacklog", "must be > 0");
        }
        if server.heartbeat_interval_secs == 0 {
            return invalid("server.heartbeatIntervalSecs", "must be > 0");
        }
        if server.heartbeat_timeout_secs < server.heartbeat_interval_secs {
            return invalid("server.heartbeatTimeoutSecs", "must be >= heartbeatIntervalSecs");
        }
        if server.name.trim().is_empty() {
            return invalid("server.name", "must not be empty");
        }
        Ok(())
    }
}

/// Server network and protocol settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port. `0` picks a free port.
    pub port: u16,
    /// Name advertised in `serverInfo`.
    pub name: String,
    /// Capabilities enabled at start.
    pub capabilities: Vec<Capability>,
    /// Encodings accepted for client publishing and service calls.
    pub supported_encodings: Vec<String>,
    /// Fixed session id. A fresh one is generated when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Per-client data queue length before the oldest frame is dropped.
    pub message_backlog: usize,
    /// Per-client control queue length before the client is disconnected.
    pub control_backlog: usize,
    /// Largest accepted WebSocket message, in bytes.
    pub max_message_size: usize,
    /// Seconds between server pings.
    pub heartbeat_interval_secs: u64,
    /// Seconds without a pong before the client is dropped.
    pub heartbeat_timeout_secs: u64,
    /// How long `stop` waits for queues to drain, in milliseconds.
    pub shutdown_grace_ms: u64,
    /// Concurrent asset fetches allowed across all clients.
    pub max_concurrent_asset_fetches: usize,
    /// Free-form metadata advertised in `serverInfo`.
    pub metadata: BTreeMap<String, String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            name: "vigil".to_string(),
            capabilities: Vec::new(),
            supported_encodings: vec!["json".to_string()],
            session_id: None,
            message_backlog: 1024,
            control_backlog: 1024,
            max_message_size: 16 * 1024 * 1024,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            shutdown_grace_ms: 5_000,
            max_concurrent_asset_fetches: 32,
            metadata: BTreeMap::new(),
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module level overrides.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            modules: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_server_settings() {
        let s = ServerSettings::default();
        assert_eq!(s.host, "127.0.0.1");
        assert_eq!(s.port, 8765);
        assert_eq!(s.message_backlog, 1024);
        assert_eq!(s.supported_encodings, vec!["json".to_string()]);
        assert!(s.capabilities.is_empty());
    }

    #[test]
    fn defaults_validate() {
        assert!(VigilSettings::default().validate().is_ok());
    }

    #[test]
    fn zero_backlog_rejected() {
        let mut settings = VigilSettings::default();
        settings.server.message_backlog = 0;
        assert!(matches!(settings.validate(), Err(SettingsError::InvalidValue { .. })));
    }

    #[test]
    fn heartbeat_timeout_below_interval_rejected() {
        let mut settings = VigilSettings::default();
        settings.server.heartbeat_interval_secs = 30;
        settings.server.heartbeat_timeout_secs = 10;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn camel_case_keys() {
        let json = serde_json::to_value(VigilSettings::default()).unwrap();
        assert!(json["server"]["messageBacklog"].is_number());
        assert!(json["server"]["supportedEncodings"].is_array());
        assert!(json["server"].get("sessionId").is_none());
        assert_eq!(json["logging"]["level"], "info");
    }

    #[test]
    fn partial_document_fills_defaults() {
        let settings: VigilSettings =
            serde_json::from_str(r#"{"server":{"port":9000,"capabilities":["parameters","time"]}}"#)
                .unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(
            settings.server.capabilities,
            vec![Capability::Parameters, Capability::Time]
        );
        assert!(!settings.logging.json);
    }
}
