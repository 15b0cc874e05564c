//! `GET /health` body.

use std::time::Instant;

use serde::Serialize;

/// Serving state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Accepting clients.
    Ok,
    /// `stop()` was called; new connections get 503.
    Stopping,
}

/// Live counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthCounts {
    /// Connected clients.
    pub clients: usize,
    /// Advertised channels.
    pub channels: usize,
    /// Registered services.
    pub services: usize,
}

/// `/health` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Serving state.
    pub status: HealthStatus,
    /// Whole seconds since start.
    pub uptime_secs: u64,
    /// Session id currently advertised in `serverInfo`.
    pub session_id: String,
    /// Live counters, flattened into the top-level object.
    #[serde(flatten)]
    pub counts: HealthCounts,
}

impl HealthResponse {
    /// Snapshot the server's health.
    pub fn snapshot(started_at: Instant, session_id: &str, counts: HealthCounts, stopping: bool) -> Self {
        Self {
            status: if stopping { HealthStatus::Stopping } else { HealthStatus::Ok },
            uptime_secs: started_at.elapsed().as_secs(),
            session_id: session_id.to_owned(),
            counts,
        }
    }
}
