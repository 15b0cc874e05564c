//! # vigil-logging
//!
//! Installs the global `tracing` subscriber.
//!
//! The filter is built from a default level plus per-module overrides;
//! `RUST_LOG`, when set, replaces it entirely. Output is either JSON lines
//! (for log shippers) or the human-readable `fmt` format.

#![deny(unsafe_code)]

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Output format of the fmt layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, single line per event.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Default level. Overridden by `RUST_LOG`.
    pub level: Level,
    /// Per-module level overrides (e.g. `vigil_server` => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            module_levels: Vec::new(),
            format: LogFormat::Pretty,
        }
    }
}

/// Logging setup errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// A level string could not be parsed.
    #[error("invalid log level: {0}")]
    InvalidLevel(String),
    /// The filter directives could not be parsed.
    #[error("invalid filter directive: {0}")]
    InvalidFilter(String),
    /// A global subscriber is already installed.
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Parse a level name (`trace`, `debug`, `info`, `warn`, `error`), case-insensitive.
pub fn parse_level(s: &str) -> Result<Level, LoggingError> {
    Level::from_str(s.trim()).map_err(|_| LoggingError::InvalidLevel(s.to_string()))
}

/// Build the filter directive string from config, e.g. `info,vigil_server=debug`.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let mut filter = config.level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter.push_str(&format!(",{module}={}", level.to_string().to_lowercase()));
    }
    filter
}

/// Install the global subscriber. Call once at startup.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directives(config))
            .map_err(|e| LoggingError::InvalidFilter(e.to_string()))?,
    };

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)
}
