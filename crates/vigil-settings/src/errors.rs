//! Settings errors.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The settings file is not valid JSON, or does not fit the settings shape.
    #[error("malformed settings: {0}")]
    Json(#[from] serde_json::Error),
    /// A field holds a value the server cannot run with.
    #[error("{field}: {reason}")]
    InvalidValue {
        /// camelCase path of the offending field, e.g. `server.messageBacklog`.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Settings result.
pub type Result<T> = std::result::Result<T, SettingsError>;
