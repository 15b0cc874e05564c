//! Decoding errors.

use thiserror::Error;
use vigil_core::VigilError;

/// A frame could not be decoded.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Text frame was not a valid JSON control message.
    #[error("invalid JSON message: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// Binary frame had no opcode byte.
    #[error("empty binary frame")]
    EmptyFrame,
    /// Binary frame opcode is not recognized.
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),
    /// Binary frame ended before a fixed-size field.
    #[error("truncated frame: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes the next field requires.
        needed: usize,
        /// Bytes left in the frame.
        remaining: usize,
    },
    /// A string field was not UTF-8.
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
    /// A `byte_array` parameter was not valid base64.
    #[error("invalid base64 in parameter {0}")]
    InvalidBase64(String),
    /// A parameter value has a shape the data model cannot hold.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// What was wrong.
        reason: &'static str,
    },
}

impl From<ProtocolError> for VigilError {
    fn from(err: ProtocolError) -> Self {
        VigilError::Protocol(err.to_string())
    }
}
