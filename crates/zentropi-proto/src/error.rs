//! Error types for protocol operations

use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame or routing name is empty, blank or otherwise unusable
    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    /// Name exceeds the character limit
    #[error("Name too long: {len} characters (max: {max})")]
    NameTooLong {
        /// Actual length in characters
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Serialized data payload exceeds the size bound
    #[error("Frame data too large: {size} bytes (max: {max})")]
    DataTooLarge {
        /// Serialized size
        size: usize,
        /// Exclusive upper bound
        max: usize,
    },

    /// Serialized meta exceeds the size bound
    #[error("Frame meta too large: {size} bytes (max: {max})")]
    MetaTooLarge {
        /// Serialized size
        size: usize,
        /// Exclusive upper bound
        max: usize,
    },

    /// Kind integer outside the closed set
    #[error("Invalid frame kind: {0}")]
    InvalidKind(i64),

    /// Timer frames are local sentinels and never cross the wire
    #[error("Timer frames cannot be serialized")]
    TimerFrame,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid frame format
    #[error("Invalid frame format: {0}")]
    InvalidFrame(String),

    /// Encoded frame too large
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
