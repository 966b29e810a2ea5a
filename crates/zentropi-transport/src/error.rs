//! Transport error types

use thiserror::Error;
use zentropi_proto::ProtocolError;

/// Result alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// `connect` or `bind` called on a live connection
    #[error("Already connected to {endpoint}")]
    AlreadyConnected {
        /// Endpoint the connection is attached to
        endpoint: String,
    },

    /// Operation requires a prior `connect` or `bind`
    #[error("Not connected")]
    NotConnected,

    /// Another connection already bound this endpoint
    #[error("Endpoint already bound: {0}")]
    AlreadyBound(String),

    /// Nothing is bound at this endpoint
    #[error("No broker bound at {0}; bind() must run before connect()")]
    NotBound(String),

    /// Endpoint scheme has no connection implementation
    #[error("Unsupported endpoint scheme: {0}")]
    UnsupportedScheme(String),

    /// Endpoint could not be parsed
    #[error("Invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint {
        /// Offending endpoint
        endpoint: String,
        /// Parse failure
        reason: String,
    },

    /// Operation not offered by this connection type
    #[error("{operation} is not supported by {connection}")]
    Unsupported {
        /// Operation name
        operation: &'static str,
        /// Connection type
        connection: &'static str,
    },

    /// Agent name already registered with a broker
    #[error("Agent {0:?} is already connected")]
    AgentExists(String),

    /// Agent is not a member of the space
    #[error("Agent {agent:?} is not a member of space {space:?}")]
    NotMember {
        /// Agent name
        agent: String,
        /// Space name
        space: String,
    },

    /// Space has never been joined
    #[error("Space not found: {0}")]
    UnknownSpace(String),

    /// Tag has no registered connections
    #[error("Tag {tag:?} not found in tags {known:?}")]
    UnknownTag {
        /// Requested tag
        tag: String,
        /// Tags currently registered
        known: Vec<String>,
    },

    /// Mutually exclusive selectors given together
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Underlying socket or client failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Redis client error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,
}
