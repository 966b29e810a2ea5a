//! Agent error types

use std::time::Duration;
use thiserror::Error;
use zentropi_proto::ProtocolError;
use zentropi_transport::TransportError;

/// Result alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors raised by the agent runtime
#[derive(Debug, Error)]
pub enum AgentError {
    /// Frame construction or decoding failed
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Connection layer failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Parse template could not be compiled
    #[error("Invalid pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// Offending template
        pattern: String,
        /// What is wrong with it
        reason: String,
    },

    /// Same handler registered twice under one pattern
    #[error("Handler {id} already registered for {pattern:?}")]
    DuplicateHandler {
        /// Pattern the handler is registered under
        pattern: String,
        /// Handler id
        id: u64,
    },

    /// Nothing to remove
    #[error("No handler {id} registered for {pattern:?}")]
    HandlerNotFound {
        /// Pattern looked up
        pattern: String,
        /// Handler id
        id: u64,
    },

    /// Handler cannot be registered where it was offered
    #[error("Invalid handler: {0}")]
    InvalidHandler(String),

    /// Timer pattern is not a positive number of seconds
    #[error("Invalid timer interval: {0:?}")]
    InvalidInterval(String),

    /// Strict state container has no such state
    #[error("Missing state: {0}")]
    MissingState(String),

    /// A state handler answered with something other than a bool
    #[error("State handler for {state:?} must return a bool")]
    InvalidStateReply {
        /// State being changed
        state: String,
    },

    /// Strict config has no such option
    #[error("Unknown option: {0}")]
    UnknownOption(String),

    /// Option is immutable once the config is frozen
    #[error("Option {0:?} cannot be modified after freeze")]
    OptionFrozen(String),

    /// New options are refused once the config is frozen
    #[error("Option {0:?} cannot be added after freeze")]
    ConfigLocked(String),

    /// Value does not match the option's type
    #[error("Invalid value for {name:?}: expected {expected}, got {got}")]
    InvalidValue {
        /// Option or state name
        name: String,
        /// Expected JSON type
        expected: &'static str,
        /// Received JSON type
        got: &'static str,
    },

    /// Required option left unset
    #[error("Option {0:?} is required")]
    MissingOption(String),

    /// `run` called on an agent that already ran
    #[error("Agent is already running or has stopped")]
    AlreadyRunning,

    /// `stop` called twice
    #[error("Agent is already stopping")]
    AlreadyStopping,

    /// Request went unanswered
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// A handler callback failed
    #[error("Handler failed: {0}")]
    Handler(String),
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Handler(format!("{:#}", err))
    }
}
