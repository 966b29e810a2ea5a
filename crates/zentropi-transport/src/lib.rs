//! # Zentropi Transport
//!
//! Space broker, connection abstraction and the in-memory, Redis and
//! WebSocket transports used by Zentropi agents.

#![warn(missing_docs)]

/// In-process space broker
pub mod broker;

/// Transport configuration and reconnect policy
pub mod config;

/// Connection trait and scheme dispatch
pub mod connection;

/// Transport error types
pub mod error;

/// In-memory connection
pub mod in_memory;

/// Redis pub/sub connection
#[cfg(feature = "redis")]
pub mod redis_connection;

/// Tagged connection registry
pub mod registry;

/// Broker registry keyed by endpoint
pub mod runtime;

/// Liveness watchdog
pub mod watchdog;

/// WebSocket relay connection
#[cfg(feature = "websocket")]
pub mod websocket;

pub use broker::{Space, SpaceBroker};
pub use config::{ReconnectPolicy, TransportConfig};
pub use connection::{build_connection, Connection, ConnectionContext, FrameSink, Scheme};
pub use error::{Result, TransportError};
pub use in_memory::InMemoryConnection;
#[cfg(feature = "redis")]
pub use redis_connection::RedisConnection;
pub use registry::{parse_tags, ConnectionRegistry, DEFAULT_TAG};
pub use runtime::Runtime;
pub use watchdog::Watchdog;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
