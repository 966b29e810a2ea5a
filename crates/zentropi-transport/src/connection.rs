//! Connection abstraction and scheme dispatch

use crate::config::TransportConfig;
use crate::in_memory::InMemoryConnection;
use crate::runtime::Runtime;
use crate::{Result, TransportError};
use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;
use zentropi_proto::Frame;

/// Channel incoming frames are pushed into, usually an agent inbox
pub type FrameSink = mpsc::UnboundedSender<Frame>;

/// A link between one agent and a shared namespace of spaces
#[async_trait]
pub trait Connection: Send + Sync {
    /// Attach to an existing endpoint
    async fn connect(&mut self, endpoint: &str, auth: Option<&str>) -> Result<()>;

    /// Create the endpoint and attach to it
    async fn bind(&mut self, endpoint: &str) -> Result<()>;

    /// Subscribe to a space
    async fn join(&mut self, space: &str) -> Result<()>;

    /// Unsubscribe from a space
    async fn leave(&mut self, space: &str) -> Result<()>;

    /// Send a frame to the other members of its space(s)
    async fn broadcast(&mut self, frame: &Frame) -> Result<()>;

    /// Detach and stop background tasks
    async fn close(&mut self) -> Result<()>;

    /// Whether the link is currently usable
    fn is_connected(&self) -> bool;

    /// Endpoint given to `connect` or `bind`
    fn endpoint(&self) -> Option<&str>;

    /// Spaces this connection has joined
    fn spaces(&self) -> Vec<String>;
}

/// Everything a connection needs from its owning agent
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// Name the agent is known by on the endpoint
    pub agent_name: String,
    /// Where received frames are delivered
    pub sink: FrameSink,
    /// Broker registry for in-memory endpoints
    pub runtime: Runtime,
    /// Socket transport settings
    pub config: TransportConfig,
}

impl ConnectionContext {
    /// Create a context with default transport settings
    pub fn new(agent_name: impl Into<String>, sink: FrameSink, runtime: Runtime) -> Self {
        Self {
            agent_name: agent_name.into(),
            sink,
            runtime,
            config: TransportConfig::default(),
        }
    }

    /// Override the transport settings
    pub fn with_config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }
}

/// Endpoint schemes with a connection implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// `inmemory://`
    InMemory,
    /// `redis://host:port`
    Redis,
    /// `ws://` or `wss://`
    WebSocket,
}

impl Scheme {
    /// Classify an endpoint URL
    pub fn parse(endpoint: &str) -> Result<Self> {
        let url = Url::parse(endpoint).map_err(|e| TransportError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        match url.scheme() {
            "inmemory" => Ok(Self::InMemory),
            "redis" => Ok(Self::Redis),
            "ws" | "wss" => Ok(Self::WebSocket),
            other => Err(TransportError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// Build an unconnected connection suited to `endpoint`
pub fn build_connection(endpoint: &str, ctx: ConnectionContext) -> Result<Box<dyn Connection>> {
    match Scheme::parse(endpoint)? {
        Scheme::InMemory => Ok(Box::new(InMemoryConnection::new(ctx))),
        #[cfg(feature = "redis")]
        Scheme::Redis => Ok(Box::new(crate::redis_connection::RedisConnection::new(ctx))),
        #[cfg(feature = "websocket")]
        Scheme::WebSocket => Ok(Box::new(crate::websocket::WebSocketConnection::new(ctx))),
        #[allow(unreachable_patterns)]
        _ => Err(TransportError::UnsupportedScheme(endpoint.to_string())),
    }
}
