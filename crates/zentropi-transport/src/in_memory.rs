//! In-process connection backed by a [`SpaceBroker`]

use crate::broker::SpaceBroker;
use crate::connection::{Connection, ConnectionContext};
use crate::{Result, TransportError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};
use zentropi_proto::{validate_name, Frame};

/// Connection to a broker living in the same process.
///
/// Every operation completes without suspending.
pub struct InMemoryConnection {
    ctx: ConnectionContext,
    broker: Option<Arc<SpaceBroker>>,
    endpoint: Option<String>,
}

impl InMemoryConnection {
    /// Create an unconnected in-memory connection
    pub fn new(ctx: ConnectionContext) -> Self {
        Self {
            ctx,
            broker: None,
            endpoint: None,
        }
    }

    fn ensure_detached(&self) -> Result<()> {
        match &self.endpoint {
            Some(endpoint) if self.broker.is_some() => Err(TransportError::AlreadyConnected {
                endpoint: endpoint.clone(),
            }),
            _ => Ok(()),
        }
    }

    fn broker(&self) -> Result<&Arc<SpaceBroker>> {
        self.broker.as_ref().ok_or(TransportError::NotConnected)
    }

    fn attach(&mut self, endpoint: &str, broker: Arc<SpaceBroker>) -> Result<()> {
        broker.agent_connect(&self.ctx.agent_name, self.ctx.sink.clone())?;
        self.broker = Some(broker);
        self.endpoint = Some(endpoint.to_string());
        Ok(())
    }

    fn report(&self, frame: Frame) {
        if self.ctx.sink.send(frame).is_err() {
            debug!("Inbox for {} is closed", self.ctx.agent_name);
        }
    }
}

#[async_trait]
impl Connection for InMemoryConnection {
    async fn connect(&mut self, endpoint: &str, _auth: Option<&str>) -> Result<()> {
        self.ensure_detached()?;
        let broker = self.ctx.runtime.broker(endpoint)?;
        self.attach(endpoint, broker)?;
        info!("{} connected to {}", self.ctx.agent_name, endpoint);
        Ok(())
    }

    async fn bind(&mut self, endpoint: &str) -> Result<()> {
        self.ensure_detached()?;
        let broker = self.ctx.runtime.bind(endpoint)?;
        self.attach(endpoint, broker)?;
        info!("{} bound {}", self.ctx.agent_name, endpoint);
        Ok(())
    }

    async fn join(&mut self, space: &str) -> Result<()> {
        let frame = self.broker()?.join(&self.ctx.agent_name, space)?;
        self.report(frame);
        Ok(())
    }

    async fn leave(&mut self, space: &str) -> Result<()> {
        validate_name(space)?;
        let frame = self.broker()?.leave(&self.ctx.agent_name, space)?;
        self.report(frame);
        Ok(())
    }

    async fn broadcast(&mut self, frame: &Frame) -> Result<()> {
        let delivered = self.broker()?.broadcast(frame);
        debug!("{} delivered to {} agent(s)", frame, delivered);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let broker = self.broker.take().ok_or(TransportError::NotConnected)?;
        broker.agent_close(&self.ctx.agent_name);
        info!("{} closed in-memory connection", self.ctx.agent_name);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.broker.is_some()
    }

    fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    fn spaces(&self) -> Vec<String> {
        match &self.broker {
            Some(broker) => broker.spaces(Some(&self.ctx.agent_name)),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use tokio::sync::mpsc;

    fn connection(
        name: &str,
        runtime: &Runtime,
    ) -> (InMemoryConnection, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = ConnectionContext::new(name, tx, runtime.clone());
        (InMemoryConnection::new(ctx), rx)
    }

    #[tokio::test]
    async fn test_connect_requires_bind() {
        let runtime = Runtime::new();
        let (mut conn, _rx) = connection("a", &runtime);

        assert!(matches!(
            conn.connect("inmemory://test", None).await,
            Err(TransportError::NotBound(_))
        ));
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_double_connect_fails() {
        let runtime = Runtime::new();
        let (mut conn, _rx) = connection("a", &runtime);

        conn.bind("inmemory://test").await.unwrap();
        assert!(matches!(
            conn.connect("inmemory://test", None).await,
            Err(TransportError::AlreadyConnected { .. })
        ));
        assert!(matches!(
            conn.bind("inmemory://other").await,
            Err(TransportError::AlreadyConnected { .. })
        ));
    }

    #[tokio::test]
    async fn test_operations_before_connect() {
        let runtime = Runtime::new();
        let (mut conn, _rx) = connection("a", &runtime);
        let frame = Frame::event("x").source("a").build().unwrap();

        assert!(matches!(conn.join("s").await, Err(TransportError::NotConnected)));
        assert!(matches!(conn.broadcast(&frame).await, Err(TransportError::NotConnected)));
        assert!(matches!(conn.close().await, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_join_reports_outcome() {
        let runtime = Runtime::new();
        let (mut conn, mut rx) = connection("a", &runtime);
        conn.bind("inmemory://test").await.unwrap();

        conn.join("lobby").await.unwrap();
        conn.join("lobby").await.unwrap();

        assert_eq!(rx.recv().await.unwrap().name(), "join");
        assert_eq!(rx.recv().await.unwrap().name(), "join-failed");
        assert_eq!(conn.spaces(), vec!["lobby"]);
    }

    #[tokio::test]
    async fn test_broadcast_between_connections() {
        let runtime = Runtime::new();
        let (mut a, _a_rx) = connection("a", &runtime);
        let (mut b, mut b_rx) = connection("b", &runtime);
        a.bind("inmemory://test").await.unwrap();
        b.connect("inmemory://test", None).await.unwrap();
        a.join("s").await.unwrap();
        b.join("s").await.unwrap();
        assert_eq!(b_rx.recv().await.unwrap().name(), "join");

        let ping = Frame::event("ping").source("a").build().unwrap();
        a.broadcast(&ping).await.unwrap();

        let received = b_rx.recv().await.unwrap();
        assert_eq!(received.id(), ping.id());
    }

    #[tokio::test]
    async fn test_close_detaches() {
        let runtime = Runtime::new();
        let (mut conn, _rx) = connection("a", &runtime);
        conn.bind("inmemory://test").await.unwrap();
        conn.join("s").await.unwrap();

        conn.close().await.unwrap();

        assert!(!conn.is_connected());
        let broker = runtime.broker("inmemory://test").unwrap();
        assert!(broker.agents(None).unwrap().is_empty());
        // the name is free again
        let (mut again, _rx2) = connection("a", &runtime);
        again.connect("inmemory://test", None).await.unwrap();
    }
}
