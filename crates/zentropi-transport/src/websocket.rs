//! WebSocket relay connection

use crate::config::ReconnectPolicy;
use crate::connection::{Connection, ConnectionContext, FrameSink};
use crate::watchdog::Watchdog;
use crate::{Result, TransportError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zentropi_proto::{validate_name, Frame, WireCodec};

/// Connection to a relay that speaks JSON frames over a WebSocket.
///
/// A background session task owns the socket; it reconnects with backoff
/// whenever the socket fails or the watchdog reports a stall.
pub struct WebSocketConnection {
    ctx: ConnectionContext,
    endpoint: Option<String>,
    spaces: Arc<Mutex<BTreeSet<String>>>,
    live: Arc<AtomicBool>,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    watchdog: Option<Watchdog>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    codec: WireCodec,
}

enum SessionEnd {
    Closed,
    Failed,
}

struct Session {
    url: String,
    agent: String,
    sink: FrameSink,
    spaces: Arc<Mutex<BTreeSet<String>>>,
    live: Arc<AtomicBool>,
    watchdog: Watchdog,
    cancel: CancellationToken,
    policy: ReconnectPolicy,
    codec: WireCodec,
}

impl WebSocketConnection {
    /// Create an unconnected WebSocket connection
    pub fn new(ctx: ConnectionContext) -> Self {
        let codec = WireCodec::with_max_frame_size(ctx.config.max_frame_size);
        Self {
            ctx,
            endpoint: None,
            spaces: Arc::new(Mutex::new(BTreeSet::new())),
            live: Arc::new(AtomicBool::new(false)),
            outgoing: None,
            watchdog: None,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            codec,
        }
    }

    /// Relay URL for an endpoint and auth token
    pub fn relay_url(endpoint: &str, auth: Option<&str>) -> String {
        format!("{}/{}", endpoint.trim_end_matches('/'), auth.unwrap_or_default())
    }

    fn outgoing(&self) -> Result<&mpsc::UnboundedSender<String>> {
        self.outgoing.as_ref().ok_or(TransportError::NotConnected)
    }

    fn send_command(&self, name: &str, space: &str) -> Result<()> {
        let command = Frame::command(name)
            .with("space", space)
            .source(self.ctx.agent_name.as_str())
            .build()?;
        let text = self.codec.encode(&command)?;
        self.outgoing()?
            .send(text)
            .map_err(|_| TransportError::Connection("session task has exited".to_string()))
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn connect(&mut self, endpoint: &str, auth: Option<&str>) -> Result<()> {
        if self.outgoing.is_some() {
            return Err(TransportError::AlreadyConnected {
                endpoint: endpoint.to_string(),
            });
        }
        if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
            return Err(TransportError::UnsupportedScheme(endpoint.to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let watchdog = Watchdog::new(self.ctx.config.watchdog_timeout);
        self.cancel = CancellationToken::new();

        let session = Session {
            url: Self::relay_url(endpoint, auth),
            agent: self.ctx.agent_name.clone(),
            sink: self.ctx.sink.clone(),
            spaces: Arc::clone(&self.spaces),
            live: Arc::clone(&self.live),
            watchdog: watchdog.clone(),
            cancel: self.cancel.clone(),
            policy: self.ctx.config.reconnect.clone(),
            codec: self.codec,
        };
        self.tasks.push(watchdog.spawn());
        self.tasks.push(tokio::spawn(session.run(rx)));

        self.watchdog = Some(watchdog);
        self.outgoing = Some(tx);
        self.endpoint = Some(endpoint.to_string());
        debug!("{} connecting to {}", self.ctx.agent_name, endpoint);
        Ok(())
    }

    async fn bind(&mut self, _endpoint: &str) -> Result<()> {
        Err(TransportError::Unsupported {
            operation: "bind",
            connection: "WebSocketConnection",
        })
    }

    async fn join(&mut self, space: &str) -> Result<()> {
        validate_name(space)?;
        self.outgoing()?;
        let mut spaces = self.spaces.lock();
        spaces.insert(space.to_string());
        // a socket that is not open yet announces its spaces once it opens
        if self.live.load(Ordering::Acquire) {
            self.send_command("join", space)?;
        }
        Ok(())
    }

    async fn leave(&mut self, space: &str) -> Result<()> {
        validate_name(space)?;
        self.outgoing()?;
        let mut spaces = self.spaces.lock();
        if !spaces.remove(space) {
            return Err(TransportError::NotMember {
                agent: self.ctx.agent_name.clone(),
                space: space.to_string(),
            });
        }
        if self.live.load(Ordering::Acquire) {
            self.send_command("leave", space)?;
        }
        Ok(())
    }

    async fn broadcast(&mut self, frame: &Frame) -> Result<()> {
        let outgoing = self.outgoing()?;
        if !self.live.load(Ordering::Acquire) {
            debug!("Skipping broadcast of {}, socket not open", frame);
            return Ok(());
        }
        let text = self.codec.encode(frame)?;
        outgoing
            .send(text)
            .map_err(|_| TransportError::Connection("session task has exited".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        if self.outgoing.take().is_none() {
            return Err(TransportError::NotConnected);
        }
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.disable();
            watchdog.cancel();
        }
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("WebSocket task ended abnormally: {}", e);
            }
        }
        self.live.store(false, Ordering::Release);
        info!("{} closed WebSocket connection", self.ctx.agent_name);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    fn spaces(&self) -> Vec<String> {
        self.spaces.lock().iter().cloned().collect()
    }
}

impl Session {
    async fn run(self, mut outgoing: mpsc::UnboundedReceiver<String>) {
        let mut attempt = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let attempt_result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = connect_async(self.url.as_str()) => result,
            };
            match attempt_result {
                Ok((stream, _)) => {
                    attempt = 0;
                    info!("{} connected to relay", self.agent);
                    self.watchdog.enable();
                    let end = self.pump(stream, &mut outgoing).await;
                    self.live.store(false, Ordering::Release);
                    self.watchdog.disable();
                    if matches!(end, SessionEnd::Closed) {
                        break;
                    }
                }
                Err(e) => warn!("{} failed to reach relay: {}", self.agent, e),
            }

            attempt += 1;
            if !self.policy.allows(attempt) {
                error!(
                    "{} giving up on relay after {} attempts",
                    self.agent, self.policy.max_attempts
                );
                break;
            }
            let delay = self.policy.delay(attempt);
            debug!("{} reconnecting in {:?} (attempt {})", self.agent, delay, attempt);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.watchdog.disable();
        self.live.store(false, Ordering::Release);
    }

    async fn pump(
        &self,
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        outgoing: &mut mpsc::UnboundedReceiver<String>,
    ) -> SessionEnd {
        let (mut write, mut read) = stream.split();

        // the relay forgets memberships when the socket drops. Going live
        // under the spaces lock means each join is either replayed here or
        // queued by the connection, never both.
        let joined: Vec<String> = {
            let spaces = self.spaces.lock();
            self.live.store(true, Ordering::Release);
            spaces.iter().cloned().collect()
        };
        for space in joined {
            let rejoin = Frame::command("join")
                .with("space", space.as_str())
                .source(self.agent.as_str())
                .build()
                .map_err(TransportError::from)
                .and_then(|frame| Ok(self.codec.encode(&frame)?));
            match rejoin {
                Ok(text) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        warn!("Rejoin of {} failed: {}", space, e);
                        return SessionEnd::Failed;
                    }
                }
                Err(e) => warn!("Rejoin of {} failed: {}", space, e),
            }
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = write.close().await;
                    return SessionEnd::Closed;
                }
                _ = self.watchdog.stalled() => {
                    let _ = write.close().await;
                    return SessionEnd::Failed;
                }
                text = outgoing.recv() => match text {
                    Some(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            warn!("WebSocket send failed: {}", e);
                            return SessionEnd::Failed;
                        }
                    }
                    None => return SessionEnd::Closed,
                },
                incoming = read.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        self.watchdog.feed();
                        if !self.deliver(self.codec.decode(&text)) {
                            return SessionEnd::Closed;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        self.watchdog.feed();
                        if !self.deliver(self.codec.decode_bytes(&bytes)) {
                            return SessionEnd::Closed;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Relay closed the socket");
                        return SessionEnd::Failed;
                    }
                    Some(Ok(_)) => self.watchdog.feed(),
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {}", e);
                        return SessionEnd::Failed;
                    }
                },
            }
        }
    }

    /// Push a decoded frame to the agent; false once the inbox is gone
    fn deliver(&self, decoded: std::result::Result<Frame, zentropi_proto::ProtocolError>) -> bool {
        match decoded {
            Ok(frame) => self.sink.send(frame).is_ok(),
            Err(e) => {
                warn!("Dropping undecodable frame from relay: {}", e);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::runtime::Runtime;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    fn connection() -> WebSocketConnection {
        connection_with(TransportConfig::default())
    }

    fn connection_with(config: TransportConfig) -> WebSocketConnection {
        let (tx, _rx) = mpsc::unbounded_channel();
        let ctx = ConnectionContext::new("agent", tx, Runtime::new()).with_config(config);
        WebSocketConnection::new(ctx)
    }

    /// Local relay that reports every text frame as (socket number, frame)
    async fn relay() -> (String, mpsc::UnboundedReceiver<(usize, Frame)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut sockets = 0;
            while let Ok((stream, _)) = listener.accept().await {
                sockets += 1;
                let socket_number = sockets;
                let tx = tx.clone();
                tokio::spawn(async move {
                    let Ok(mut socket) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(message)) = socket.next().await {
                        if let Message::Text(text) = message {
                            let frame = Frame::from_json(&text).unwrap();
                            if tx.send((socket_number, frame)).is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        });
        (endpoint, rx)
    }

    async fn next_frame(relay: &mut mpsc::UnboundedReceiver<(usize, Frame)>) -> (usize, Frame) {
        timeout(Duration::from_secs(5), relay.recv())
            .await
            .expect("relay heard nothing")
            .expect("relay stopped")
    }

    fn assert_join(frame: &Frame, space: &str) {
        assert_eq!(frame.kind(), zentropi_proto::Kind::Command);
        assert_eq!(frame.name(), "join");
        assert_eq!(frame.get_str("space"), Some(space));
        assert_eq!(frame.source(), Some("agent"));
    }

    #[test]
    fn test_relay_url() {
        assert_eq!(
            WebSocketConnection::relay_url("wss://relay.example.com/", Some("token")),
            "wss://relay.example.com/token"
        );
        assert_eq!(
            WebSocketConnection::relay_url("ws://localhost:8000", None),
            "ws://localhost:8000/"
        );
    }

    #[tokio::test]
    async fn test_bind_unsupported() {
        let mut conn = connection();
        assert!(matches!(
            conn.bind("ws://localhost:1").await,
            Err(TransportError::Unsupported { operation: "bind", .. })
        ));
    }

    #[tokio::test]
    async fn test_operations_before_connect() {
        let mut conn = connection();
        let frame = Frame::event("e").build().unwrap();

        assert!(matches!(conn.join("s").await, Err(TransportError::NotConnected)));
        assert!(matches!(conn.broadcast(&frame).await, Err(TransportError::NotConnected)));
        assert!(matches!(conn.close().await, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_twice_and_close() {
        let mut conn = connection();
        // nothing listens on port 1; the session keeps retrying in the background
        conn.connect("ws://127.0.0.1:1", Some("auth")).await.unwrap();
        assert!(matches!(
            conn.connect("ws://127.0.0.1:1", None).await,
            Err(TransportError::AlreadyConnected { .. })
        ));
        assert!(!conn.is_connected());

        conn.join("lobby").await.unwrap();
        assert_eq!(conn.spaces(), vec!["lobby"]);
        assert!(matches!(
            conn.leave("other").await,
            Err(TransportError::NotMember { .. })
        ));

        conn.close().await.unwrap();
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_join_before_open_sent_once() {
        let (endpoint, mut relay) = relay().await;
        let mut conn = connection();
        conn.connect(&endpoint, Some("token")).await.unwrap();
        conn.join("lobby").await.unwrap();

        let (_, frame) = next_frame(&mut relay).await;
        assert_join(&frame, "lobby");
        assert!(timeout(Duration::from_millis(300), relay.recv()).await.is_err());

        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_join_after_open_sent_once() {
        let (endpoint, mut relay) = relay().await;
        let mut conn = connection();
        conn.connect(&endpoint, None).await.unwrap();
        timeout(Duration::from_secs(5), async {
            while !conn.is_connected() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("socket never opened");

        conn.join("lobby").await.unwrap();

        let (_, frame) = next_frame(&mut relay).await;
        assert_join(&frame, "lobby");
        assert!(timeout(Duration::from_millis(300), relay.recv()).await.is_err());

        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_relay_triggers_reconnect_and_rejoin() {
        let (endpoint, mut relay) = relay().await;
        let config = TransportConfig::default()
            .with_watchdog_timeout(Duration::from_millis(200))
            .with_reconnect(ReconnectPolicy {
                initial_backoff: Duration::from_millis(50),
                jitter: false,
                ..ReconnectPolicy::default()
            });
        let mut conn = connection_with(config);
        conn.connect(&endpoint, None).await.unwrap();
        conn.join("lobby").await.unwrap();

        let (first_socket, frame) = next_frame(&mut relay).await;
        assert_join(&frame, "lobby");

        // the relay never talks back, so the watchdog trips and the session
        // opens a fresh socket that replays the membership
        let (second_socket, frame) = next_frame(&mut relay).await;
        assert!(second_socket > first_socket);
        assert_join(&frame, "lobby");

        conn.close().await.unwrap();
        assert!(!conn.is_connected());
    }
}
