//! Redis pub/sub connection, one channel per space

use crate::config::ReconnectPolicy;
use crate::connection::{Connection, ConnectionContext, FrameSink};
use crate::watchdog::Watchdog;
use crate::{Result, TransportError};
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use redis::aio::{MultiplexedConnection, PubSub};
use redis::AsyncCommands;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zentropi_proto::{validate_name, Frame, WireCodec};

#[derive(Debug)]
enum Subscription {
    Join(String),
    Leave(String),
}

enum Event {
    Message(redis::Msg),
    Control(Subscription),
    Stalled,
    Dropped,
    Closed,
}

/// Connection to a Redis server used as a pub/sub relay.
///
/// Publishing goes through a multiplexed connection; a subscriber task owns
/// the pub/sub session and pushes decoded frames into the agent inbox.
pub struct RedisConnection {
    ctx: ConnectionContext,
    endpoint: Option<String>,
    publisher: Option<MultiplexedConnection>,
    control: Option<mpsc::UnboundedSender<Subscription>>,
    spaces: Arc<Mutex<BTreeSet<String>>>,
    live: Arc<AtomicBool>,
    watchdog: Option<Watchdog>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    codec: WireCodec,
}

struct Subscriber {
    client: redis::Client,
    agent: String,
    sink: FrameSink,
    spaces: Arc<Mutex<BTreeSet<String>>>,
    live: Arc<AtomicBool>,
    watchdog: Watchdog,
    cancel: CancellationToken,
    policy: ReconnectPolicy,
    codec: WireCodec,
}

impl RedisConnection {
    /// Create an unconnected Redis connection
    pub fn new(ctx: ConnectionContext) -> Self {
        let codec = WireCodec::with_max_frame_size(ctx.config.max_frame_size);
        Self {
            ctx,
            endpoint: None,
            publisher: None,
            control: None,
            spaces: Arc::new(Mutex::new(BTreeSet::new())),
            live: Arc::new(AtomicBool::new(false)),
            watchdog: None,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            codec,
        }
    }

    fn control(&self) -> Result<&mpsc::UnboundedSender<Subscription>> {
        self.control.as_ref().ok_or(TransportError::NotConnected)
    }

    fn request(&self, subscription: Subscription) -> Result<()> {
        self.control()?
            .send(subscription)
            .map_err(|_| TransportError::Connection("subscriber task has exited".to_string()))
    }
}

#[async_trait]
impl Connection for RedisConnection {
    async fn connect(&mut self, endpoint: &str, _auth: Option<&str>) -> Result<()> {
        if self.control.is_some() {
            return Err(TransportError::AlreadyConnected {
                endpoint: endpoint.to_string(),
            });
        }
        if !endpoint.starts_with("redis://") {
            return Err(TransportError::UnsupportedScheme(endpoint.to_string()));
        }

        let client = redis::Client::open(endpoint)?;
        let publisher = client.get_multiplexed_async_connection().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let watchdog = Watchdog::new(self.ctx.config.watchdog_timeout);
        self.cancel = CancellationToken::new();
        let subscriber = Subscriber {
            client,
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
        self.tasks.push(tokio::spawn(subscriber.run(rx)));

        self.watchdog = Some(watchdog);
        self.publisher = Some(publisher);
        self.control = Some(tx);
        self.endpoint = Some(endpoint.to_string());
        info!("{} connected to {}", self.ctx.agent_name, endpoint);
        Ok(())
    }

    async fn bind(&mut self, endpoint: &str) -> Result<()> {
        // the server is the shared namespace; binding is connecting
        self.connect(endpoint, None).await
    }

    async fn join(&mut self, space: &str) -> Result<()> {
        validate_name(space)?;
        self.control()?;
        self.spaces.lock().insert(space.to_string());
        self.request(Subscription::Join(space.to_string()))
    }

    async fn leave(&mut self, space: &str) -> Result<()> {
        validate_name(space)?;
        self.control()?;
        if !self.spaces.lock().remove(space) {
            return Err(TransportError::NotMember {
                agent: self.ctx.agent_name.clone(),
                space: space.to_string(),
            });
        }
        self.request(Subscription::Leave(space.to_string()))
    }

    async fn broadcast(&mut self, frame: &Frame) -> Result<()> {
        let text = self.codec.encode(frame)?;
        let targets: Vec<String> = match frame.space() {
            Some(space) => vec![space.to_string()],
            None => self.spaces.lock().iter().cloned().collect(),
        };
        let publisher = self.publisher.as_mut().ok_or(TransportError::NotConnected)?;
        for space in targets {
            let receivers: i64 = publisher.publish(space.as_str(), text.as_str()).await?;
            debug!("{} published to {} ({} receivers)", frame, space, receivers);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.control.take().is_none() {
            return Err(TransportError::NotConnected);
        }
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.disable();
            watchdog.cancel();
        }
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Redis task ended abnormally: {}", e);
            }
        }
        self.publisher = None;
        self.live.store(false, Ordering::Release);
        info!("{} closed Redis connection", self.ctx.agent_name);
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

impl Subscriber {
    async fn run(self, mut control: mpsc::UnboundedReceiver<Subscription>) {
        let mut attempt = 0u32;
        loop {
            let session = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.client.get_async_pubsub() => result,
            };
            match session {
                Ok(pubsub) => {
                    attempt = 0;
                    if self.listen(pubsub, &mut control).await {
                        break;
                    }
                }
                Err(e) => warn!("{} failed to open Redis subscriber: {}", self.agent, e),
            }

            attempt += 1;
            if !self.policy.allows(attempt) {
                error!(
                    "{} giving up on Redis after {} attempts",
                    self.agent, self.policy.max_attempts
                );
                break;
            }
            let delay = self.policy.delay(attempt);
            debug!("{} resubscribing in {:?} (attempt {})", self.agent, delay, attempt);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.watchdog.disable();
        self.live.store(false, Ordering::Release);
    }

    /// Drive one pub/sub session. Returns true when the connection is closing.
    async fn listen(
        &self,
        mut pubsub: PubSub,
        control: &mut mpsc::UnboundedReceiver<Subscription>,
    ) -> bool {
        let joined: Vec<String> = self.spaces.lock().iter().cloned().collect();
        for space in &joined {
            if let Err(e) = pubsub.subscribe(space.as_str()).await {
                warn!("Subscribe to {} failed: {}", space, e);
                return false;
            }
        }
        self.live.store(true, Ordering::Release);
        self.watchdog.enable();

        let closing = loop {
            let event = {
                let mut messages = pubsub.on_message();
                tokio::select! {
                    _ = self.cancel.cancelled() => Event::Closed,
                    _ = self.watchdog.stalled() => Event::Stalled,
                    request = control.recv() => match request {
                        Some(request) => Event::Control(request),
                        None => Event::Closed,
                    },
                    message = messages.next() => match message {
                        Some(message) => Event::Message(message),
                        None => Event::Dropped,
                    },
                }
            };

            match event {
                Event::Message(message) => {
                    self.watchdog.feed();
                    match message.get_payload::<String>() {
                        Ok(text) => match self.codec.decode(&text) {
                            Ok(frame) => {
                                if self.sink.send(frame).is_err() {
                                    break true;
                                }
                            }
                            Err(e) => warn!("Dropping undecodable frame: {}", e),
                        },
                        Err(e) => warn!("Dropping non-text payload: {}", e),
                    }
                }
                Event::Control(Subscription::Join(space)) => {
                    if let Err(e) = pubsub.subscribe(space.as_str()).await {
                        warn!("Subscribe to {} failed: {}", space, e);
                        break false;
                    }
                }
                Event::Control(Subscription::Leave(space)) => {
                    if let Err(e) = pubsub.unsubscribe(space.as_str()).await {
                        warn!("Unsubscribe from {} failed: {}", space, e);
                        break false;
                    }
                }
                Event::Stalled => break false,
                Event::Dropped => {
                    warn!("Redis subscriber stream ended");
                    break false;
                }
                Event::Closed => break true,
            }
        };

        self.live.store(false, Ordering::Release);
        self.watchdog.disable();
        closing
    }
}
