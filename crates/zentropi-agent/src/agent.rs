//! Agent orchestrator
//!
//! An [`Agent`] owns the handler registries, its states, timers and
//! connections. Frames received from connections are deduplicated, filtered
//! and dispatched to matching handlers; handler replies are threaded back to
//! the sender. The agent moves through [`AgentStatus`] from `Created` to
//! `Stopped` exactly once.
//!
//! ```no_run
//! use zentropi_agent::{Agent, Handler};
//!
//! # async fn demo() -> zentropi_agent::Result<()> {
//! let agent = Agent::builder("echo")
//!     .handler(Handler::on_message("hello {name}", |_, frame| {
//!         Ok(format!("hi {}", frame.get_str("name").unwrap_or("there")))
//!     }).parse())
//!     .build()?;
//! agent.bind("inmemory://lab", None).await?;
//! agent.join("lobby", None).await?;
//! agent.run().await
//! # }
//! ```

use crate::config::AgentConfig;
use crate::dedup::SeenFrames;
use crate::fields::Field;
use crate::handler::{Callback, Handler, HandlerId, Reply};
use crate::registry::Registry;
use crate::states::States;
use crate::supervisor::{panic_message, FailurePolicy, Supervisor, TaskFailure};
use crate::timer::{TimerFire, TimerScheduler};
use crate::{AgentError, Result};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zentropi_proto::frame::{DATA_MAX_SIZE, ELLIPSIS};
use zentropi_proto::{truncate_name, validate_name, Frame, FrameBuilder, Kind};
use zentropi_transport::{ConnectionContext, ConnectionRegistry, FrameSink, Runtime};

/// Prefix reserved for lifecycle events
pub const LIFECYCLE_PREFIX: &str = "***";

/// Event emitted locally when [`Agent::run`] starts
pub const STARTED: &str = "*** started";

/// Event emitted locally when [`Agent::run`] returns
pub const STOPPED: &str = "*** stopped";

/// State that ends the run loop once true
pub const SHOULD_STOP: &str = "should_stop";

/// Agent lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    /// Built, not yet running
    Created,
    /// Inside [`Agent::run`]
    Running,
    /// Stop requested, run loop winding down
    Stopping,
    /// Finished
    Stopped,
}

/// A bundle of handlers sharing state, registered together
pub trait Behavior: Send + Sync + 'static {
    /// Handlers to register
    fn handlers(self: Arc<Self>) -> Vec<Handler>;
}

/// Builder for [`Agent`]
pub struct AgentBuilder {
    config: AgentConfig,
    runtime: Option<Runtime>,
    handlers: Vec<Handler>,
}

impl AgentBuilder {
    /// Builder with default settings for an agent called `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_config(AgentConfig::new(name))
    }

    /// Builder with the given settings
    pub fn from_config(config: AgentConfig) -> Self {
        Self {
            config,
            runtime: None,
            handlers: Vec::new(),
        }
    }

    /// Share brokers with other agents of this runtime
    pub fn runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Register a handler
    pub fn handler(mut self, handler: Handler) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Register every handler of a behavior
    pub fn behavior<B: Behavior>(mut self, behavior: Arc<B>) -> Self {
        self.handlers.extend(behavior.handlers());
        self
    }

    /// Build the agent
    pub fn build(self) -> Result<Agent> {
        let config = self.config;
        validate_name(&config.name)?;
        let runtime = self.runtime.unwrap_or_default();
        let threshold = config.fuzzy_threshold;

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let ctx = ConnectionContext::new(config.name.clone(), inbox_tx.clone(), runtime.clone())
            .with_config(config.transport.clone());

        let states = States::new(config.strict_states, threshold);
        states.define(Field::new(SHOULD_STOP, false))?;

        let inner = AgentInner {
            name: config.name.clone(),
            status: Mutex::new(AgentStatus::Created),
            events: Registry::new(Kind::Event, threshold),
            messages: Registry::new(Kind::Message, threshold),
            commands: Registry::new(Kind::Command, threshold),
            requests: Registry::new(Kind::Request, threshold),
            responses: Registry::new(Kind::Response, threshold),
            states,
            timers: TimerScheduler::new(),
            seen: Mutex::new(SeenFrames::new(config.dedup_capacity)),
            connections: tokio::sync::Mutex::new(ConnectionRegistry::new(ctx)),
            inbox: inbox_tx,
            outbox: outbox_tx,
            channels: Mutex::new(Some(LoopChannels {
                inbox: inbox_rx,
                outbox: outbox_rx,
            })),
            supervisor: Supervisor::new(),
            pending: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            shutdown: Mutex::new(None),
            runtime,
            config,
        };
        let agent = Agent {
            inner: Arc::new(inner),
        };

        agent.add_handler(Handler::on_state(SHOULD_STOP, |agent, frame| {
            let value = frame.get("value").and_then(Value::as_bool).unwrap_or(false);
            let last = frame.get("last").and_then(Value::as_bool).unwrap_or(false);
            if value && !last {
                agent.begin_shutdown();
            }
            Ok(true)
        }))?;
        for handler in self.handlers {
            agent.add_handler(handler)?;
        }
        Ok(agent)
    }
}

struct LoopChannels {
    inbox: mpsc::UnboundedReceiver<Frame>,
    outbox: mpsc::UnboundedReceiver<Frame>,
}

struct AgentInner {
    name: String,
    config: AgentConfig,
    status: Mutex<AgentStatus>,
    events: Registry,
    messages: Registry,
    commands: Registry,
    requests: Registry,
    responses: Registry,
    states: States,
    timers: TimerScheduler,
    seen: Mutex<SeenFrames>,
    connections: tokio::sync::Mutex<ConnectionRegistry>,
    inbox: FrameSink,
    outbox: mpsc::UnboundedSender<Frame>,
    channels: Mutex<Option<LoopChannels>>,
    supervisor: Supervisor,
    pending: Mutex<HashMap<String, oneshot::Sender<Frame>>>,
    cancel: CancellationToken,
    shutdown: Mutex<Option<JoinHandle<()>>>,
    runtime: Runtime,
}

/// Handle to a running or runnable agent. Clones share the same agent.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.inner.name)
            .field("status", &self.status())
            .finish()
    }
}

impl Agent {
    /// Start building an agent called `name`
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(name)
    }

    /// Agent with default settings and no handlers
    pub fn new(name: impl Into<String>) -> Result<Self> {
        AgentBuilder::new(name).build()
    }

    /// Agent name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Settings the agent was built with
    pub fn config(&self) -> &AgentConfig {
        &self.inner.config
    }

    /// Lifecycle status
    pub fn status(&self) -> AgentStatus {
        *self.inner.status.lock()
    }

    /// Broker registry used for in-memory endpoints
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// State container
    pub fn states(&self) -> &States {
        &self.inner.states
    }

    fn registry(&self, kind: Kind) -> Option<&Registry> {
        match kind {
            Kind::Event => Some(&self.inner.events),
            Kind::Message => Some(&self.inner.messages),
            Kind::Command => Some(&self.inner.commands),
            Kind::Request => Some(&self.inner.requests),
            Kind::Response => Some(&self.inner.responses),
            Kind::State | Kind::Timer | Kind::Unset => None,
        }
    }

    /// Register a handler with the registry for its kind
    pub fn add_handler(&self, handler: Handler) -> Result<HandlerId> {
        let id = handler.id();
        let handler = Arc::new(handler);
        match handler.kind() {
            Kind::State => self.inner.states.add_handler(handler)?,
            Kind::Timer => {
                if self.status() != AgentStatus::Created {
                    warn!(
                        "Timer {:?} registered after start will not fire",
                        handler.pattern()
                    );
                }
                self.inner.timers.add_handler(handler)?
            }
            Kind::Unset => {
                return Err(AgentError::InvalidHandler(format!(
                    "handler {:?} has no frame kind",
                    handler.pattern()
                )))
            }
            kind => match self.registry(kind) {
                Some(registry) => registry.add_handler(handler)?,
                None => {
                    return Err(AgentError::InvalidHandler(format!(
                        "no registry for {} handlers",
                        kind
                    )))
                }
            },
        }
        debug!("Agent {} registered handler {}", self.name(), id);
        Ok(id)
    }

    /// Unregister handler `id` from `pattern`
    pub fn remove_handler(&self, kind: Kind, pattern: &str, id: HandlerId) -> Result<()> {
        match kind {
            Kind::State => self.inner.states.remove_handler(pattern, id)?,
            Kind::Timer => self.inner.timers.remove_handler(pattern, id)?,
            kind => match self.registry(kind) {
                Some(registry) => registry.remove_handler(pattern, id)?,
                None => {
                    return Err(AgentError::HandlerNotFound {
                        pattern: pattern.to_string(),
                        id: id.get(),
                    })
                }
            },
        };
        Ok(())
    }

    /// Build a frame from this agent and queue it for every connection.
    ///
    /// Events are also dispatched to the agent's own handlers. Internal
    /// frames never leave the agent.
    pub fn send(&self, builder: FrameBuilder) -> Result<Frame> {
        let frame = builder.source(self.name()).build()?;
        let frame = match frame.kind() {
            Kind::Event => self.inner.events.emit(frame.to_builder(), |matched, handler| {
                self.run_handler(matched, handler)
            })?,
            _ => frame,
        };
        self.queue(&frame);
        Ok(frame)
    }

    /// Emit an event
    pub fn emit(&self, name: &str, data: Map<String, Value>) -> Result<Frame> {
        self.send(Frame::event(name).data(data))
    }

    /// Send a free-text message
    pub fn message(&self, text: &str) -> Result<Frame> {
        self.send(Frame::message_text(text))
    }

    /// Send a command
    pub fn command(&self, name: &str, data: Map<String, Value>) -> Result<Frame> {
        self.send(Frame::command(name).data(data))
    }

    /// Send a request and wait for the response threaded to it.
    ///
    /// Waits `timeout`, or the configured request timeout when `None`.
    pub async fn request(
        &self,
        name: &str,
        data: Map<String, Value>,
        timeout: Option<Duration>,
    ) -> Result<Frame> {
        let frame = Frame::request(name).data(data).source(self.name()).build()?;
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(frame.id().to_string(), tx);
        self.queue(&frame);

        let timeout = timeout.unwrap_or(self.inner.config.request_timeout);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            _ => {
                self.inner.pending.lock().remove(frame.id());
                debug!("Request {} timed out after {:?}", frame, timeout);
                Err(AgentError::Timeout(timeout))
            }
        }
    }

    /// Change a state; returns false when a state handler vetoed
    pub fn set_state(&self, name: &str, value: impl Into<Value>) -> Result<bool> {
        self.inner
            .states
            .set(name, value.into(), |frame, handler| self.invoke_state(frame, handler))
    }

    /// Current value of a state
    pub fn state(&self, name: &str) -> Result<Option<Value>> {
        self.inner.states.get(name)
    }

    /// Whether a stop was requested
    pub fn should_stop(&self) -> bool {
        self.inner.states.value(SHOULD_STOP) == Some(Value::Bool(true))
    }

    /// Connect to an existing endpoint
    pub async fn connect(&self, endpoint: &str, auth: Option<&str>, tag: Option<&str>) -> Result<()> {
        self.inner
            .connections
            .lock()
            .await
            .connect(endpoint, auth, tag)
            .await?;
        info!("Agent {} connected to {}", self.name(), endpoint);
        Ok(())
    }

    /// Create an endpoint and attach to it
    pub async fn bind(&self, endpoint: &str, tag: Option<&str>) -> Result<()> {
        self.inner.connections.lock().await.bind(endpoint, tag).await?;
        info!("Agent {} bound {}", self.name(), endpoint);
        Ok(())
    }

    /// Join a space on the connections selected by `tags`
    pub async fn join(&self, space: &str, tags: Option<&str>) -> Result<()> {
        self.inner.connections.lock().await.join(space, tags).await?;
        Ok(())
    }

    /// Leave a space on the connections selected by `tags`
    pub async fn leave(&self, space: &str, tags: Option<&str>) -> Result<()> {
        self.inner.connections.lock().await.leave(space, tags).await?;
        Ok(())
    }

    /// Close connections by endpoint, by tags, or all of them
    pub async fn close(&self, endpoint: Option<&str>, tags: Option<&str>) -> Result<usize> {
        Ok(self.inner.connections.lock().await.close(endpoint, tags).await?)
    }

    /// Whether any connection is usable
    pub async fn is_connected(&self) -> bool {
        self.inner.connections.lock().await.is_connected()
    }

    /// Spaces joined across all connections
    pub async fn spaces(&self) -> Vec<String> {
        self.inner.connections.lock().await.spaces()
    }

    /// Run `task` under the agent's supervisor
    pub fn spawn<F>(&self, label: &str, task: F) -> JoinHandle<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner
            .supervisor
            .spawn(label.to_string(), "spawned task".to_string(), task)
    }

    /// Run blocking `work` on the blocking pool. Its result comes back as an
    /// internal event `name` handled by the run loop.
    pub fn spawn_blocking<F>(&self, name: &str, work: F) -> JoinHandle<()>
    where
        F: FnOnce() -> anyhow::Result<Map<String, Value>> + Send + 'static,
    {
        let agent = self.clone();
        let event = name.to_string();
        self.spawn(name, async move {
            let data = tokio::task::spawn_blocking(work).await??;
            let frame = Frame::event(event)
                .data(data)
                .source(agent.name())
                .internal(true)
                .build()?;
            agent
                .inner
                .inbox
                .send(frame)
                .map_err(|_| anyhow::anyhow!("agent inbox is closed"))?;
            Ok(())
        })
    }

    /// Request a stop.
    ///
    /// Sets `should_stop`; its built-in state handler cancels timers and
    /// arranges for every connection to be closed once.
    pub fn stop(&self) -> Result<()> {
        if matches!(self.status(), AgentStatus::Stopping | AgentStatus::Stopped) || self.should_stop() {
            return Err(AgentError::AlreadyStopping);
        }
        info!("Stopping agent {}", self.name());
        if !self.set_state(SHOULD_STOP, true)? {
            warn!("Stop of agent {} was vetoed", self.name());
        }
        Ok(())
    }

    fn begin_shutdown(&self) {
        self.inner.cancel.cancel();
        let mut status = self.inner.status.lock();
        match *status {
            AgentStatus::Running => *status = AgentStatus::Stopping,
            AgentStatus::Created => {
                *status = AgentStatus::Stopped;
                drop(status);
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        let agent = self.clone();
                        let task = handle.spawn(async move { agent.close_all().await });
                        *self.inner.shutdown.lock() = Some(task);
                    }
                    Err(_) => debug!("Agent {} stopped outside a runtime", self.name()),
                }
            }
            AgentStatus::Stopping | AgentStatus::Stopped => {}
        }
    }

    async fn close_all(&self) {
        match self.inner.connections.lock().await.close(None, None).await {
            Ok(closed) => debug!("Agent {} closed {} connections", self.name(), closed),
            Err(e) => warn!("Agent {} failed to close connections: {}", self.name(), e),
        }
    }

    /// Process one received frame.
    ///
    /// Duplicates, echoes of the agent's own messages, and lifecycle events
    /// or states from other agents are dropped. Responses to pending requests complete
    /// the request; everything else goes to the matching handlers.
    pub fn handle_frame(&self, frame: Frame) {
        if !self.inner.seen.lock().insert(frame.id()) {
            debug!("Dropping duplicate {}", frame);
            return;
        }
        let own = frame.source() == Some(self.name());
        match frame.kind() {
            Kind::Message if own => {
                debug!("Dropping echo of {}", frame);
                return;
            }
            Kind::Event if !own && frame.name().starts_with(LIFECYCLE_PREFIX) => {
                debug!("Dropping foreign lifecycle event {}", frame);
                return;
            }
            // state handlers run only for changes committed through set_state
            Kind::State if !own => {
                debug!("Dropping foreign state {}", frame);
                return;
            }
            Kind::Response => {
                let waiter = frame
                    .reply_to()
                    .and_then(|id| self.inner.pending.lock().remove(id));
                if let Some(waiter) = waiter {
                    if waiter.send(frame).is_err() {
                        debug!("Requester gave up before the response arrived");
                    }
                    return;
                }
            }
            Kind::Unset | Kind::Timer => {
                debug!("Ignoring {} frame {}", frame.kind(), frame);
                return;
            }
            _ => {}
        }
        self.dispatch(&frame);
    }

    fn dispatch(&self, frame: &Frame) {
        let matched = match frame.kind() {
            Kind::State => self.inner.states.resolve(frame),
            kind => self.registry(kind).and_then(|r| r.resolve(frame)),
        };
        let Some(matched) = matched else {
            debug!("No handler for {}", frame);
            return;
        };
        for handler in &matched.handlers {
            self.run_handler(&matched.frame, handler);
        }
    }

    fn filters_pass(&self, handler: &Handler) -> bool {
        handler
            .filters()
            .iter()
            .all(|(state, expected)| self.inner.states.value(state).as_ref() == Some(expected))
    }

    fn run_handler(&self, frame: &Frame, handler: &Arc<Handler>) {
        if !self.filters_pass(handler) {
            debug!("Handler {} filtered out for {}", handler, frame);
            return;
        }
        if !handler.try_acquire(Instant::now()) {
            debug!("Handler {} rate limited", handler);
            return;
        }

        match handler.callback() {
            Callback::Sync(callback) => {
                let outcome = catch_unwind(AssertUnwindSafe(|| callback(self, frame)));
                let error = match outcome {
                    Ok(Ok(reply)) => match self.handle_reply(frame, reply) {
                        Ok(_) => return,
                        Err(e) => e.to_string(),
                    },
                    Ok(Err(e)) => format!("{:#}", e),
                    Err(payload) => panic_message(payload),
                };
                self.inner.supervisor.report(TaskFailure {
                    handler: handler.to_string(),
                    frame: frame.to_string(),
                    error,
                });
            }
            Callback::Async(callback) => {
                let task = callback(self.clone(), frame.clone());
                let agent = self.clone();
                let trigger = frame.clone();
                self.inner
                    .supervisor
                    .spawn(handler.to_string(), frame.to_string(), async move {
                        let reply = task.await?;
                        agent.handle_reply(&trigger, reply)?;
                        Ok(())
                    });
            }
        }
    }

    fn invoke_state(&self, frame: &Frame, handler: &Arc<Handler>) -> Result<Reply> {
        match handler.callback() {
            Callback::Sync(callback) => Ok(callback(self, frame)?),
            Callback::Async(_) => Err(AgentError::InvalidHandler(format!(
                "state handler {} must be synchronous",
                handler
            ))),
        }
    }

    /// Turn a text reply into a frame threaded to `trigger`: a response for
    /// requests, a message otherwise
    fn handle_reply(&self, trigger: &Frame, reply: Reply) -> Result<Option<Frame>> {
        let Reply::Text(text) = reply else {
            return Ok(None);
        };
        let name = truncate_name(&text);
        let builder = match trigger.kind() {
            Kind::Request => Frame::response(name),
            _ => Frame::message(name),
        };
        let mut builder = builder
            .with("text", fit_reply_text(text))
            .reply_to(trigger.id())
            .maybe_space(trigger.space().map(str::to_string));
        if let Some(source) = trigger.source() {
            builder = builder.target(source);
        }
        self.send(builder).map(Some)
    }

    fn queue(&self, frame: &Frame) {
        self.inner.seen.lock().insert(frame.id());
        if frame.is_internal() {
            return;
        }
        if self.inner.outbox.send(frame.clone()).is_err() {
            debug!("Agent {} has stopped, {} not transmitted", self.name(), frame);
        }
    }

    async fn transmit(&self, frame: Frame) {
        let mut connections = self.inner.connections.lock().await;
        if connections.is_empty() {
            debug!("No connection to carry {}", frame);
            return;
        }
        let tags = connections.tags().join(",");
        match connections.broadcast(&frame, Some(&tags)).await {
            Ok(0) => warn!("{} reached no connection", frame),
            Ok(sent) => debug!("{} sent on {} connections", frame, sent),
            Err(e) => warn!("Broadcast of {} failed: {}", frame, e),
        }
    }

    fn on_failure(&self, failure: TaskFailure) {
        error!("Agent {}: {}", self.name(), failure);
        if self.inner.config.failure_policy == FailurePolicy::Stop && !self.should_stop() {
            if let Err(e) = self.stop() {
                debug!("Stop after failure not needed: {}", e);
            }
        }
    }

    /// Run until stopped.
    ///
    /// Emits `*** started`, starts timers and then serves received frames,
    /// outgoing frames and handler failures, waking every `idle_tick`. Once
    /// `should_stop` is set the outbox is flushed, timers end, connections
    /// are closed and `*** stopped` is emitted.
    pub async fn run(&self) -> Result<()> {
        {
            let mut status = self.inner.status.lock();
            if *status != AgentStatus::Created {
                return Err(AgentError::AlreadyRunning);
            }
            *status = AgentStatus::Running;
        }
        let channels = self.inner.channels.lock().take();
        let failures = self.inner.supervisor.take_failures();
        let (Some(mut channels), Some(mut failures)) = (channels, failures) else {
            return Err(AgentError::AlreadyRunning);
        };

        info!("Agent {} running", self.name());
        self.send(Frame::event(STARTED).internal(true))?;

        let agent = self.clone();
        let fire: TimerFire = Arc::new(move |frame: &Frame, handler: &Arc<Handler>| {
            agent.run_handler(frame, handler)
        });
        let timers = self.inner.timers.start(fire, self.inner.cancel.child_token());

        let mut tick = tokio::time::interval(self.inner.config.idle_tick.max(Duration::from_millis(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.should_stop() {
            tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => break,
                Some(failure) = failures.recv() => self.on_failure(failure),
                Some(frame) = channels.inbox.recv() => self.handle_frame(frame),
                Some(frame) = channels.outbox.recv() => self.transmit(frame).await,
                _ = tick.tick() => {}
            }
        }

        while let Ok(frame) = channels.outbox.try_recv() {
            self.transmit(frame).await;
        }
        futures::future::join_all(timers).await;

        let close = self.inner.shutdown.lock().take();
        match close {
            Some(task) => {
                if let Err(e) = task.await {
                    warn!("Closing connections of {} failed: {}", self.name(), e);
                }
            }
            None => self.close_all().await,
        }
        while let Ok(failure) = failures.try_recv() {
            error!("Agent {}: {}", self.name(), failure);
        }

        let stopped = self.send(Frame::event(STOPPED).internal(true)).map(|_| ());
        *self.inner.status.lock() = AgentStatus::Stopped;
        info!("Agent {} stopped", self.name());
        stopped
    }
}

/// Longest prefix of `text` whose `{"text": ...}` payload stays under the
/// frame data bound, marked with an ellipsis when cut
fn fit_reply_text(text: String) -> String {
    let fits = |candidate: &str| {
        serde_json::to_vec(&serde_json::json!({ "text": candidate }))
            .map_or(false, |encoded| encoded.len() < DATA_MAX_SIZE)
    };
    if fits(&text) {
        return text;
    }
    let ends: Vec<usize> = text.char_indices().map(|(at, _)| at).collect();
    let cut = |chars: usize| format!("{}{}", &text[..ends[chars]], ELLIPSIS);
    let (mut low, mut high) = (0, ends.len() - 1);
    while low < high {
        let mid = (low + high + 1) / 2;
        if fits(&cut(mid)) {
            low = mid;
        } else {
            high = mid - 1;
        }
    }
    cut(low)
}
