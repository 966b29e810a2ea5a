//! Handler definitions
//!
//! A [`Handler`] couples a callback with the rules deciding which frames it
//! sees: the frame kind, a pattern, how the pattern is matched, state
//! filters and an optional rate limit.

use crate::agent::Agent;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use zentropi_proto::{Frame, Kind};

/// Pattern that matches any frame nothing else matched
pub const CATCH_ALL: &str = "*";

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique handler identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    fn next() -> Self {
        Self(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a handler pattern is compared with a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MatchMode {
    /// Name equality
    #[default]
    Exact,
    /// Template with `{field}` placeholders
    Parse,
    /// Token-sort similarity above a threshold
    Fuzzy,
}

/// What a handler hands back to the agent
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Reply {
    /// No follow-up
    #[default]
    Nothing,
    /// Answer the triggering frame with this text. Text too large for a
    /// frame is cut to fit and ends with an ellipsis.
    Text(String),
    /// Accept or veto a state change
    Accept(bool),
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Self::Nothing
    }
}

impl From<bool> for Reply {
    fn from(accept: bool) -> Self {
        Self::Accept(accept)
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl<T: Into<Reply>> From<Option<T>> for Reply {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

/// Inline callback; blocks dispatch until it returns
pub type SyncCallback = Arc<dyn Fn(&Agent, &Frame) -> anyhow::Result<Reply> + Send + Sync>;

/// Background callback; runs as a supervised task
pub type AsyncCallback =
    Arc<dyn Fn(Agent, Frame) -> BoxFuture<'static, anyhow::Result<Reply>> + Send + Sync>;

/// Handler body
#[derive(Clone)]
pub enum Callback {
    /// Runs inline
    Sync(SyncCallback),
    /// Spawned
    Async(AsyncCallback),
}

/// Callback plus match configuration
pub struct Handler {
    id: HandlerId,
    kind: Kind,
    pattern: String,
    mode: MatchMode,
    ignore_case: bool,
    filters: BTreeMap<String, Value>,
    rate_limit: Option<Duration>,
    last_run: Mutex<Option<Instant>>,
    callback: Callback,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("pattern", &self.pattern)
            .field("mode", &self.mode)
            .field("ignore_case", &self.ignore_case)
            .field("filters", &self.filters)
            .field("rate_limit", &self.rate_limit)
            .field("run_async", &self.run_async())
            .finish()
    }
}

impl fmt::Display for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?} {}", self.kind, self.pattern, self.id)
    }
}

impl Handler {
    /// Handler running inline on the dispatch path
    pub fn sync<F, R>(kind: Kind, pattern: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&Agent, &Frame) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Into<Reply>,
    {
        let body: SyncCallback = Arc::new(move |agent: &Agent, frame: &Frame| {
            callback(agent, frame).map(Into::<Reply>::into)
        });
        Self::with_callback(kind, pattern, Callback::Sync(body))
    }

    /// Handler spawned as a background task per matching frame
    pub fn asynchronous<F, Fut, R>(kind: Kind, pattern: impl Into<String>, callback: F) -> Self
    where
        F: Fn(Agent, Frame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<Reply>,
    {
        let body: AsyncCallback = Arc::new(move |agent: Agent, frame: Frame| {
            callback(agent, frame)
                .map(|result| result.map(Into::<Reply>::into))
                .boxed()
        });
        Self::with_callback(kind, pattern, Callback::Async(body))
    }

    fn with_callback(kind: Kind, pattern: impl Into<String>, callback: Callback) -> Self {
        Self {
            id: HandlerId::next(),
            kind,
            pattern: pattern.into(),
            mode: MatchMode::Exact,
            ignore_case: false,
            filters: BTreeMap::new(),
            rate_limit: None,
            last_run: Mutex::new(None),
            callback,
        }
    }

    /// Inline event handler
    pub fn on_event<F, R>(pattern: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&Agent, &Frame) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Into<Reply>,
    {
        Self::sync(Kind::Event, pattern, callback)
    }

    /// Inline message handler
    pub fn on_message<F, R>(pattern: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&Agent, &Frame) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Into<Reply>,
    {
        Self::sync(Kind::Message, pattern, callback)
    }

    /// Inline state handler; must answer with [`Reply::Accept`]
    pub fn on_state<F, R>(pattern: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&Agent, &Frame) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Into<Reply>,
    {
        Self::sync(Kind::State, pattern, callback)
    }

    /// Timer handler firing every `seconds`
    pub fn on_timer<F>(seconds: f64, callback: F) -> Self
    where
        F: Fn(&Agent, &Frame) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::sync(Kind::Timer, seconds.to_string(), callback)
    }

    /// Match with a parse template
    pub fn parse(mut self) -> Self {
        self.mode = MatchMode::Parse;
        self
    }

    /// Match by fuzzy similarity
    pub fn fuzzy(mut self) -> Self {
        self.mode = MatchMode::Fuzzy;
        self
    }

    /// Set the match mode
    pub fn mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Accept exact matches regardless of case
    pub fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    /// Only run while `state` equals `value`
    pub fn filter(mut self, state: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(state.into(), value.into());
        self
    }

    /// Skip invocations closer together than `interval`
    pub fn rate_limit(mut self, interval: Duration) -> Self {
        self.rate_limit = Some(interval);
        self
    }

    /// Handler identity
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Frame kind routed to this handler
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Pattern as registered
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Match mode
    pub fn match_mode(&self) -> MatchMode {
        self.mode
    }

    /// Whether exact matching ignores case
    pub fn is_ignore_case(&self) -> bool {
        self.ignore_case
    }

    /// Required state values
    pub fn filters(&self) -> &BTreeMap<String, Value> {
        &self.filters
    }

    /// Minimum interval between invocations
    pub fn rate_limit_interval(&self) -> Option<Duration> {
        self.rate_limit
    }

    /// True for spawned handlers
    pub fn run_async(&self) -> bool {
        matches!(self.callback, Callback::Async(_))
    }

    /// Handler body
    pub fn callback(&self) -> &Callback {
        &self.callback
    }

    /// Claim an invocation slot at `now`. Always succeeds without a rate limit.
    pub fn try_acquire(&self, now: Instant) -> bool {
        let Some(interval) = self.rate_limit else {
            return true;
        };
        let mut last = self.last_run.lock();
        match *last {
            Some(previous) if now.saturating_duration_since(previous) < interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}
