//! Interval timers
//!
//! Timer handlers are keyed by their pattern, a number of seconds. Each
//! distinct interval gets one task that sleeps, checks for cancellation and
//! then fires every handler registered at that interval.

use crate::handler::{Handler, HandlerId};
use crate::{AgentError, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use zentropi_proto::{Frame, Kind};

/// Called for each handler when its interval elapses
pub type TimerFire = Arc<dyn Fn(&Frame, &Arc<Handler>) + Send + Sync>;

/// Parse a timer pattern into a period
pub fn parse_interval(pattern: &str) -> Result<Duration> {
    let seconds: f64 = pattern
        .trim()
        .parse()
        .map_err(|_| AgentError::InvalidInterval(pattern.to_string()))?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(AgentError::InvalidInterval(pattern.to_string()));
    }
    Duration::try_from_secs_f64(seconds).map_err(|_| AgentError::InvalidInterval(pattern.to_string()))
}

#[derive(Debug)]
struct Slot {
    period: Duration,
    handlers: Vec<Arc<Handler>>,
}

/// Timer handlers grouped by interval
#[derive(Debug, Default)]
pub struct TimerScheduler {
    slots: Arc<Mutex<BTreeMap<String, Slot>>>,
}

impl TimerScheduler {
    /// Empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a timer handler
    pub fn add_handler(&self, handler: Arc<Handler>) -> Result<()> {
        if handler.kind() != Kind::Timer {
            return Err(AgentError::InvalidHandler(format!(
                "{} handler offered to timers",
                handler.kind()
            )));
        }
        let period = parse_interval(handler.pattern())?;
        let mut slots = self.slots.lock();
        let slot = slots.entry(handler.pattern().to_string()).or_insert_with(|| Slot {
            period,
            handlers: Vec::new(),
        });
        if slot.handlers.iter().any(|h| h.id() == handler.id()) {
            return Err(AgentError::DuplicateHandler {
                pattern: handler.pattern().to_string(),
                id: handler.id().get(),
            });
        }
        slot.handlers.push(handler);
        Ok(())
    }

    /// Unregister handler `id` from interval `pattern`
    pub fn remove_handler(&self, pattern: &str, id: HandlerId) -> Result<Arc<Handler>> {
        let mut slots = self.slots.lock();
        let not_found = || AgentError::HandlerNotFound {
            pattern: pattern.to_string(),
            id: id.get(),
        };
        let slot = slots.get_mut(pattern).ok_or_else(not_found)?;
        let position = slot
            .handlers
            .iter()
            .position(|h| h.id() == id)
            .ok_or_else(not_found)?;
        let handler = slot.handlers.remove(position);
        if slot.handlers.is_empty() {
            slots.remove(pattern);
        }
        Ok(handler)
    }

    /// Distinct intervals
    pub fn intervals(&self) -> Vec<Duration> {
        self.slots.lock().values().map(|s| s.period).collect()
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.slots.lock().values().map(|s| s.handlers.len()).sum()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Spawn one task per interval, running until `cancel` fires or the
    /// interval loses its last handler
    pub fn start(&self, fire: TimerFire, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let slots = self.slots.lock();
        slots
            .iter()
            .map(|(key, slot)| {
                let key = key.clone();
                let period = slot.period;
                let slots = Arc::clone(&self.slots);
                let fire = Arc::clone(&fire);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    debug!("Timer {} started", key);
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(period) => {}
                        }
                        let handlers = match slots.lock().get(&key) {
                            Some(slot) => slot.handlers.clone(),
                            None => break,
                        };
                        let frame = match Frame::timer(key.as_str()) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!("Timer {} cannot build its frame: {}", key, e);
                                break;
                            }
                        };
                        for handler in &handlers {
                            fire(&frame, handler);
                        }
                    }
                    debug!("Timer {} stopped", key);
                })
            })
            .collect()
    }
}
