//! Supervision of background handler tasks
//!
//! Every spawned handler runs under [`Supervisor::spawn`]. Errors and panics
//! are caught and reported as [`TaskFailure`]s, which the agent loop drains
//! and acts on according to its [`FailurePolicy`].

use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// What the agent does when a handler fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop the agent
    #[default]
    Stop,
    /// Log and keep running
    Log,
}

/// A failed handler invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// Handler description
    pub handler: String,
    /// Triggering frame description
    pub frame: String,
    /// Error or panic message
    pub error: String,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler {} failed on {}: {}", self.handler, self.frame, self.error)
    }
}

/// Spawns handler tasks and collects their failures
#[derive(Debug)]
pub struct Supervisor {
    tx: mpsc::UnboundedSender<TaskFailure>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<TaskFailure>>>,
    active: Arc<AtomicUsize>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

impl Supervisor {
    /// Create a supervisor with an empty failure queue
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run `task` in the background, reporting an error or panic
    pub fn spawn<F>(&self, handler: String, frame: String, task: F) -> JoinHandle<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let tx = self.tx.clone();
        let active = Arc::clone(&self.active);
        active.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(task).catch_unwind().await;
            active.fetch_sub(1, Ordering::SeqCst);
            let error = match outcome {
                Ok(Ok(())) => return,
                Ok(Err(e)) => format!("{:#}", e),
                Err(payload) => panic_message(payload),
            };
            let failure = TaskFailure {
                handler,
                frame,
                error,
            };
            if tx.send(failure).is_err() {
                debug!("Failure report dropped, supervisor receiver is gone");
            }
        })
    }

    /// Report a failure from an inline handler
    pub fn report(&self, failure: TaskFailure) {
        if self.tx.send(failure).is_err() {
            debug!("Failure report dropped, supervisor receiver is gone");
        }
    }

    /// Take the failure receiver; only the first call gets it
    pub fn take_failures(&self) -> Option<mpsc::UnboundedReceiver<TaskFailure>> {
        self.rx.lock().take()
    }

    /// Number of tasks still running
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}
