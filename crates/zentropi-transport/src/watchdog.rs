//! Liveness watchdog for socket transports

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Progress counter checked once per timeout window.
///
/// The reader feeds it on every received frame. A window without progress
/// while enabled wakes whoever waits on [`Watchdog::stalled`].
#[derive(Debug, Clone)]
pub struct Watchdog {
    counter: Arc<AtomicU64>,
    enabled: Arc<AtomicBool>,
    stall: Arc<Notify>,
    cancel: CancellationToken,
    timeout: Duration,
}

impl Watchdog {
    /// Create a disabled watchdog
    pub fn new(timeout: Duration) -> Self {
        Self {
            counter: Arc::new(AtomicU64::new(0)),
            enabled: Arc::new(AtomicBool::new(false)),
            stall: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
            timeout,
        }
    }

    /// Record progress
    pub fn feed(&self) {
        self.counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Start checking for progress
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    /// Stop checking; used while the connection is closing
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// Whether stalls are currently reported
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Number of feeds so far
    pub fn fed(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Resolves when a stall is detected
    pub async fn stalled(&self) {
        self.stall.notified().await
    }

    /// Stop the check loop for good
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Spawn the check loop
    pub fn spawn(&self) -> JoinHandle<()> {
        let watchdog = self.clone();
        tokio::spawn(async move { watchdog.run().await })
    }

    async fn run(self) {
        let mut last = self.fed();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("Watchdog cancelled");
                    return;
                }
                _ = tokio::time::sleep(self.timeout) => {}
            }
            let current = self.fed();
            if !self.is_enabled() {
                last = current;
                continue;
            }
            if current <= last {
                warn!("No traffic for {:?}, forcing reconnect", self.timeout);
                self.stall.notify_one();
            }
            last = current;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_stall_detected_without_progress() {
        let watchdog = Watchdog::new(Duration::from_secs(300));
        watchdog.enable();
        let handle = watchdog.spawn();

        tokio::time::timeout(Duration::from_secs(301), watchdog.stalled())
            .await
            .expect("stall should be reported");

        watchdog.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_feeding_prevents_stall() {
        let watchdog = Watchdog::new(Duration::from_secs(10));
        watchdog.enable();
        let handle = watchdog.spawn();

        let feeder = {
            let watchdog = watchdog.clone();
            tokio::spawn(async move {
                for _ in 0..10 {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    watchdog.feed();
                }
            })
        };

        let result = tokio::time::timeout(Duration::from_secs(25), watchdog.stalled()).await;
        assert!(result.is_err());

        feeder.await.unwrap();
        watchdog.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_watchdog_stays_quiet() {
        let watchdog = Watchdog::new(Duration::from_secs(5));
        let handle = watchdog.spawn();

        let result = tokio::time::timeout(Duration::from_secs(30), watchdog.stalled()).await;
        assert!(result.is_err());

        watchdog.cancel();
        handle.await.unwrap();
    }
}
