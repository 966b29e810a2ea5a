//! Transport configuration and reconnect policy

use rand::Rng;
use std::time::Duration;
use zentropi_proto::codec::MAX_FRAME_SIZE;

/// Exponential backoff applied when a socket transport loses its peer
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for a single delay
    pub max_backoff: Duration,
    /// Attempts before the connection goes offline
    pub max_attempts: u32,
    /// Randomize each delay by up to +/- 20%
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_attempts: 10,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never retries
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `attempt` failures
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self
            .initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff);
        if !self.jitter {
            return base;
        }
        let factor = rand::thread_rng().gen_range(0.8..=1.2);
        base.mul_f64(factor).min(self.max_backoff)
    }
}

/// Settings shared by every connection an agent opens
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Window after which a silent socket is considered stalled
    pub watchdog_timeout: Duration,
    /// Retry behavior for socket transports
    pub reconnect: ReconnectPolicy,
    /// Largest encoded frame accepted or sent
    pub max_frame_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            watchdog_timeout: Duration::from_secs(300),
            reconnect: ReconnectPolicy::default(),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl TransportConfig {
    /// Set the watchdog window
    pub fn with_watchdog_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog_timeout = timeout;
        self
    }

    /// Set the reconnect policy
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set the frame size limit
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }
}
