//! Process-wide registry of in-memory brokers keyed by endpoint

use crate::broker::SpaceBroker;
use crate::{Result, TransportError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Broker registry handed to every agent sharing in-memory endpoints.
///
/// Cloning is cheap; clones share the same brokers.
#[derive(Debug, Clone, Default)]
pub struct Runtime {
    brokers: Arc<Mutex<HashMap<String, Arc<SpaceBroker>>>>,
}

impl Runtime {
    /// Create an empty runtime
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the broker for `endpoint`; fails if one is already bound
    pub fn bind(&self, endpoint: &str) -> Result<Arc<SpaceBroker>> {
        let mut brokers = self.brokers.lock();
        if brokers.contains_key(endpoint) {
            return Err(TransportError::AlreadyBound(endpoint.to_string()));
        }
        let broker = Arc::new(SpaceBroker::new());
        brokers.insert(endpoint.to_string(), Arc::clone(&broker));
        info!("Bound in-memory broker at {}", endpoint);
        Ok(broker)
    }

    /// Look up the broker bound at `endpoint`
    pub fn broker(&self, endpoint: &str) -> Result<Arc<SpaceBroker>> {
        self.brokers
            .lock()
            .get(endpoint)
            .cloned()
            .ok_or_else(|| TransportError::NotBound(endpoint.to_string()))
    }

    /// Remove one broker, disconnecting its agents
    pub fn unbind(&self, endpoint: &str) -> Option<Arc<SpaceBroker>> {
        let broker = self.brokers.lock().remove(endpoint)?;
        broker.shutdown();
        Some(broker)
    }

    /// Bound endpoints
    pub fn endpoints(&self) -> Vec<String> {
        let mut endpoints: Vec<_> = self.brokers.lock().keys().cloned().collect();
        endpoints.sort();
        endpoints
    }

    /// Tear down every broker
    pub fn shutdown(&self) {
        let brokers: Vec<_> = self.brokers.lock().drain().collect();
        for (endpoint, broker) in brokers {
            broker.shutdown();
            info!("Shut down in-memory broker at {}", endpoint);
        }
    }
}
