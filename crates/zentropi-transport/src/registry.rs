//! Tagged registry of an agent's connections

use crate::connection::{build_connection, Connection, ConnectionContext};
use crate::{Result, TransportError};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};
use zentropi_proto::Frame;

/// Tag used when none is given
pub const DEFAULT_TAG: &str = "default";

/// Split a comma-separated tag list. Empty input selects the default tag.
pub fn parse_tags(tags: Option<&str>) -> Vec<String> {
    let parsed: Vec<String> = tags
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    if parsed.is_empty() {
        vec![DEFAULT_TAG.to_string()]
    } else {
        parsed
    }
}

struct Entry {
    endpoint: String,
    connection: Box<dyn Connection>,
}

/// Connections of one agent, indexed by tag and by endpoint
pub struct ConnectionRegistry {
    ctx: ConnectionContext,
    next_id: u64,
    connections: BTreeMap<u64, Entry>,
    tags: BTreeMap<String, BTreeSet<u64>>,
    endpoints: BTreeMap<String, BTreeSet<u64>>,
}

impl ConnectionRegistry {
    /// Create an empty registry; new connections receive `ctx`
    pub fn new(ctx: ConnectionContext) -> Self {
        Self {
            ctx,
            next_id: 0,
            connections: BTreeMap::new(),
            tags: BTreeMap::new(),
            endpoints: BTreeMap::new(),
        }
    }

    /// Open a connection to an existing endpoint
    pub async fn connect(&mut self, endpoint: &str, auth: Option<&str>, tag: Option<&str>) -> Result<()> {
        let mut connection = build_connection(endpoint, self.ctx.clone())?;
        connection.connect(endpoint, auth).await?;
        self.insert(endpoint, tag, connection);
        Ok(())
    }

    /// Create an endpoint and attach to it
    pub async fn bind(&mut self, endpoint: &str, tag: Option<&str>) -> Result<()> {
        let mut connection = build_connection(endpoint, self.ctx.clone())?;
        connection.bind(endpoint).await?;
        self.insert(endpoint, tag, connection);
        Ok(())
    }

    /// Track an already-opened connection
    pub fn register(&mut self, endpoint: &str, tag: Option<&str>, connection: Box<dyn Connection>) {
        self.insert(endpoint, tag, connection);
    }

    fn insert(&mut self, endpoint: &str, tag: Option<&str>, connection: Box<dyn Connection>) {
        let id = self.next_id;
        self.next_id += 1;
        let tags = parse_tags(tag);
        self.connections.insert(
            id,
            Entry {
                endpoint: endpoint.to_string(),
                connection,
            },
        );
        for tag in &tags {
            self.tags.entry(tag.clone()).or_default().insert(id);
        }
        self.endpoints.entry(endpoint.to_string()).or_default().insert(id);
        info!("Registered connection to {} under tags {:?}", endpoint, tags);
    }

    fn select_tags(&self, tags: Option<&str>) -> Result<BTreeSet<u64>> {
        let mut ids = BTreeSet::new();
        for tag in parse_tags(tags) {
            match self.tags.get(&tag) {
                Some(members) => ids.extend(members.iter().copied()),
                None => {
                    return Err(TransportError::UnknownTag {
                        tag,
                        known: self.tags.keys().cloned().collect(),
                    })
                }
            }
        }
        Ok(ids)
    }

    /// Join a space on every selected connection
    pub async fn join(&mut self, space: &str, tags: Option<&str>) -> Result<()> {
        for id in self.select_tags(tags)? {
            if let Some(entry) = self.connections.get_mut(&id) {
                entry.connection.join(space).await?;
            }
        }
        Ok(())
    }

    /// Leave a space on every selected connection
    pub async fn leave(&mut self, space: &str, tags: Option<&str>) -> Result<()> {
        for id in self.select_tags(tags)? {
            if let Some(entry) = self.connections.get_mut(&id) {
                entry.connection.leave(space).await?;
            }
        }
        Ok(())
    }

    /// Send a frame on every selected connection.
    ///
    /// A failing connection is logged and skipped. Returns how many accepted
    /// the frame.
    pub async fn broadcast(&mut self, frame: &Frame, tags: Option<&str>) -> Result<usize> {
        let mut sent = 0;
        for id in self.select_tags(tags)? {
            if let Some(entry) = self.connections.get_mut(&id) {
                match entry.connection.broadcast(frame).await {
                    Ok(()) => sent += 1,
                    Err(e) => warn!("Broadcast of {} on {} failed: {}", frame, entry.endpoint, e),
                }
            }
        }
        Ok(sent)
    }

    /// Close connections by endpoint, by tags, or all of them.
    ///
    /// Giving both an endpoint and tags is an error. Returns the number of
    /// connections closed.
    pub async fn close(&mut self, endpoint: Option<&str>, tags: Option<&str>) -> Result<usize> {
        let ids: BTreeSet<u64> = match (endpoint, tags) {
            (Some(_), Some(_)) => {
                return Err(TransportError::InvalidSelection(
                    "close accepts an endpoint or tags, not both".to_string(),
                ))
            }
            (Some(endpoint), None) => self.endpoints.get(endpoint).cloned().unwrap_or_default(),
            (None, Some(_)) => self.select_tags(tags)?,
            (None, None) => self.connections.keys().copied().collect(),
        };

        let mut closed = 0;
        for id in ids {
            let Some(mut entry) = self.connections.remove(&id) else {
                continue;
            };
            if let Err(e) = entry.connection.close().await {
                warn!("Closing {} failed: {}", entry.endpoint, e);
            }
            closed += 1;
            debug!("Closed connection to {}", entry.endpoint);
        }
        self.prune();
        Ok(closed)
    }

    fn prune(&mut self) {
        let live = &self.connections;
        for index in [&mut self.tags, &mut self.endpoints] {
            index.retain(|_, ids| {
                ids.retain(|id| live.contains_key(id));
                !ids.is_empty()
            });
        }
    }

    /// True when any registered connection is usable
    pub fn is_connected(&self) -> bool {
        self.connections.values().any(|e| e.connection.is_connected())
    }

    /// Number of registered connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Registered tags
    pub fn tags(&self) -> Vec<String> {
        self.tags.keys().cloned().collect()
    }

    /// Registered endpoints
    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.keys().cloned().collect()
    }

    /// Spaces joined across all connections
    pub fn spaces(&self) -> Vec<String> {
        let spaces: BTreeSet<String> = self
            .connections
            .values()
            .flat_map(|e| e.connection.spaces())
            .collect();
        spaces.into_iter().collect()
    }
}
