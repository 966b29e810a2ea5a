//! In-process space broker
//!
//! Tracks which agents are attached to an endpoint, which spaces each agent
//! has joined, and fans frames out to the other members of a space.

use crate::connection::FrameSink;
use crate::{Result, TransportError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, trace};
use zentropi_proto::{validate_name, Frame};

/// Named set of member agents
#[derive(Debug, Clone, Default)]
pub struct Space {
    name: String,
    members: BTreeSet<String>,
}

impl Space {
    /// Create an empty space
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: BTreeSet::new(),
        }
    }

    /// Space name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current members
    pub fn members(&self) -> &BTreeSet<String> {
        &self.members
    }

    /// True when `agent` has joined
    pub fn contains(&self, agent: &str) -> bool {
        self.members.contains(agent)
    }

    /// Add a member; a second join under the same name fails
    pub fn join(&mut self, agent: &str) -> Result<()> {
        if !self.members.insert(agent.to_string()) {
            return Err(TransportError::AgentExists(agent.to_string()));
        }
        Ok(())
    }

    /// Remove a member; leaving a space one never joined fails
    pub fn leave(&mut self, agent: &str) -> Result<()> {
        if !self.members.remove(agent) {
            return Err(TransportError::NotMember {
                agent: agent.to_string(),
                space: self.name.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct BrokerState {
    spaces: BTreeMap<String, Space>,
    agents: HashMap<String, FrameSink>,
}

/// Broker shared by every in-memory connection on one endpoint
#[derive(Default)]
pub struct SpaceBroker {
    state: Mutex<BrokerState>,
}

impl std::fmt::Debug for SpaceBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SpaceBroker")
            .field("agents", &state.agents.keys().collect::<Vec<_>>())
            .field("spaces", &state.spaces.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SpaceBroker {
    /// Create an empty broker
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an agent and the sink its frames are delivered to
    pub fn agent_connect(&self, agent: &str, sink: FrameSink) -> Result<()> {
        validate_name(agent)?;
        let mut state = self.state.lock();
        if state.agents.contains_key(agent) {
            return Err(TransportError::AgentExists(agent.to_string()));
        }
        state.agents.insert(agent.to_string(), sink);
        debug!("Agent {} connected to broker", agent);
        Ok(())
    }

    /// Detach an agent and drop it from every space. Idempotent.
    pub fn agent_close(&self, agent: &str) {
        let mut state = self.state.lock();
        if state.agents.remove(agent).is_none() {
            return;
        }
        for space in state.spaces.values_mut() {
            space.members.remove(agent);
        }
        debug!("Agent {} disconnected from broker", agent);
    }

    /// Join a space, creating it on first use.
    ///
    /// The outcome is reported as a `join` or `join-failed` command frame
    /// carrying `{"space": name}`; a conflicting join is not an error.
    pub fn join(&self, agent: &str, space: &str) -> Result<Frame> {
        validate_name(space)?;
        let mut state = self.state.lock();
        let entry = state
            .spaces
            .entry(space.to_string())
            .or_insert_with(|| Space::new(space));
        let name = match entry.join(agent) {
            Ok(()) => "join",
            Err(_) => "join-failed",
        };
        debug!("{} {} -> {}", agent, name, space);
        Ok(Frame::command(name)
            .with("space", space)
            .target(agent)
            .internal(true)
            .build()?)
    }

    /// Leave a space, reported as `leave` or `leave-failed`
    pub fn leave(&self, agent: &str, space: &str) -> Result<Frame> {
        validate_name(space)?;
        let mut state = self.state.lock();
        let left = match state.spaces.get_mut(space) {
            Some(entry) => entry.leave(agent).is_ok(),
            None => false,
        };
        let name = if left { "leave" } else { "leave-failed" };
        debug!("{} {} -> {}", agent, name, space);
        Ok(Frame::command(name)
            .with("space", space)
            .target(agent)
            .internal(true)
            .build()?)
    }

    /// Deliver a frame to the other members of its space.
    ///
    /// When the sender belongs to `frame.space` only that space is used,
    /// otherwise every space the sender belongs to. Each recipient gets the
    /// frame at most once. Returns the number of deliveries.
    pub fn broadcast(&self, frame: &Frame) -> usize {
        let Some(sender) = frame.source() else {
            debug!("Dropping broadcast without source: {}", frame);
            return 0;
        };
        let state = self.state.lock();

        let mut recipients = BTreeSet::new();
        let scoped = frame
            .space()
            .and_then(|name| state.spaces.get(name))
            .filter(|space| space.contains(sender));
        match scoped {
            Some(space) => recipients.extend(space.members.iter().cloned()),
            None => {
                for space in state.spaces.values().filter(|s| s.contains(sender)) {
                    recipients.extend(space.members.iter().cloned());
                }
            }
        }
        recipients.remove(sender);

        let mut delivered = 0;
        for agent in &recipients {
            match state.agents.get(agent) {
                Some(sink) if sink.send(frame.clone()).is_ok() => delivered += 1,
                Some(_) => trace!("Sink for {} is closed", agent),
                None => trace!("Member {} has no connection", agent),
            }
        }
        delivered
    }

    /// Connected agents, optionally restricted to members of one space
    pub fn agents(&self, space: Option<&str>) -> Result<Vec<String>> {
        let state = self.state.lock();
        match space {
            None => {
                let mut agents: Vec<_> = state.agents.keys().cloned().collect();
                agents.sort();
                Ok(agents)
            }
            Some(name) => state
                .spaces
                .get(name)
                .map(|s| s.members.iter().cloned().collect())
                .ok_or_else(|| TransportError::UnknownSpace(name.to_string())),
        }
    }

    /// Known spaces, optionally restricted to those an agent has joined
    pub fn spaces(&self, agent: Option<&str>) -> Vec<String> {
        let state = self.state.lock();
        state
            .spaces
            .values()
            .filter(|s| agent.map_or(true, |a| s.contains(a)))
            .map(|s| s.name.clone())
            .collect()
    }

    /// Drop every agent sink and space
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.agents.clear();
        state.spaces.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn attach(broker: &SpaceBroker, name: &str) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        broker.agent_connect(name, tx).unwrap();
        rx
    }

    #[test]
    fn test_join_conflict() {
        let broker = SpaceBroker::new();
        let _rx = attach(&broker, "a");

        let first = broker.join("a", "s").unwrap();
        let second = broker.join("a", "s").unwrap();

        assert_eq!(first.name(), "join");
        assert_eq!(first.get_str("space"), Some("s"));
        assert_eq!(second.name(), "join-failed");
        assert_eq!(second.get_str("space"), Some("s"));
        assert_eq!(broker.agents(Some("s")).unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn test_leave_non_member() {
        let broker = SpaceBroker::new();
        let _rx = attach(&broker, "a");

        assert_eq!(broker.leave("a", "nowhere").unwrap().name(), "leave-failed");
        broker.join("a", "s").unwrap();
        assert_eq!(broker.leave("a", "s").unwrap().name(), "leave");
        assert_eq!(broker.leave("a", "s").unwrap().name(), "leave-failed");
    }

    #[test]
    fn test_duplicate_agent_rejected() {
        let broker = SpaceBroker::new();
        let _rx = attach(&broker, "a");
        let (tx, _rx2) = mpsc::unbounded_channel();

        assert!(matches!(
            broker.agent_connect("a", tx),
            Err(TransportError::AgentExists(_))
        ));
    }

    #[test]
    fn test_broadcast_reaches_others_once() {
        let broker = SpaceBroker::new();
        let mut a = attach(&broker, "a");
        let mut b = attach(&broker, "b");
        for space in ["s1", "s2"] {
            broker.join("a", space).unwrap();
            broker.join("b", space).unwrap();
        }

        let frame = Frame::event("ping").source("a").build().unwrap();
        assert_eq!(broker.broadcast(&frame), 1);

        assert_eq!(b.try_recv().unwrap().name(), "ping");
        assert!(b.try_recv().is_err());
        assert!(a.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_scoped_to_space() {
        let broker = SpaceBroker::new();
        let _a = attach(&broker, "a");
        let mut b = attach(&broker, "b");
        let mut c = attach(&broker, "c");
        broker.join("a", "s1").unwrap();
        broker.join("a", "s2").unwrap();
        broker.join("b", "s1").unwrap();
        broker.join("c", "s2").unwrap();

        let frame = Frame::event("ping").source("a").space("s2").build().unwrap();
        assert_eq!(broker.broadcast(&frame), 1);
        assert!(b.try_recv().is_err());
        assert_eq!(c.try_recv().unwrap().name(), "ping");
    }

    #[test]
    fn test_broadcast_from_non_member_of_space_uses_all_spaces() {
        let broker = SpaceBroker::new();
        let _a = attach(&broker, "a");
        let mut b = attach(&broker, "b");
        broker.join("a", "s1").unwrap();
        broker.join("b", "s1").unwrap();

        let frame = Frame::event("ping").source("a").space("other").build().unwrap();
        assert_eq!(broker.broadcast(&frame), 1);
        assert!(b.try_recv().is_ok());
    }

    #[test]
    fn test_agent_close_is_idempotent() {
        let broker = SpaceBroker::new();
        let _a = attach(&broker, "a");
        broker.join("a", "s").unwrap();

        broker.agent_close("a");
        broker.agent_close("a");

        assert!(broker.agents(None).unwrap().is_empty());
        assert!(broker.agents(Some("s")).unwrap().is_empty());
        assert!(broker.spaces(Some("a")).is_empty());
    }

    #[test]
    fn test_queries() {
        let broker = SpaceBroker::new();
        let _a = attach(&broker, "a");
        let _b = attach(&broker, "b");
        broker.join("a", "x").unwrap();
        broker.join("b", "y").unwrap();

        assert_eq!(broker.agents(None).unwrap(), vec!["a", "b"]);
        assert_eq!(broker.spaces(None), vec!["x", "y"]);
        assert_eq!(broker.spaces(Some("b")), vec!["y"]);
        assert!(matches!(
            broker.agents(Some("missing")),
            Err(TransportError::UnknownSpace(_))
        ));
    }
}
