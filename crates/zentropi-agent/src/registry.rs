//! Per-kind handler registries

use crate::handler::{Handler, HandlerId};
use crate::matcher::{HandlerIndex, Matched};
use crate::{AgentError, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use zentropi_proto::{Frame, FrameBuilder, Kind};

/// Handlers for one frame kind
#[derive(Debug)]
pub struct Registry {
    kind: Kind,
    index: RwLock<HandlerIndex>,
}

impl Registry {
    /// Empty registry for `kind`
    pub fn new(kind: Kind, fuzzy_threshold: u8) -> Self {
        Self {
            kind,
            index: RwLock::new(HandlerIndex::new(fuzzy_threshold)),
        }
    }

    /// Frame kind served
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Register a handler of this registry's kind
    pub fn add_handler(&self, handler: Arc<Handler>) -> Result<()> {
        if handler.kind() != self.kind {
            return Err(AgentError::InvalidHandler(format!(
                "{} handler offered to the {} registry",
                handler.kind(),
                self.kind
            )));
        }
        self.index.write().add(handler)
    }

    /// Unregister handler `id` from `pattern`
    pub fn remove_handler(&self, pattern: &str, id: HandlerId) -> Result<Arc<Handler>> {
        self.index.write().remove(pattern, id)
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Select the handlers for `frame`
    pub fn resolve(&self, frame: &Frame) -> Option<Matched> {
        self.index.read().resolve(frame)
    }

    /// Build a frame of this kind, hand it to every matching handler through
    /// `invoke` and return it.
    ///
    /// The index lock is released before `invoke` runs, so handlers may
    /// register or remove handlers themselves.
    pub fn emit<F>(&self, builder: FrameBuilder, mut invoke: F) -> Result<Frame>
    where
        F: FnMut(&Frame, &Arc<Handler>),
    {
        let frame = builder.kind(self.kind).build()?;
        if let Some(matched) = self.resolve(&frame) {
            for handler in &matched.handlers {
                invoke(&matched.frame, handler);
            }
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_mismatch() {
        let events = Registry::new(Kind::Event, 90);
        let handler = Arc::new(Handler::on_message("hi", |_, _| Ok(())));
        assert!(matches!(events.add_handler(handler), Err(AgentError::InvalidHandler(_))));
    }

    #[test]
    fn test_emit_invokes_matching_handlers() {
        let messages = Registry::new(Kind::Message, 90);
        messages
            .add_handler(Arc::new(Handler::on_message("greet {who}", |_, _| Ok(())).parse()))
            .unwrap();
        messages
            .add_handler(Arc::new(Handler::on_message("other", |_, _| Ok(()))))
            .unwrap();

        let mut seen = Vec::new();
        let frame = messages
            .emit(Frame::message_text("greet bob"), |frame, handler| {
                seen.push((handler.pattern().to_string(), frame.get("who").cloned()));
            })
            .unwrap();

        assert_eq!(frame.kind(), Kind::Message);
        assert_eq!(seen, vec![("greet {who}".to_string(), Some(json!("bob")))]);
    }

    #[test]
    fn test_emit_forces_kind() {
        let events = Registry::new(Kind::Event, 90);
        let frame = events.emit(Frame::builder("boot"), |_, _| {}).unwrap();
        assert_eq!(frame.kind(), Kind::Event);
    }

    #[test]
    fn test_remove_handler() {
        let commands = Registry::new(Kind::Command, 90);
        let handler = Arc::new(Handler::sync(Kind::Command, "reset", |_, _| Ok(())));
        commands.add_handler(Arc::clone(&handler)).unwrap();
        assert_eq!(commands.len(), 1);
        commands.remove_handler("reset", handler.id()).unwrap();
        assert!(commands.is_empty());
    }
}
