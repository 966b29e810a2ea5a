//! Agent state with veto handlers
//!
//! Changing a state first offers the change to every matching state handler
//! as a `State` frame carrying `value` and `last`. The change is committed
//! only if all of them accept it.

use crate::fields::{Field, Source};
use crate::handler::{Callback, Handler, HandlerId, Reply};
use crate::matcher::{HandlerIndex, Matched};
use crate::{AgentError, Result};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use zentropi_proto::{validate_name, Frame, Kind};

/// Ordered state fields plus their handlers
#[derive(Debug)]
pub struct States {
    fields: Mutex<BTreeMap<String, Field>>,
    handlers: RwLock<HandlerIndex>,
    strict: bool,
}

impl States {
    /// Empty container. A strict one reports unknown names as
    /// [`AgentError::MissingState`].
    pub fn new(strict: bool, fuzzy_threshold: u8) -> Self {
        Self {
            fields: Mutex::new(BTreeMap::new()),
            handlers: RwLock::new(HandlerIndex::new(fuzzy_threshold)),
            strict,
        }
    }

    /// Whether unknown names are errors
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Register a state handler. State handlers decide synchronously.
    pub fn add_handler(&self, handler: Arc<Handler>) -> Result<()> {
        if handler.kind() != Kind::State {
            return Err(AgentError::InvalidHandler(format!(
                "{} handler offered to states",
                handler.kind()
            )));
        }
        if matches!(handler.callback(), Callback::Async(_)) {
            return Err(AgentError::InvalidHandler(format!(
                "state handler {:?} must be synchronous",
                handler.pattern()
            )));
        }
        self.handlers.write().add(handler)
    }

    /// Unregister handler `id` from `pattern`
    pub fn remove_handler(&self, pattern: &str, id: HandlerId) -> Result<Arc<Handler>> {
        self.handlers.write().remove(pattern, id)
    }

    /// Handlers matching a state frame
    pub fn resolve(&self, frame: &Frame) -> Option<Matched> {
        self.handlers.read().resolve(frame)
    }

    /// Add a state without consulting handlers. Existing values are kept.
    pub fn define(&self, field: Field) -> Result<()> {
        validate_name(field.name())?;
        self.fields
            .lock()
            .entry(field.name().to_string())
            .or_insert(field);
        Ok(())
    }

    /// Change `name` to `value` if every matching handler accepts.
    ///
    /// A new name is added directly. For an existing one a `State` frame
    /// `{value, last}` is passed to `invoke` once per matching handler; every
    /// reply must be [`Reply::Accept`]. Returns whether the change was
    /// committed.
    pub fn set<F>(&self, name: &str, value: Value, mut invoke: F) -> Result<bool>
    where
        F: FnMut(&Frame, &Arc<Handler>) -> Result<Reply>,
    {
        validate_name(name)?;
        let last = {
            let mut fields = self.fields.lock();
            match fields.get(name) {
                Some(field) => {
                    field.check(&value)?;
                    field.value().clone()
                }
                None => {
                    let mut field = Field::new(name, value.clone());
                    field.set(value, Source::Runtime)?;
                    fields.insert(name.to_string(), field);
                    return Ok(true);
                }
            }
        };

        let mut data = Map::new();
        data.insert("value".to_string(), value.clone());
        data.insert("last".to_string(), last);
        let frame = Frame::state(name).data(data).internal(true).build()?;

        let mut accepted = true;
        if let Some(matched) = self.resolve(&frame) {
            for handler in &matched.handlers {
                match invoke(&matched.frame, handler)? {
                    Reply::Accept(ok) => accepted &= ok,
                    _ => {
                        return Err(AgentError::InvalidStateReply {
                            state: name.to_string(),
                        })
                    }
                }
            }
        }

        if !accepted {
            debug!("State change {} = {} vetoed", name, value);
            return Ok(false);
        }

        let mut fields = self.fields.lock();
        match fields.get_mut(name) {
            Some(field) => field.set(value, Source::Runtime)?,
            None => {
                let mut field = Field::new(name, value.clone());
                field.set(value, Source::Runtime)?;
                fields.insert(name.to_string(), field);
            }
        }
        Ok(true)
    }

    /// Current value of `name`
    pub fn get(&self, name: &str) -> Result<Option<Value>> {
        match self.fields.lock().get(name) {
            Some(field) => Ok(Some(field.value().clone())),
            None if self.strict => Err(AgentError::MissingState(name.to_string())),
            None => Ok(None),
        }
    }

    /// Current value of `name` regardless of strictness
    pub fn value(&self, name: &str) -> Option<Value> {
        self.fields.lock().get(name).map(|f| f.value().clone())
    }

    /// Remove a state
    pub fn remove(&self, name: &str) -> Result<Option<Value>> {
        match self.fields.lock().remove(name) {
            Some(field) => Ok(Some(field.value().clone())),
            None if self.strict => Err(AgentError::MissingState(name.to_string())),
            None => Ok(None),
        }
    }

    /// Whether `name` exists
    pub fn contains(&self, name: &str) -> bool {
        self.fields.lock().contains_key(name)
    }

    /// State names in order
    pub fn names(&self) -> Vec<String> {
        self.fields.lock().keys().cloned().collect()
    }

    /// Map of state name to field summary
    pub fn describe(&self) -> Value {
        let fields = self.fields.lock();
        Value::Object(
            fields
                .iter()
                .map(|(name, field)| (name.clone(), field.describe()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn accept(_: &Frame, _: &Arc<Handler>) -> Result<Reply> {
        Ok(Reply::Accept(true))
    }

    fn reject_thirteen(frame: &Frame, _: &Arc<Handler>) -> Result<Reply> {
        Ok(Reply::Accept(frame.get("value") != Some(&json!(13))))
    }

    #[test]
    fn test_new_state_skips_handlers() {
        let states = States::new(true, 90);
        let mut calls = 0;
        let committed = states
            .set("mode", json!("idle"), |_, _| {
                calls += 1;
                Ok(Reply::Accept(false))
            })
            .unwrap();
        assert!(committed);
        assert_eq!(calls, 0);
        assert_eq!(states.get("mode").unwrap(), Some(json!("idle")));
    }

    #[test]
    fn test_veto() {
        let states = States::new(true, 90);
        states
            .add_handler(Arc::new(Handler::on_state("level", |_, _| Ok(true))))
            .unwrap();
        states.set("level", json!(1), accept).unwrap();

        assert!(states.set("level", json!(2), reject_thirteen).unwrap());
        assert_eq!(states.get("level").unwrap(), Some(json!(2)));

        assert!(!states.set("level", json!(13), reject_thirteen).unwrap());
        assert_eq!(states.get("level").unwrap(), Some(json!(2)));
    }

    #[test]
    fn test_handler_sees_value_and_last() {
        let states = States::new(true, 90);
        states
            .add_handler(Arc::new(Handler::on_state("door", |_, _| Ok(true))))
            .unwrap();
        states.define(Field::new("door", "closed")).unwrap();

        let mut seen = None;
        states
            .set("door", json!("open"), |frame, _| {
                seen = Some((frame.get("value").cloned(), frame.get("last").cloned()));
                Ok(Reply::Accept(true))
            })
            .unwrap();
        assert_eq!(seen, Some((Some(json!("open")), Some(json!("closed")))));
    }

    #[test]
    fn test_non_bool_reply() {
        let states = States::new(true, 90);
        states
            .add_handler(Arc::new(Handler::on_state("x", |_, _| Ok(()))))
            .unwrap();
        states.set("x", json!(1), accept).unwrap();
        let err = states.set("x", json!(2), |_, _| Ok(Reply::Nothing)).unwrap_err();
        assert!(matches!(err, AgentError::InvalidStateReply { .. }));
        assert_eq!(states.get("x").unwrap(), Some(json!(1)));
    }

    #[test]
    fn test_type_mismatch() {
        let states = States::new(true, 90);
        states.set("count", json!(1), accept).unwrap();
        assert!(matches!(
            states.set("count", json!("one"), accept),
            Err(AgentError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_strictness() {
        let strict = States::new(true, 90);
        assert!(matches!(strict.get("nope"), Err(AgentError::MissingState(_))));
        assert!(matches!(strict.remove("nope"), Err(AgentError::MissingState(_))));

        let loose = States::new(false, 90);
        assert_eq!(loose.get("nope").unwrap(), None);
        assert_eq!(loose.remove("nope").unwrap(), None);
    }

    #[test]
    fn test_async_state_handler_rejected() {
        let states = States::new(true, 90);
        let handler = Handler::asynchronous(Kind::State, "x", |_, _| async { Ok::<_, anyhow::Error>(true) });
        assert!(matches!(
            states.add_handler(Arc::new(handler)),
            Err(AgentError::InvalidHandler(_))
        ));
    }

    #[test]
    fn test_remove_and_describe() {
        let states = States::new(false, 90);
        states.set("a", json!(1), accept).unwrap();
        states.set("b", json!(true), accept).unwrap();
        assert_eq!(states.names(), vec!["a".to_string(), "b".to_string()]);

        let summary = states.describe();
        assert_eq!(summary["b"]["value"], json!(true));
        assert_eq!(summary["a"]["source"], json!("runtime"));

        assert_eq!(states.remove("a").unwrap(), Some(json!(1)));
        assert!(!states.contains("a"));
    }
}
