//! Agent configuration
//!
//! [`AgentConfig`] holds the typed runtime knobs. [`Config`] is a container
//! of [`Field`]s loaded from parsed config data and the environment, for
//! applications that want their own options with provenance.

use crate::fields::{json_type, Field, Source};
use crate::supervisor::FailurePolicy;
use crate::{AgentError, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use zentropi_transport::TransportConfig;

/// Prefix marking an environment value as JSON
pub const JSON_PREFIX: &str = "json:";

/// Agent runtime settings
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Name the agent is known by
    pub name: String,
    /// Remembered frame ids for duplicate suppression
    pub dedup_capacity: usize,
    /// Wake-up period of the idle loop
    pub idle_tick: Duration,
    /// Minimum fuzzy match score, 0 to 100
    pub fuzzy_threshold: u8,
    /// Reaction to failing handlers
    pub failure_policy: FailurePolicy,
    /// Report unknown states as errors
    pub strict_states: bool,
    /// Default wait for request responses
    pub request_timeout: Duration,
    /// Socket transport settings
    pub transport: TransportConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "agent".to_string(),
            dedup_capacity: 100_000,
            idle_tick: Duration::from_millis(100),
            fuzzy_threshold: crate::matcher::DEFAULT_THRESHOLD,
            failure_policy: FailurePolicy::default(),
            strict_states: true,
            request_timeout: Duration::from_secs(30),
            transport: TransportConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Defaults with the given agent name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the dedup capacity
    pub fn with_dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity;
        self
    }

    /// Set the idle tick
    pub fn with_idle_tick(mut self, tick: Duration) -> Self {
        self.idle_tick = tick;
        self
    }

    /// Set the fuzzy threshold
    pub fn with_fuzzy_threshold(mut self, threshold: u8) -> Self {
        self.fuzzy_threshold = threshold;
        self
    }

    /// Set the failure policy
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Toggle strict states
    pub fn with_strict_states(mut self, strict: bool) -> Self {
        self.strict_states = strict;
        self
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the transport settings
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}

/// Option container with provenance and freeze semantics
#[derive(Debug, Clone, Default)]
pub struct Config {
    fields: BTreeMap<String, Field>,
    strict: bool,
    frozen: bool,
}

impl Config {
    /// Container that accepts unknown keys as new options
    pub fn new() -> Self {
        Self::default()
    }

    /// Container that rejects unknown keys
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    /// Declare an option
    pub fn define(&mut self, field: Field) -> Result<()> {
        if self.frozen {
            return Err(AgentError::ConfigLocked(field.name().to_string()));
        }
        self.fields.insert(field.name().to_string(), field);
        Ok(())
    }

    /// Declare an option, builder style
    pub fn with_field(mut self, field: Field) -> Result<Self> {
        self.define(field)?;
        Ok(self)
    }

    fn assign(&mut self, name: &str, value: Value, source: Source) -> Result<()> {
        match self.fields.get_mut(name) {
            Some(field) if self.frozen && !field.is_mutable() => {
                Err(AgentError::OptionFrozen(name.to_string()))
            }
            Some(field) => field.set(value, source),
            None if self.frozen => Err(AgentError::ConfigLocked(name.to_string())),
            None if self.strict => Err(AgentError::UnknownOption(name.to_string())),
            None => {
                let mut field = Field::new(name, Value::Null);
                field.set(value, source)?;
                self.fields.insert(name.to_string(), field);
                Ok(())
            }
        }
    }

    /// Set an option at runtime
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.assign(name, value.into(), Source::Runtime)
    }

    /// Option value
    pub fn get(&self, name: &str) -> Result<&Value> {
        self.fields
            .get(name)
            .map(Field::value)
            .ok_or_else(|| AgentError::UnknownOption(name.to_string()))
    }

    /// Option value as a string, if it is one
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|f| f.value().as_str())
    }

    /// Option value as a bool, if it is one
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.fields.get(name).and_then(|f| f.value().as_bool())
    }

    /// Option field
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Option names in order
    pub fn names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    /// Load already-parsed config data
    pub fn load_map(&mut self, values: Map<String, Value>) -> Result<()> {
        for (name, value) in values {
            self.assign(&name, value, Source::ConfigFile)?;
        }
        Ok(())
    }

    /// Load every `prefix`-ed variable from the process environment
    pub fn load_env(&mut self, prefix: &str) -> Result<usize> {
        self.load_env_from(prefix, std::env::vars())
    }

    /// Load every `prefix`-ed variable from `vars`.
    ///
    /// `PREFIX_SOME_NAME` sets option `some_name`. Values starting with
    /// `json:` are parsed as JSON; others are coerced to the option's
    /// declared type. In a strict container unknown names are skipped.
    /// Returns the number of options loaded.
    pub fn load_env_from<I>(&mut self, prefix: &str, vars: I) -> Result<usize>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut loaded = 0;
        for (key, raw) in vars {
            let Some(rest) = key.strip_prefix(prefix) else {
                continue;
            };
            let name = rest.to_lowercase();
            if name.is_empty() {
                continue;
            }
            if self.strict && !self.fields.contains_key(&name) {
                debug!("Ignoring unknown environment option {}", key);
                continue;
            }
            let value = match self.fields.get(&name) {
                Some(field) => coerce(&name, field.default_value(), &raw)?,
                None => coerce(&name, &Value::Null, &raw)?,
            };
            self.assign(&name, value, Source::Env)?;
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Stop accepting new options and changes to immutable ones
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Whether [`Config::freeze`] was called
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Fail on the first required option without a value
    pub fn check_required(&self) -> Result<()> {
        match self.fields.values().find(|f| f.is_missing()) {
            Some(field) => Err(AgentError::MissingOption(field.name().to_string())),
            None => Ok(()),
        }
    }

    /// Environment variables reproducing every option with a non-null value.
    ///
    /// Strings are exported as is; everything else is exported as `json:`.
    pub fn export_env(&self, prefix: &str) -> Vec<(String, String)> {
        self.fields
            .values()
            .filter(|f| !f.value().is_null())
            .map(|f| {
                let key = format!("{}{}", prefix, f.name().to_uppercase());
                let value = match f.value() {
                    Value::String(s) => s.clone(),
                    other => format!("{}{}", JSON_PREFIX, other),
                };
                (key, value)
            })
            .collect()
    }

    /// Map of option name to field summary
    pub fn describe(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(name, field)| (name.clone(), field.describe()))
                .collect(),
        )
    }
}

/// Turn an environment string into a value shaped like `template`
fn coerce(name: &str, template: &Value, raw: &str) -> Result<Value> {
    let invalid = |expected: &'static str| AgentError::InvalidValue {
        name: name.to_string(),
        expected,
        got: "string",
    };

    if let Some(json) = raw.strip_prefix(JSON_PREFIX) {
        return serde_json::from_str(json).map_err(|_| invalid("json"));
    }

    match template {
        Value::Bool(_) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Value::Bool(true)),
            "0" | "false" | "no" | "off" => Ok(Value::Bool(false)),
            _ => Err(invalid("bool")),
        },
        Value::Number(_) => {
            let raw = raw.trim();
            if let Ok(n) = raw.parse::<i64>() {
                return Ok(Value::from(n));
            }
            raw.parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| invalid("number"))
        }
        Value::Array(_) | Value::Object(_) => {
            serde_json::from_str(raw).map_err(|_| invalid(json_type(template)))
        }
        Value::Null | Value::String(_) => Ok(Value::String(raw.to_string())),
    }
}
