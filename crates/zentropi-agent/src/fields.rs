//! Named values with provenance
//!
//! A [`Field`] backs both agent states and config options. It remembers its
//! default, its current value and where that value came from, and refuses
//! values of a different JSON type than its default.

use crate::{AgentError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Where a field's current value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Built-in default
    #[default]
    Default,
    /// Loaded from parsed config data
    ConfigFile,
    /// Loaded from the environment
    Env,
    /// Set while running
    Runtime,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Default => "default",
            Self::ConfigFile => "config_file",
            Self::Env => "env",
            Self::Runtime => "runtime",
        };
        f.write_str(name)
    }
}

/// JSON type name of `value`
pub fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Named value with default, provenance and mutability
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    default: Value,
    value: Option<Value>,
    source: Source,
    optional: bool,
    mutable: bool,
    description: Option<String>,
}

impl Field {
    /// Optional, mutable field
    pub fn new(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            default: default.into(),
            value: None,
            source: Source::Default,
            optional: true,
            mutable: true,
            description: None,
        }
    }

    /// Require a value before use
    pub fn required(mut self) -> Self {
        self.optional = false;
        self
    }

    /// Refuse changes once the owning config is frozen
    pub fn immutable(mut self) -> Self {
        self.mutable = false;
        self
    }

    /// Attach a human readable description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default value
    pub fn default_value(&self) -> &Value {
        &self.default
    }

    /// Current value, falling back to the default
    pub fn value(&self) -> &Value {
        self.value.as_ref().unwrap_or(&self.default)
    }

    /// Provenance of the current value
    pub fn source(&self) -> Source {
        self.source
    }

    /// True once a value other than the default was assigned
    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    /// Whether the field may stay unset
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Whether the field may change after freeze
    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Description, if any
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// True when a required field has neither a value nor a non-null default
    pub fn is_missing(&self) -> bool {
        !self.optional && self.value().is_null()
    }

    /// Reject `value` when its JSON type differs from a non-null default
    pub fn check(&self, value: &Value) -> Result<()> {
        if self.default.is_null() || value.is_null() {
            return Ok(());
        }
        let (expected, got) = (json_type(&self.default), json_type(value));
        if expected != got {
            return Err(AgentError::InvalidValue {
                name: self.name.clone(),
                expected,
                got,
            });
        }
        Ok(())
    }

    /// Assign a value
    pub fn set(&mut self, value: Value, source: Source) -> Result<()> {
        self.check(&value)?;
        self.value = Some(value);
        self.source = source;
        Ok(())
    }

    /// Drop the assigned value
    pub fn reset(&mut self) {
        self.value = None;
        self.source = Source::Default;
    }

    /// Summary for introspection
    pub fn describe(&self) -> Value {
        json!({
            "value": self.value(),
            "default": self.default,
            "source": self.source,
            "optional": self.optional,
            "mutable": self.mutable,
            "description": self.description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_falls_back_to_default() {
        let mut field = Field::new("port", 8080);
        assert_eq!(field.value(), &json!(8080));
        assert_eq!(field.source(), Source::Default);

        field.set(json!(9090), Source::Env).unwrap();
        assert_eq!(field.value(), &json!(9090));
        assert_eq!(field.source(), Source::Env);

        field.reset();
        assert_eq!(field.value(), &json!(8080));
        assert!(!field.is_set());
    }

    #[test]
    fn test_type_check() {
        let mut field = Field::new("verbose", false);
        let err = field.set(json!("yes"), Source::Runtime).unwrap_err();
        assert!(matches!(
            err,
            AgentError::InvalidValue {
                expected: "bool",
                got: "string",
                ..
            }
        ));

        let mut untyped = Field::new("anything", Value::Null);
        untyped.set(json!([1, 2]), Source::Runtime).unwrap();
        untyped.set(json!("text"), Source::Runtime).unwrap();
    }

    #[test]
    fn test_required() {
        let field = Field::new("endpoint", Value::Null).required();
        assert!(field.is_missing());
        assert!(!Field::new("endpoint", Value::Null).is_missing());
    }

    #[test]
    fn test_describe() {
        let field = Field::new("name", "agent").immutable().with_description("Agent name");
        let summary = field.describe();
        assert_eq!(summary["value"], json!("agent"));
        assert_eq!(summary["source"], json!("default"));
        assert_eq!(summary["mutable"], json!(false));
        assert_eq!(summary["description"], json!("Agent name"));
    }
}
