//! Parse templates
//!
//! A template is literal text with `{}` placeholders. A placeholder may be
//! named (`{city}`) or positional (`{}`) and may carry a format spec:
//! `:d` integer, `:f` float, `:w` a single word. `{{` and `}}` are literal
//! braces. Matching is anchored at both ends and ignores case.

use crate::{AgentError, Result};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conversion {
    Text,
    Integer,
    Float,
    Word,
}

impl Conversion {
    fn from_spec(spec: &str) -> Option<Self> {
        match spec {
            "" => Some(Self::Text),
            "d" => Some(Self::Integer),
            "f" => Some(Self::Float),
            "w" => Some(Self::Word),
            _ => None,
        }
    }

    fn regex(self) -> &'static str {
        match self {
            Self::Text => ".+?",
            Self::Integer => r"[-+]?\d+",
            Self::Float => r"[-+]?(?:\d+\.\d*|\.\d+|\d+)(?:[eE][-+]?\d+)?",
            Self::Word => r"\w+",
        }
    }

    fn convert(self, raw: &str) -> Option<Value> {
        match self {
            Self::Text | Self::Word => Some(Value::from(raw)),
            Self::Integer => raw.parse::<i64>().ok().map(Value::from),
            Self::Float => raw
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
        }
    }
}

#[derive(Debug, Clone)]
struct Placeholder {
    name: Option<String>,
    conversion: Conversion,
}

/// Values captured by a successful match
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Captures {
    /// Named placeholders
    pub named: Map<String, Value>,
    /// Positional placeholders in template order
    pub positional: Vec<Value>,
}

/// Compiled parse template
#[derive(Debug, Clone)]
pub struct ParsePattern {
    template: String,
    regex: Regex,
    placeholders: Vec<Placeholder>,
}

impl ParsePattern {
    /// Compile a template
    pub fn compile(template: &str) -> Result<Self> {
        let invalid = |reason: &str| AgentError::InvalidPattern {
            pattern: template.to_string(),
            reason: reason.to_string(),
        };

        let mut source = String::from("(?is)^");
        let mut literal = String::new();
        let mut placeholders = Vec::new();
        let mut names = BTreeSet::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut field = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        field.push(c);
                    }
                    if !closed {
                        return Err(invalid("unclosed '{'"));
                    }

                    let (name, spec) = field.split_once(':').unwrap_or((field.as_str(), ""));
                    let conversion = Conversion::from_spec(spec)
                        .ok_or_else(|| invalid(&format!("unknown format spec {:?}", spec)))?;
                    let name = match name {
                        "" => None,
                        name if is_identifier(name) => {
                            if !names.insert(name.to_string()) {
                                return Err(invalid(&format!("duplicate field {:?}", name)));
                            }
                            Some(name.to_string())
                        }
                        name => return Err(invalid(&format!("invalid field name {:?}", name))),
                    };

                    source.push_str(&regex::escape(&literal));
                    literal.clear();
                    source.push_str(&format!("(?P<f{}>{})", placeholders.len(), conversion.regex()));
                    placeholders.push(Placeholder { name, conversion });
                }
                '}' => return Err(invalid("unmatched '}'")),
                c => literal.push(c),
            }
        }
        source.push_str(&regex::escape(&literal));
        source.push('$');

        let regex = Regex::new(&source).map_err(|e| invalid(&e.to_string()))?;
        Ok(Self {
            template: template.to_string(),
            regex,
            placeholders,
        })
    }

    /// Template text as registered
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Number of placeholders
    pub fn placeholders(&self) -> usize {
        self.placeholders.len()
    }

    /// Match `subject`, converting captures by their format spec
    pub fn captures(&self, subject: &str) -> Option<Captures> {
        let caps = self.regex.captures(subject)?;
        let mut result = Captures::default();
        for (index, placeholder) in self.placeholders.iter().enumerate() {
            let raw = caps.name(&format!("f{}", index))?.as_str();
            let value = placeholder.conversion.convert(raw)?;
            match &placeholder.name {
                Some(name) => {
                    result.named.insert(name.clone(), value);
                }
                None => result.positional.push(value),
            }
        }
        Some(result)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}
