//! Handler matching
//!
//! [`HandlerIndex`] keeps three indices plus a catch-all bucket and resolves
//! a frame against them in a fixed order: exact names, then parse templates,
//! then fuzzy patterns, then `"*"`. The first tier with a match wins.

pub mod fuzzy;
pub mod parse;


pub use fuzzy::{token_sort_ratio, DEFAULT_THRESHOLD};
pub use parse::{Captures, ParsePattern};

use crate::handler::{Handler, HandlerId, MatchMode, CATCH_ALL};
use crate::{AgentError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use zentropi_proto::{validate_name, Frame};

/// Index tier that produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Frame name equals the pattern
    Exact,
    /// Parse template matched
    Parse,
    /// Fuzzy score reached the threshold
    Fuzzy,
    /// Nothing else matched
    CatchAll,
}

/// Handlers selected for a frame
#[derive(Debug, Clone)]
pub struct Matched {
    /// Frame to hand to the handlers; parse captures are merged into its data
    pub frame: Frame,
    /// Handlers in invocation order
    pub handlers: Vec<Arc<Handler>>,
    /// Tier that matched
    pub tier: Tier,
}

#[derive(Debug)]
struct ParseEntry {
    pattern: ParsePattern,
    handlers: Vec<Arc<Handler>>,
}

#[derive(Debug)]
struct FuzzyEntry {
    pattern: String,
    handlers: Vec<Arc<Handler>>,
}

/// Pattern indices for one frame kind
#[derive(Debug)]
pub struct HandlerIndex {
    exact: HashMap<String, Vec<Arc<Handler>>>,
    folded: HashMap<String, Vec<Arc<Handler>>>,
    parse: Vec<ParseEntry>,
    fuzzy: Vec<FuzzyEntry>,
    catch_all: Vec<Arc<Handler>>,
    fuzzy_threshold: u8,
}

impl Default for HandlerIndex {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

fn push_unique(bucket: &mut Vec<Arc<Handler>>, handler: &Arc<Handler>) -> Result<()> {
    if bucket.iter().any(|h| h.id() == handler.id()) {
        return Err(AgentError::DuplicateHandler {
            pattern: handler.pattern().to_string(),
            id: handler.id().get(),
        });
    }
    bucket.push(Arc::clone(handler));
    Ok(())
}

fn take(bucket: &mut Vec<Arc<Handler>>, id: HandlerId) -> Option<Arc<Handler>> {
    let position = bucket.iter().position(|h| h.id() == id)?;
    Some(bucket.remove(position))
}

/// Insert position keeping `lengths` sorted longest first, after equals
fn longest_first(lengths: impl Iterator<Item = usize>, len: usize) -> usize {
    lengths.take_while(|existing| *existing >= len).count()
}

impl HandlerIndex {
    /// Empty index accepting fuzzy scores of at least `fuzzy_threshold`
    pub fn new(fuzzy_threshold: u8) -> Self {
        Self {
            exact: HashMap::new(),
            folded: HashMap::new(),
            parse: Vec::new(),
            fuzzy: Vec::new(),
            catch_all: Vec::new(),
            fuzzy_threshold: fuzzy_threshold.min(100),
        }
    }

    /// Fuzzy acceptance threshold
    pub fn fuzzy_threshold(&self) -> u8 {
        self.fuzzy_threshold
    }

    /// Change the fuzzy acceptance threshold
    pub fn set_fuzzy_threshold(&mut self, threshold: u8) {
        self.fuzzy_threshold = threshold.min(100);
    }

    /// Register a handler under its pattern and match mode
    pub fn add(&mut self, handler: Arc<Handler>) -> Result<()> {
        let pattern = handler.pattern().to_string();
        validate_name(&pattern).map_err(|e| AgentError::InvalidPattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;

        if pattern == CATCH_ALL {
            return push_unique(&mut self.catch_all, &handler);
        }

        match handler.match_mode() {
            MatchMode::Exact => {
                push_unique(self.exact.entry(pattern.clone()).or_default(), &handler)?;
                if handler.is_ignore_case() {
                    self.folded
                        .entry(pattern.to_lowercase())
                        .or_default()
                        .push(handler);
                }
                Ok(())
            }
            MatchMode::Parse => {
                if let Some(entry) = self.parse.iter_mut().find(|e| e.pattern.template() == pattern) {
                    return push_unique(&mut entry.handlers, &handler);
                }
                let compiled = ParsePattern::compile(&pattern)?;
                let at = longest_first(self.parse.iter().map(|e| e.pattern.template().len()), pattern.len());
                self.parse.insert(
                    at,
                    ParseEntry {
                        pattern: compiled,
                        handlers: vec![handler],
                    },
                );
                Ok(())
            }
            MatchMode::Fuzzy => {
                if let Some(entry) = self.fuzzy.iter_mut().find(|e| e.pattern == pattern) {
                    return push_unique(&mut entry.handlers, &handler);
                }
                let at = longest_first(self.fuzzy.iter().map(|e| e.pattern.len()), pattern.len());
                self.fuzzy.insert(
                    at,
                    FuzzyEntry {
                        pattern,
                        handlers: vec![handler],
                    },
                );
                Ok(())
            }
        }
    }

    /// Unregister handler `id` from `pattern`
    pub fn remove(&mut self, pattern: &str, id: HandlerId) -> Result<Arc<Handler>> {
        let not_found = || AgentError::HandlerNotFound {
            pattern: pattern.to_string(),
            id: id.get(),
        };

        if pattern == CATCH_ALL {
            return take(&mut self.catch_all, id).ok_or_else(not_found);
        }

        if let Some(bucket) = self.exact.get_mut(pattern) {
            if let Some(handler) = take(bucket, id) {
                if bucket.is_empty() {
                    self.exact.remove(pattern);
                }
                let folded_key = pattern.to_lowercase();
                if let Some(folded) = self.folded.get_mut(&folded_key) {
                    take(folded, id);
                    if folded.is_empty() {
                        self.folded.remove(&folded_key);
                    }
                }
                return Ok(handler);
            }
        }

        if let Some(position) = self.parse.iter().position(|e| e.pattern.template() == pattern) {
            if let Some(handler) = take(&mut self.parse[position].handlers, id) {
                if self.parse[position].handlers.is_empty() {
                    self.parse.remove(position);
                }
                return Ok(handler);
            }
        }

        if let Some(position) = self.fuzzy.iter().position(|e| e.pattern == pattern) {
            if let Some(handler) = take(&mut self.fuzzy[position].handlers, id) {
                if self.fuzzy[position].handlers.is_empty() {
                    self.fuzzy.remove(position);
                }
                return Ok(handler);
            }
        }

        Err(not_found())
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.exact.values().map(Vec::len).sum::<usize>()
            + self.parse.iter().map(|e| e.handlers.len()).sum::<usize>()
            + self.fuzzy.iter().map(|e| e.handlers.len()).sum::<usize>()
            + self.catch_all.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Select the handlers for `frame`
    pub fn resolve(&self, frame: &Frame) -> Option<Matched> {
        if let Some(handlers) = self.match_exact(frame.name()) {
            return Some(Matched {
                frame: frame.clone(),
                handlers,
                tier: Tier::Exact,
            });
        }

        let subject = frame.text().unwrap_or_else(|| frame.name());
        for entry in &self.parse {
            if let Some(captures) = entry.pattern.captures(subject) {
                return Some(Matched {
                    frame: merge_captures(frame, captures),
                    handlers: entry.handlers.clone(),
                    tier: Tier::Parse,
                });
            }
        }

        let mut best: Option<(u8, &FuzzyEntry)> = None;
        for entry in &self.fuzzy {
            let score = token_sort_ratio(&entry.pattern, frame.name());
            if best.map_or(true, |(top, _)| score > top) {
                best = Some((score, entry));
            }
        }
        if let Some((score, entry)) = best {
            if score >= self.fuzzy_threshold {
                return Some(Matched {
                    frame: frame.clone(),
                    handlers: entry.handlers.clone(),
                    tier: Tier::Fuzzy,
                });
            }
        }

        if !self.catch_all.is_empty() {
            return Some(Matched {
                frame: frame.clone(),
                handlers: self.catch_all.clone(),
                tier: Tier::CatchAll,
            });
        }
        None
    }

    fn match_exact(&self, name: &str) -> Option<Vec<Arc<Handler>>> {
        let mut handlers = self.exact.get(name).cloned().unwrap_or_default();
        if let Some(folded) = self.folded.get(&name.to_lowercase()) {
            for handler in folded {
                if !handlers.iter().any(|h| h.id() == handler.id()) {
                    handlers.push(Arc::clone(handler));
                }
            }
        }
        (!handlers.is_empty()).then_some(handlers)
    }
}

fn merge_captures(frame: &Frame, captures: Captures) -> Frame {
    let mut data = frame.data().clone();
    data.extend(captures.named);
    if !captures.positional.is_empty() {
        data.insert("args".to_string(), Value::Array(captures.positional));
    }
    match frame.with_data(data) {
        Ok(merged) => merged,
        Err(e) => {
            warn!("Parse captures for {} not merged: {}", frame, e);
            frame.clone()
        }
    }
}
