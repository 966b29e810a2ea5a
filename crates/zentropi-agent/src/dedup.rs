//! Recently seen frame ids

use lru::LruCache;
use std::num::NonZeroUsize;

/// Bounded set of frame ids, evicting the least recently seen
#[derive(Debug)]
pub struct SeenFrames {
    ids: LruCache<String, ()>,
}

impl SeenFrames {
    /// Remember up to `capacity` ids; zero is treated as one
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ids: LruCache::new(capacity),
        }
    }

    /// Record `id`. Returns false if it was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.ids.get(id).is_some() {
            return false;
        }
        self.ids.put(id.to_string(), ());
        true
    }

    /// Whether `id` is remembered
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Number of remembered ids
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when nothing is remembered
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_idempotent() {
        let mut seen = SeenFrames::new(4);
        assert!(seen.insert("a"));
        assert!(!seen.insert("a"));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_eviction() {
        let mut seen = SeenFrames::new(2);
        seen.insert("a");
        seen.insert("b");
        seen.insert("a");
        seen.insert("c");

        assert!(seen.contains("a"));
        assert!(!seen.contains("b"));
        assert!(seen.contains("c"));
    }
}
