//! Bounded response cache keyed by normalized query.
//!
//! Once `capacity` entries are stored, new answers are simply not cached;
//! existing entries are never evicted or replaced. Insertion is
//! check-then-insert under a write lock, so concurrent writers cannot push
//! the size past capacity.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::quick::normalize_query;

/// Thread-safe query → answer cache.
#[derive(Debug)]
pub struct ResponseCache {
    entries: RwLock<HashMap<String, String>>,
    capacity: usize,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached answer for `query`, normalized first.
    pub fn get(&self, query: &str) -> Option<String> {
        let key = normalize_query(query);
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
    }

    /// Store an answer. Returns `false` when the cache is full and the key
    /// is not already present.
    pub fn insert(&self, query: &str, answer: &str) -> bool {
        let key = normalize_query(query);
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(&key) {
            return true;
        }
        if entries.len() >= self.capacity {
            return false;
        }
        entries.insert(key, answer.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_get_normalizes() {
        let cache = ResponseCache::new(4);
        assert!(cache.insert("Quem foi campeão em 2014?", "Alemanha"));
        assert_eq!(
            cache.get("  quem FOI campeão   em 2014? "),
            Some("Alemanha".to_string())
        );
        assert_eq!(cache.get("quem foi campeão em 2010?"), None);
    }

    #[test]
    fn test_stops_at_capacity() {
        let cache = ResponseCache::new(2);
        assert!(cache.insert("a", "1"));
        assert!(cache.insert("b", "2"));
        assert!(!cache.insert("c", "3"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("c"), None);
        assert_eq!(cache.get("a"), Some("1".to_string()));
    }

    #[test]
    fn test_existing_entry_not_replaced() {
        let cache = ResponseCache::new(1);
        cache.insert("a", "first");
        assert!(cache.insert("A", "second"));
        assert_eq!(cache.get("a"), Some("first".to_string()));
    }

    #[test]
    fn test_zero_capacity() {
        let cache = ResponseCache::new(0);
        assert!(!cache.insert("a", "1"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_inserts_respect_capacity() {
        let cache = Arc::new(ResponseCache::new(10));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..10 {
                        cache.insert(&format!("q{}-{}", t, i), "x");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 10);
    }
}
