//! Time-to-live cache with expiry stored alongside each entry.
//!
//! The cache is an ordinary value owned by whoever needs it and passed
//! by reference; nothing here is global. Callers supply `now` so expiry
//! is plain data and easy to test.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;

/// A cached value and the instant it stops being fresh.
#[derive(Debug, Clone)]
pub struct CachedValue<V> {
    pub value: V,
    pub expires_at: DateTime<Utc>,
}

impl<V> CachedValue<V> {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Keyed TTL cache.
#[derive(Debug, Clone)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: HashMap<K, CachedValue<V>>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Fresh value for `key`, if any.
    pub fn get(&self, key: &K, now: DateTime<Utc>) -> Option<V> {
        self.entries
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.value.clone())
    }

    /// Value for `key` even if it has expired.
    ///
    /// Used as a fallback when a refresh fails.
    pub fn get_stale(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn insert(&mut self, key: K, value: V, now: DateTime<Utc>) {
        let expires_at = now + self.ttl;
        self.entries.insert(key, CachedValue { value, expires_at });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
