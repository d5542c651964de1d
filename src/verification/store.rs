//! TTL-bound in-memory keyspace shared by captcha answers and email codes.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::clock::Clock;

struct Entry<V> {
    value: V,
    expires_at: u64,
}

/// One keyspace guarded by a single reader/writer lock.
///
/// Writers (`insert`, `update`, `take`, `remove`, `clean_expired`) take the
/// write lock; `check` only reads. No lock is held beyond the map operation itself.
pub struct Keyspace<V> {
    entries: RwLock<HashMap<String, Entry<V>>>,
    clock: Arc<dyn Clock>,
}

impl<V> Keyspace<V> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Store a value, replacing any previous value under the same key.
    pub fn insert(&self, key: String, value: V, ttl: Duration) {
        let expires_at = self.clock.now().saturating_add(ttl.as_secs());
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key, Entry { value, expires_at });
    }

    /// Inspect a live value without removing it. Returns None if the key is
    /// unknown or expired.
    pub fn check<R>(&self, key: &str, f: impl FnOnce(&V) -> R) -> Option<R> {
        let now = self.clock.now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| f(&entry.value))
    }

    /// Mutate a live value in place. `f` returns its result and whether the
    /// entry should be kept. Returns None if the key is unknown or expired.
    pub fn update<R>(&self, key: &str, f: impl FnOnce(&mut V) -> (R, bool)) -> Option<R> {
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get_mut(key).filter(|entry| now < entry.expires_at)?;
        let (result, keep) = f(&mut entry.value);
        if !keep {
            entries.remove(key);
        }
        Some(result)
    }

    /// Remove the entry and return its value if it was still live.
    pub fn take(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .remove(key)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.value)
    }

    /// Idempotent delete. Returns whether something was removed.
    pub fn remove(&self, key: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key).is_some()
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn clean_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        before - entries.len()
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
