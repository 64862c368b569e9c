//! Guard for removals requested while an add is still in flight.

use std::collections::HashMap;
use std::hash::Hash;

use crate::callback::ResultCallback;
use crate::error::Result;

/// Remembers which keys should be removed once their add settles, along with
/// every caller waiting for that removal.
#[derive(Debug, Clone)]
pub struct PendingRemovalGuard<K, T> {
    marked: HashMap<K, Vec<ResultCallback<T>>>,
}

impl<K, T> Default for PendingRemovalGuard<K, T> {
    fn default() -> Self {
        Self {
            marked: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, T: Clone> PendingRemovalGuard<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` for removal. Marking again adds another waiting callback.
    pub fn mark_for_removal(&mut self, key: K, callback: ResultCallback<T>) {
        self.marked.entry(key).or_default().push(callback);
    }

    pub fn is_marked_for_removal(&self, key: &K) -> bool {
        self.marked.contains_key(key)
    }

    /// Unmark `key` and notify everyone waiting on its removal.
    ///
    /// Does nothing if `key` was never marked.
    pub fn remove_marked(&mut self, key: &K, result: Result<T>) {
        if let Some(callbacks) = self.marked.remove(key) {
            for callback in callbacks {
                callback.call(result.clone());
            }
        }
    }

    pub fn marked(&self) -> impl Iterator<Item = &K> {
        self.marked.keys()
    }

    pub fn clear_all(&mut self) {
        self.marked.clear();
    }
}
