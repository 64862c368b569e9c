//! Guard against running the same operation twice for one identity.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::callback::ResultCallback;
use crate::error::Result;

/// Tracks in-flight operations per key and parks the callbacks of duplicate
/// requests until the original operation finishes.
#[derive(Debug, Clone)]
pub struct DuplicateOperationGuard<K, T> {
    in_progress: HashSet<K>,
    duplicate_callbacks: HashMap<K, Vec<ResultCallback<T>>>,
}

impl<K, T> Default for DuplicateOperationGuard<K, T> {
    fn default() -> Self {
        Self {
            in_progress: HashSet::new(),
            duplicate_callbacks: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, T: Clone> DuplicateOperationGuard<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the operation for `key` as started.
    ///
    /// Callers check [`is_in_progress`](Self::is_in_progress) first; starting
    /// twice is not an error but the two starts are indistinguishable.
    pub fn start(&mut self, key: K) {
        self.in_progress.insert(key);
    }

    pub fn is_in_progress(&self, key: &K) -> bool {
        self.in_progress.contains(key)
    }

    /// Park a duplicate request's callback until `key` finishes.
    pub fn save_duplicate_callback(&mut self, key: K, callback: ResultCallback<T>) {
        self.duplicate_callbacks.entry(key).or_default().push(callback);
    }

    /// Mark `key` as finished and hand `result` to every parked callback, in
    /// the order they were saved.
    pub fn finish(&mut self, key: &K, result: Result<T>) {
        self.in_progress.remove(key);
        if let Some(callbacks) = self.duplicate_callbacks.remove(key) {
            for callback in callbacks {
                callback.call(result.clone());
            }
        }
    }

    /// Keys with an operation in flight.
    pub fn in_progress(&self) -> impl Iterator<Item = &K> {
        self.in_progress.iter()
    }

    /// Drop all state for `key` without notifying anyone.
    pub fn clear(&mut self, key: &K) {
        self.in_progress.remove(key);
        self.duplicate_callbacks.remove(key);
    }

    /// Drop all state without notifying anyone.
    pub fn clear_all(&mut self) {
        self.in_progress.clear();
        self.duplicate_callbacks.clear();
    }
}
