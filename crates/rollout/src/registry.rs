//! At most one active cancellable operation per key.
//!
//! Registering under a key cancels whatever was registered there before. Each
//! registration gets a generation from a registry-wide counter; the cleanup handle it
//! returns only removes the entry while that generation is still the one installed, so
//! a stale cleanup never tears down a newer operation.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use metrics::{counter, gauge};
use tracing::debug;

/// Cancellation callback. Must tolerate being called more than once.
pub type CancelFn = Arc<dyn Fn() + Send + Sync>;

struct Entry {
    generation: u64,
    cancel: CancelFn,
}

struct Inner<K> {
    generation: u64,
    entries: HashMap<K, Entry>,
}

pub struct CancellationRegistry<K> {
    inner: Arc<Mutex<Inner<K>>>,
}

impl<K> Clone for CancellationRegistry<K> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<K: Eq + Hash + Clone> Default for CancellationRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for CancellationRegistry<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("CancellationRegistry").field("generation", &inner.generation).field("entries", &inner.entries.len()).finish()
    }
}

impl<K: Eq + Hash + Clone> CancellationRegistry<K> {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(Inner { generation: 0, entries: HashMap::new() })) }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K>> {
        // Map operations never leave the state half-written, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `cancel` under `key`, cancelling the previous holder, and return the
    /// cleanup handle for this registration.
    pub fn register_and_cancel_previous<F>(&self, key: K, cancel: F) -> Cleanup<K>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let cancel: CancelFn = Arc::new(cancel);
        let (generation, previous, len) = {
            let mut inner = self.lock();
            inner.generation += 1;
            let generation = inner.generation;
            let previous = inner.entries.insert(key.clone(), Entry { generation, cancel: Arc::clone(&cancel) });
            (generation, previous, inner.entries.len())
        };
        gauge!("rollout_registry_entries", len as f64);
        if let Some(prev) = previous {
            debug!(generation, replaced = prev.generation, "cancelling replaced operation");
            counter!("rollout_registry_replaced", 1u64);
            (prev.cancel)();
        }
        Cleanup { registry: self.clone(), key, generation, cancel }
    }

    pub fn is_active(&self, key: &K) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Generation currently installed under `key`.
    pub fn generation_of(&self, key: &K) -> Option<u64> {
        self.lock().entries.get(key).map(|e| e.generation)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove `key` only if `generation` is still installed. Returns whether it was removed.
    fn remove_if_current(&self, key: &K, generation: u64) -> bool {
        let mut inner = self.lock();
        let current = inner.entries.get(key).map(|e| e.generation);
        let removed = current == Some(generation) && inner.entries.remove(key).is_some();
        gauge!("rollout_registry_entries", inner.entries.len() as f64);
        removed
    }
}

/// Returned by [`CancellationRegistry::register_and_cancel_previous`].
///
/// Invoking it cancels the captured operation and drops the registry entry if nobody
/// replaced it in the meantime. Safe to invoke repeatedly.
pub struct Cleanup<K: Eq + Hash + Clone> {
    registry: CancellationRegistry<K>,
    key: K,
    generation: u64,
    cancel: CancelFn,
}

impl<K: Eq + Hash + Clone> Cleanup<K> {
    pub fn invoke(&self) {
        (self.cancel)();
        let removed = self.registry.remove_if_current(&self.key, self.generation);
        debug!(generation = self.generation, removed, "rollout cleanup");
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<K: Eq + Hash + Clone> Clone for Cleanup<K> {
    fn clone(&self) -> Self {
        Self { registry: self.registry.clone(), key: self.key.clone(), generation: self.generation, cancel: Arc::clone(&self.cancel) }
    }
}

impl<K: Eq + Hash + Clone> fmt::Debug for Cleanup<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cleanup").field("generation", &self.generation).finish()
    }
}
