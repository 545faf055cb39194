//! Surface of the process-wide embedding-model cache. The inference pipeline
//! that actually loads a model onto a device is an external collaborator;
//! this module owns only the bookkeeping contract the rest of the core
//! relies on: a keyed mapping with most-recently-used tracking,
//! least-recently-used eviction bounded by a per-device budget, and a
//! single in-flight load at a time.
//!
//! This is a single owned cache behind a mutex: readers take a cloned
//! handle under the lock, evictions and inserts hold the same lock, and
//! there is no re-entrancy.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use crate::error::{CoreError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModelCacheKey {
    pub model_name: String,
    pub device: String,
    pub properties_fingerprint: String,
}

struct Entry<T> {
    handle: T,
    size_bytes: u64,
    last_used: Instant,
}

struct DeviceCache<T> {
    budget_bytes: u64,
    entries: HashMap<ModelCacheKey, Entry<T>>,
}

/// Held while a load is in flight; a second concurrent `begin_load` call
/// fails with a transient "cache busy" error rather than blocking.
pub struct LoadGuard<'a>(#[allow(dead_code)] MutexGuard<'a, ()>);

pub struct ModelCache<T> {
    devices: Mutex<HashMap<String, DeviceCache<T>>>,
    load_lock: Mutex<()>,
}

impl<T> Default for ModelCache<T> {
    fn default() -> Self {
        Self { devices: Mutex::new(HashMap::new()), load_lock: Mutex::new(()) }
    }
}

impl<T: Clone> ModelCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a clone of the cached handle, bumping its most-recently-used
    /// timestamp, or `None` on a miss.
    pub fn get(&self, key: &ModelCacheKey) -> Option<T> {
        let mut devices = self.devices.lock().expect("model cache mutex poisoned");
        let dc = devices.get_mut(&key.device)?;
        let entry = dc.entries.get_mut(key)?;
        entry.last_used = Instant::now();
        Some(entry.handle.clone())
    }

    /// Attempts to claim the process-wide load lock. A second concurrent
    /// attempt while a load is already in flight returns `Transient`
    /// immediately rather than queuing.
    pub fn begin_load(&self) -> Result<LoadGuard<'_>> {
        match self.load_lock.try_lock() {
            Ok(guard) => Ok(LoadGuard(guard)),
            Err(_) => Err(CoreError::Transient("model cache busy: a load is already in progress".into())),
        }
    }

    /// Inserts a freshly loaded model, evicting least-recently-used entries
    /// on `key.device` until it fits `device_budget_bytes`. Requires a
    /// [`LoadGuard`] obtained from [`Self::begin_load`] to enforce that loads
    /// and evictions never run re-entrantly with another load.
    pub fn insert(&self, _guard: &LoadGuard<'_>, key: ModelCacheKey, handle: T, size_bytes: u64, device_budget_bytes: u64) -> Result<()> {
        let mut devices = self.devices.lock().expect("model cache mutex poisoned");
        let dc = devices.entry(key.device.clone()).or_insert_with(|| DeviceCache { budget_bytes: device_budget_bytes, entries: HashMap::new() });
        dc.budget_bytes = device_budget_bytes;

        if size_bytes > dc.budget_bytes {
            return Err(CoreError::CapacityExhausted(format!(
                "model '{}' ({size_bytes} bytes) exceeds device '{}' budget ({} bytes)",
                key.model_name, key.device, dc.budget_bytes
            )));
        }

        let mut total: u64 = dc.entries.values().map(|e| e.size_bytes).sum();
        while total + size_bytes > dc.budget_bytes {
            let lru = dc.entries.iter().min_by_key(|(_, e)| e.last_used).map(|(k, _)| k.clone());
            match lru {
                Some(victim) => {
                    let removed = dc.entries.remove(&victim).expect("key came from this map");
                    total -= removed.size_bytes;
                }
                None => {
                    return Err(CoreError::CapacityExhausted(format!(
                        "cannot fit model '{}' on device '{}': no entries left to evict",
                        key.model_name, key.device
                    )));
                }
            }
        }

        dc.entries.insert(key, Entry { handle, size_bytes, last_used: Instant::now() });
        Ok(())
    }

    pub fn len_for_device(&self, device: &str) -> usize {
        self.devices.lock().expect("model cache mutex poisoned").get(device).map(|dc| dc.entries.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(model: &str) -> ModelCacheKey {
        ModelCacheKey { model_name: model.into(), device: "cuda:0".into(), properties_fingerprint: "default".into() }
    }

    #[test]
    fn evicts_least_recently_used_to_make_room() {
        let cache: ModelCache<&'static str> = ModelCache::new();
        let guard = cache.begin_load().unwrap();
        cache.insert(&guard, key("a"), "handle-a", 60, 100).unwrap();
        drop(guard);

        cache.get(&key("a")).unwrap(); // bump a's recency

        let guard = cache.begin_load().unwrap();
        cache.insert(&guard, key("b"), "handle-b", 60, 100).unwrap();
        drop(guard);

        // a was bumped more recently than b would need to be evicted for c,
        // so c's insert must evict b (the LRU entry), not a.
        let guard = cache.begin_load().unwrap();
        cache.insert(&guard, key("c"), "handle-c", 60, 100).unwrap();
        drop(guard);

        assert!(cache.get(&key("a")).is_some());
        assert!(cache.get(&key("b")).is_none());
        assert!(cache.get(&key("c")).is_some());
    }

    #[test]
    fn oversized_model_fails_capacity_even_when_empty() {
        let cache: ModelCache<&'static str> = ModelCache::new();
        let guard = cache.begin_load().unwrap();
        let err = cache.insert(&guard, key("huge"), "handle", 200, 100).unwrap_err();
        assert!(matches!(err, CoreError::CapacityExhausted(_)));
    }

    #[test]
    fn concurrent_load_attempt_is_transient_busy() {
        let cache: ModelCache<&'static str> = ModelCache::new();
        let _guard = cache.begin_load().unwrap();
        let err = cache.begin_load().unwrap_err();
        assert!(matches!(err, CoreError::Transient(_)));
    }
}
