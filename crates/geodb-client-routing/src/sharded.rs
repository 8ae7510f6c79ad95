//! Sharded concurrent map used by the per-partition registries
//!
//! Each shard is a `RwLock<HashMap>` of `Arc<Mutex<V>>` entries: the shard lock is only
//! held to find or insert an entry, and updates to one partition never block updates to
//! partitions living in other entries.

use std::{
    collections::HashMap,
    hash::{BuildHasher, Hash, RandomState},
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

const DEFAULT_SHARDS: usize = 16;

pub(crate) struct ShardedMap<K, V> {
    shards: Box<[RwLock<HashMap<K, Arc<Mutex<V>>>>]>,
    hasher: RandomState,
}

impl<K: Hash + Eq + Clone, V> ShardedMap<K, V> {
    pub(crate) fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub(crate) fn with_shards(shards: usize) -> Self {
        let shards = (0..shards.max(1)).map(|_| RwLock::new(HashMap::new())).collect();
        Self { shards, hasher: RandomState::new() }
    }

    fn shard(&self, key: &K) -> &RwLock<HashMap<K, Arc<Mutex<V>>>> {
        let index = (self.hasher.hash_one(key) as usize) % self.shards.len();
        &self.shards[index]
    }

    pub(crate) fn get(&self, key: &K) -> Option<Arc<Mutex<V>>> {
        read(self.shard(key)).get(key).cloned()
    }

    /// Get the entry for `key`, inserting the value produced by `init` when absent.
    /// Racing callers all observe the same entry.
    pub(crate) fn get_or_insert_with(&self, key: &K, init: impl FnOnce() -> V) -> Arc<Mutex<V>> {
        if let Some(entry) = self.get(key) {
            return entry;
        }

        write(self.shard(key))
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(init())))
            .clone()
    }

    pub(crate) fn remove(&self, key: &K) -> Option<Arc<Mutex<V>>> {
        write(self.shard(key)).remove(key)
    }

    pub(crate) fn retain(&self, mut keep: impl FnMut(&K) -> bool) {
        for shard in self.shards.iter() {
            write(shard).retain(|k, _| keep(k));
        }
    }

    pub(crate) fn clear(&self) {
        for shard in self.shards.iter() {
            write(shard).clear();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|shard| read(shard).len()).sum()
    }
}

impl<K: Hash + Eq + Clone, V> Default for ShardedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

// Poisoned locks are recovered: every critical section leaves its data consistent.

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
