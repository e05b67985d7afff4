//! keyed storage behind a cache, and the persistence hook it feeds
//!
//! The update flow and listener manager only ever talk to `Store`, so an
//! embedded map and a distributed grid are interchangeable.
use anyhow::Result;
use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;
use std::fmt::Debug;
use std::hash::Hash;

/// a concurrent keyed container
pub trait Store<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;

    /// insert or replace, returning the previous value
    fn put(&self, key: K, value: V) -> Option<V>;

    fn remove(&self, key: &K) -> Option<V>;

    fn contains_key(&self, key: &K) -> bool;

    fn keys(&self) -> HashSet<K>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// copies of the values matching `filter`, at most `limit` of them
    fn query(&self, filter: &dyn Fn(&V) -> bool, limit: usize) -> Vec<V>;

    fn clear(&self);
}

/// hashbrown map behind a read/write lock
#[derive(Debug)]
pub struct MemoryStore<K, V> {
    map: RwLock<HashMap<K, V>>,
}

impl<K, V> MemoryStore<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> MemoryStore<K, V> {
        MemoryStore {
            map: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Store<K, V> for MemoryStore<K, V>
where
    K: Eq + Hash + Copy + Debug + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        self.map.read().get(key).cloned()
    }

    fn put(&self, key: K, value: V) -> Option<V> {
        self.map.write().insert(key, value)
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.map.write().remove(key)
    }

    fn contains_key(&self, key: &K) -> bool {
        self.map.read().contains_key(key)
    }

    fn keys(&self) -> HashSet<K> {
        self.map.read().keys().copied().collect()
    }

    fn len(&self) -> usize {
        self.map.read().len()
    }

    fn query(&self, filter: &dyn Fn(&V) -> bool, limit: usize) -> Vec<V> {
        self.map
            .read()
            .values()
            .filter(|v| filter(v))
            .take(limit)
            .cloned()
            .collect()
    }

    fn clear(&self) {
        self.map.write().clear();
    }
}

/// Persistence collaborator: loaded once at startup, told about accepted
/// writes afterwards.
pub trait BackingStore<V>: Send + Sync {
    fn load_all(&self) -> Result<Vec<V>>;

    fn save(&self, value: &V) -> Result<()>;
}

/// a backing store that keeps everything in a vec; useful for preloading and tests
#[derive(Debug, Default)]
pub struct MemoryBackingStore<V> {
    records: RwLock<Vec<V>>,
    saved: RwLock<Vec<V>>,
}

impl<V: Clone> MemoryBackingStore<V> {
    pub fn new(records: Vec<V>) -> MemoryBackingStore<V> {
        MemoryBackingStore {
            records: RwLock::new(records),
            saved: RwLock::new(vec![]),
        }
    }

    /// everything passed to `save`, in order
    pub fn saved(&self) -> Vec<V> {
        self.saved.read().clone()
    }
}

impl<V: Clone + Send + Sync> BackingStore<V> for MemoryBackingStore<V> {
    fn load_all(&self) -> Result<Vec<V>> {
        Ok(self.records.read().clone())
    }

    fn save(&self, value: &V) -> Result<()> {
        self.saved.write().push(value.clone());
        Ok(())
    }
}
