//! The cache engine.
//!
//! A `C2monCache` combines a keyed `Store`, a `CacheFlow` write policy, a
//! per-key `TransactionCoordinator` and a `ListenerManager`. Every write runs
//! inside the key's transaction: the record is stamped with the cache clock,
//! validated against the stored one, written, persisted and finally fanned
//! out to listeners while the key is still held, so direct listeners see the
//! writes to one key in order.
//!
//! Reads always return copies; the cache-resident value is never handed out.
pub mod flow;
pub mod store;
pub mod transaction;

use hashbrown::HashSet;
use log::*;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::listener::{
    BufferConfig, BufferedCacheListener, CacheListener, DispatchMode, ListenerId, ListenerManager,
};
use crate::record::{Cacheable, Id};

use flow::{CacheEvent, CacheFlow, DefaultCacheFlow};
use store::{BackingStore, MemoryStore, Store};
use transaction::TransactionCoordinator;

pub struct C2monCache<V: Cacheable> {
    name: String,
    store: Box<dyn Store<Id, V>>,
    flow: Box<dyn CacheFlow<V>>,
    transactions: TransactionCoordinator,
    listeners: ListenerManager<V>,
    backing: Option<Arc<dyn BackingStore<V>>>,
    clock: Arc<dyn Clock>,
    max_query_results: usize,
}

impl<V: Cacheable> C2monCache<V> {
    /// an in-memory cache with the default (cache timestamp) flow and the system clock
    pub fn new(name: &str, config: &CacheConfig) -> C2monCache<V> {
        C2monCache {
            name: name.to_string(),
            store: Box::new(MemoryStore::new()),
            flow: Box::new(DefaultCacheFlow::new()),
            transactions: TransactionCoordinator::new(name, config.lock_timeout()),
            listeners: ListenerManager::new(name, config.listener.clone()),
            backing: None,
            clock: Arc::new(SystemClock),
            max_query_results: config.max_query_results,
        }
    }

    pub fn with_flow<F: CacheFlow<V> + 'static>(mut self, flow: F) -> Self {
        self.flow = Box::new(flow);
        self
    }

    pub fn with_store<S: Store<Id, V> + 'static>(mut self, store: S) -> Self {
        self.store = Box::new(store);
        self
    }

    pub fn with_backing_store(mut self, backing: Arc<dyn BackingStore<V>>) -> Self {
        self.backing = Some(backing);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// A copy of the record at `key`.
    pub fn get(&self, key: Id) -> Result<V> {
        self.store
            .get(&key)
            .ok_or_else(|| CacheError::not_found(&self.name, key))
    }

    pub fn contains_key(&self, key: Id) -> bool {
        self.store.contains_key(&key)
    }

    pub fn keys(&self) -> HashSet<Id> {
        self.store.keys()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Write `value` and notify listeners. Returns false when the flow rejected it.
    pub fn put(&self, key: Id, value: V) -> Result<bool> {
        self.transactions
            .execute(key, || self.put_in_transaction(key, value, true))
    }

    /// Write `value` without notifying listeners.
    pub fn put_quiet(&self, key: Id, value: V) -> Result<bool> {
        self.transactions
            .execute(key, || self.put_in_transaction(key, value, false))
    }

    fn put_in_transaction(&self, key: Id, mut value: V, notify: bool) -> Result<bool> {
        if value.id() != key {
            return Err(CacheError::IdMismatch { key, id: value.id() });
        }

        value.set_cache_timestamp(self.clock.now());
        let old = self.store.get(&key);

        if !self.flow.pre_insert_validate(old.as_ref(), &value) {
            debug!("{}: rejected update for key {}", self.name, key);
            if notify {
                self.listeners.notify(CacheEvent::UpdateRejected, &value);
            }
            return Ok(false);
        }

        self.store.put(key, value.clone());
        self.persist(&value);

        if notify {
            for event in self.flow.post_insert_events(old.as_ref(), &value) {
                self.listeners.notify(event, &value);
            }
        }

        Ok(true)
    }

    // fire and forget: persistence failures belong to the backing store
    fn persist(&self, value: &V) {
        if let Some(backing) = &self.backing {
            if let Err(e) = backing.save(value) {
                error!("{}: failed to persist {}: {:?}", self.name, value.id(), e);
            }
        }
    }

    /// Remove the record at `key`; true if it was present. The key's lock
    /// entry goes with it once no other thread is using it.
    pub fn remove(&self, key: Id) -> Result<bool> {
        let removed = self
            .transactions
            .execute(key, || Ok(self.store.remove(&key).is_some()))?;
        self.transactions.release(key);
        Ok(removed)
    }

    /// copies of matching records, capped at the configured maximum
    pub fn query<F>(&self, filter: F) -> Vec<V>
    where
        F: Fn(&V) -> bool,
    {
        self.query_with_limit(filter, self.max_query_results)
    }

    pub fn query_with_limit<F>(&self, filter: F, limit: usize) -> Vec<V>
    where
        F: Fn(&V) -> bool,
    {
        let results = self.store.query(&filter, limit);
        if results.len() == limit {
            debug!("{}: query truncated at {} results", self.name, limit);
        }
        results
    }

    /// Run `work` inside the transaction for `key`, reusing one already open
    /// on this thread.
    pub fn execute_transaction<T, F>(&self, key: Id, work: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.transactions.execute(key, work)
    }

    /// true if the calling thread holds the transaction for `key`
    pub fn in_transaction(&self, key: Id) -> bool {
        self.transactions.in_transaction(key)
    }

    /// Get, mutate and put back under the key's transaction; returns the
    /// record as stored afterwards.
    ///
    /// Update only: a missing key is `NotFound` and nothing is written. The
    /// mutator works on a copy, so a panicking mutator leaves the store as it was.
    ///
    /// When the flow rejects the mutated record the call still succeeds and
    /// returns the unchanged stored record. Compare it with the expected
    /// result, or listen for `UpdateRejected`, to detect a discarded mutation.
    pub fn compute<F>(&self, key: Id, mutator: F) -> Result<V>
    where
        F: FnOnce(&mut V),
    {
        self.transactions.execute(key, || {
            let mut value = self.get(key)?;
            mutator(&mut value);
            if !self.put_in_transaction(key, value, true)? {
                debug!("{}: compute on key {} was rejected by the flow", self.name, key);
            }
            self.get(key)
        })
    }

    /// Load every record from the backing store without notifying listeners.
    pub fn preload(&self) -> Result<usize> {
        let backing = match &self.backing {
            Some(backing) => backing.clone(),
            None => return Ok(0),
        };

        let records = backing.load_all().map_err(CacheError::BackingStore)?;
        let now = self.clock.now();
        let count = records.len();
        for mut record in records {
            record.set_cache_timestamp(now);
            self.store.put(record.id(), record);
        }

        info!("{}: preloaded {} record(s)", self.name, count);
        Ok(count)
    }

    /// remove every record, without notification
    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn listeners(&self) -> &ListenerManager<V> {
        &self.listeners
    }

    pub fn register_listener(
        &self,
        listener: Arc<dyn CacheListener<V>>,
        events: &[CacheEvent],
    ) -> ListenerId {
        self.listeners.register(listener, DispatchMode::Direct, events)
    }

    /// a listener served by the configured worker pool
    pub fn register_threaded_listener(
        &self,
        listener: Arc<dyn CacheListener<V>>,
        events: &[CacheEvent],
    ) -> ListenerId {
        let mode = self.listeners.pooled_mode();
        self.listeners.register(listener, mode, events)
    }

    pub fn register_buffered_listener(
        &self,
        listener: Arc<dyn BufferedCacheListener<V>>,
        buffer: BufferConfig,
        events: &[CacheEvent],
    ) -> ListenerId {
        self.listeners.register_buffered(listener, buffer, events)
    }

    pub fn deregister_listener(&self, id: ListenerId) -> bool {
        self.listeners.deregister(id)
    }

    /// shut down listener dispatch; the stored records stay readable
    pub fn close(&self) {
        self.listeners.close();
    }
}
