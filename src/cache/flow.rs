//! Update flow: the accept/reject decision for a write and the events an
//! accepted write produces.
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::record::Cacheable;

/// the kinds of notification a cache emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheEvent {
    UpdateAccepted,
    UpdateRejected,
    SupervisionUpdate,
    SupervisionChange,
}

impl CacheEvent {
    pub const ALL: [CacheEvent; 4] = [
        CacheEvent::UpdateAccepted,
        CacheEvent::UpdateRejected,
        CacheEvent::SupervisionUpdate,
        CacheEvent::SupervisionChange,
    ];
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheEvent::UpdateAccepted => "UPDATE_ACCEPTED",
            CacheEvent::UpdateRejected => "UPDATE_REJECTED",
            CacheEvent::SupervisionUpdate => "SUPERVISION_UPDATE",
            CacheEvent::SupervisionChange => "SUPERVISION_CHANGE",
        };
        write!(f, "{}", name)
    }
}

/// Write policy for a cache.
///
/// `pre_insert_validate` runs under the key's transaction before the store is
/// touched; `post_insert_events` only runs for accepted writes. Rejections are
/// reported by the cache itself as `UpdateRejected`.
pub trait CacheFlow<V>: Send + Sync {
    fn pre_insert_validate(&self, old: Option<&V>, new: &V) -> bool;

    fn post_insert_events(&self, old: Option<&V>, new: &V) -> Vec<CacheEvent>;
}

type Ordering<V> = Box<dyn Fn(&V, &V) -> bool + Send + Sync>;

/// First inserts always pass; later writes pass when `ordering(old, new)` holds.
pub struct DefaultCacheFlow<V> {
    ordering: Ordering<V>,
}

impl<V: Cacheable> DefaultCacheFlow<V> {
    /// accept writes whose cache timestamp is not older than the stored one
    pub fn new() -> DefaultCacheFlow<V> {
        DefaultCacheFlow::with_ordering(|old: &V, new: &V| {
            match (old.cache_timestamp(), new.cache_timestamp()) {
                (Some(old_ts), Some(new_ts)) => new_ts >= old_ts,
                _ => true,
            }
        })
    }
}

impl<V: Cacheable> Default for DefaultCacheFlow<V> {
    fn default() -> Self {
        DefaultCacheFlow::new()
    }
}

impl<V> DefaultCacheFlow<V> {
    pub fn with_ordering<F>(ordering: F) -> DefaultCacheFlow<V>
    where
        F: Fn(&V, &V) -> bool + Send + Sync + 'static,
    {
        DefaultCacheFlow {
            ordering: Box::new(ordering),
        }
    }
}

impl<V: Send + Sync> CacheFlow<V> for DefaultCacheFlow<V> {
    fn pre_insert_validate(&self, old: Option<&V>, new: &V) -> bool {
        match old {
            None => true,
            Some(old) => (self.ordering)(old, new),
        }
    }

    fn post_insert_events(&self, _old: Option<&V>, _new: &V) -> Vec<CacheEvent> {
        vec![CacheEvent::UpdateAccepted]
    }
}

/// records that carry a running / not running state
pub trait Supervised {
    fn is_running(&self) -> bool;
}

/// Adds `SupervisionUpdate` to every accepted write and `SupervisionChange`
/// only when the running state flips (a first insert counts as a flip).
pub struct SupervisionCacheFlow<V> {
    inner: DefaultCacheFlow<V>,
}

impl<V: Cacheable + Supervised> SupervisionCacheFlow<V> {
    pub fn new() -> SupervisionCacheFlow<V> {
        SupervisionCacheFlow {
            inner: DefaultCacheFlow::new(),
        }
    }
}

impl<V: Cacheable + Supervised> Default for SupervisionCacheFlow<V> {
    fn default() -> Self {
        SupervisionCacheFlow::new()
    }
}

impl<V> SupervisionCacheFlow<V> {
    pub fn with_inner(inner: DefaultCacheFlow<V>) -> SupervisionCacheFlow<V> {
        SupervisionCacheFlow { inner }
    }
}

impl<V: Supervised + Send + Sync> CacheFlow<V> for SupervisionCacheFlow<V> {
    fn pre_insert_validate(&self, old: Option<&V>, new: &V) -> bool {
        self.inner.pre_insert_validate(old, new)
    }

    fn post_insert_events(&self, old: Option<&V>, new: &V) -> Vec<CacheEvent> {
        let mut events = self.inner.post_insert_events(old, new);
        events.push(CacheEvent::SupervisionUpdate);

        let changed = match old {
            Some(old) => old.is_running() != new.is_running(),
            None => true,
        };
        if changed {
            events.push(CacheEvent::SupervisionChange);
        }

        events
    }
}
