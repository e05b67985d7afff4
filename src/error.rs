//! cache error taxonomy
//!
//! Validation outcomes are not errors: a rejected update is reported
//! as `Ok(false)` plus an `UpdateRejected` event, never as an error.
use crate::record::Id;

/// Errors surfaced by cache, transaction and supervision operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// the key is not present in the named cache
    #[error("element {key} not found in cache {cache}")]
    NotFound { cache: String, key: Id },

    /// a record was offered under a key that differs from its own id
    #[error("record id {id} does not match cache key {key}")]
    IdMismatch { key: Id, id: Id },

    /// the lock wait timed out while the caller held other key locks
    #[error("deadlock detected on cache {cache}, key {key} after {waited_ms}ms")]
    TransactionDeadlock {
        cache: String,
        key: Id,
        waited_ms: u64,
    },

    /// the lock wait timed out with no other locks held
    #[error("timeout waiting for lock on cache {cache}, key {key} after {waited_ms}ms")]
    TransactionTimeout {
        cache: String,
        key: Id,
        waited_ms: u64,
    },

    #[error("backing store failure: {0}")]
    BackingStore(#[source] anyhow::Error),

    /// the cache (or its listener manager) has been closed
    #[error("cache {0} is closed")]
    Closed(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CacheError {
    pub fn not_found(cache: &str, key: Id) -> CacheError {
        CacheError::NotFound {
            cache: cache.to_string(),
            key,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound { .. })
    }
}

/// crate result alias
pub type Result<T> = std::result::Result<T, CacheError>;
