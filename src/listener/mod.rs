//! Listener registration and dispatch.
//!
//! A listener is registered with one of three dispatch strategies:
//!
//! * direct: runs inline on the writer's thread, in write order
//! * pooled: queued to a fixed set of async-std worker tasks; two updates to
//!   the same key may reach the listener out of order
//! * buffered: records accumulate and are delivered as one batch on a timer
//!   or when the buffer reaches its size threshold
//!
//! Every listener receives its own clone of the record. Errors and panics in
//! a listener are logged and counted; they never reach the writer.
use anyhow::Result;
use log::*;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cache::flow::CacheEvent;

pub mod dispatch;
pub mod manager;

pub use manager::{BufferConfig, DispatchMode, ListenerManager};

/// handle returned on registration, used to deregister
pub type ListenerId = u64;

/// receives one event at a time
pub trait CacheListener<V>: Send + Sync {
    fn on_event(&self, event: CacheEvent, record: V) -> Result<()>;
}

/// receives accumulated records as one collection
pub trait BufferedCacheListener<V>: Send + Sync {
    fn on_batch(&self, records: Vec<V>) -> Result<()>;
}

/// closures make simple listeners
impl<V, F> CacheListener<V> for F
where
    F: Fn(CacheEvent, V) -> Result<()> + Send + Sync,
{
    fn on_event(&self, event: CacheEvent, record: V) -> Result<()> {
        self(event, record)
    }
}

// run a listener callback, containing errors and panics
pub(crate) fn invoke<F>(listener_id: ListenerId, errors: &AtomicU64, callback: F)
where
    F: FnOnce() -> Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => (),
        Ok(Err(e)) => {
            errors.fetch_add(1, Ordering::Relaxed);
            error!("listener {} failed: {:?}", listener_id, e);
        }
        Err(cause) => {
            errors.fetch_add(1, Ordering::Relaxed);
            let msg = cause
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| cause.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("listener {} panicked: {}", listener_id, msg);
        }
    }
}
