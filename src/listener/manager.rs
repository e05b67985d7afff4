//! Per-cache listener registry.
use hashbrown::HashSet;
use log::*;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::dispatch::{BufferedDispatcher, DirectDispatcher, Dispatcher, PooledDispatcher};
use super::{BufferedCacheListener, CacheListener, ListenerId};
use crate::cache::flow::CacheEvent;
use crate::config::ListenerConfig;
use crate::status::{to_json, DispatcherStatus, JsonString};

/// how a listener's notifications are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// inline on the writer's thread
    Direct,
    /// via a fixed pool of workers; per-key ordering is not preserved
    Pooled { pool_size: usize, queue_capacity: usize },
}

/// when a buffered listener's batch is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    pub interval: Duration,
    pub max_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        let config = ListenerConfig::default();
        BufferConfig {
            interval: config.buffer_interval(),
            max_size: config.buffer_max_size,
        }
    }
}

struct Registration<V> {
    id: ListenerId,
    events: HashSet<CacheEvent>,
    dispatcher: Dispatcher<V>,
}

pub struct ListenerManager<V> {
    name: String,
    config: ListenerConfig,
    next_id: AtomicU64,
    closed: AtomicBool,
    registrations: RwLock<Vec<Arc<Registration<V>>>>,
}

impl<V: Clone + Send + Sync + 'static> ListenerManager<V> {
    pub fn new(name: &str, config: ListenerConfig) -> ListenerManager<V> {
        ListenerManager {
            name: name.to_string(),
            config,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            registrations: RwLock::new(vec![]),
        }
    }

    /// the pooled mode sized from this manager's config
    pub fn pooled_mode(&self) -> DispatchMode {
        DispatchMode::Pooled {
            pool_size: self.config.pool_size,
            queue_capacity: self.config.queue_capacity,
        }
    }

    /// the buffer settings from this manager's config
    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig {
            interval: self.config.buffer_interval(),
            max_size: self.config.buffer_max_size,
        }
    }

    /// Register `listener` for the given event kinds. An empty slice means all kinds.
    pub fn register(
        &self,
        listener: Arc<dyn CacheListener<V>>,
        mode: DispatchMode,
        events: &[CacheEvent],
    ) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let dispatcher = match mode {
            DispatchMode::Direct => Dispatcher::Direct(DirectDispatcher::new(id, listener)),
            DispatchMode::Pooled {
                pool_size,
                queue_capacity,
            } => Dispatcher::Pooled(PooledDispatcher::start(
                id,
                listener,
                pool_size,
                queue_capacity,
            )),
        };

        self.add(id, dispatcher, events)
    }

    /// Register a listener that receives records in batches.
    pub fn register_buffered(
        &self,
        listener: Arc<dyn BufferedCacheListener<V>>,
        buffer: BufferConfig,
        events: &[CacheEvent],
    ) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let dispatcher = Dispatcher::Buffered(BufferedDispatcher::start(
            id,
            listener,
            buffer.interval,
            buffer.max_size,
        ));

        self.add(id, dispatcher, events)
    }

    fn add(&self, id: ListenerId, dispatcher: Dispatcher<V>, events: &[CacheEvent]) -> ListenerId {
        let events: HashSet<CacheEvent> = if events.is_empty() {
            CacheEvent::ALL.iter().copied().collect()
        } else {
            events.iter().copied().collect()
        };

        debug!("{}: registered listener {} for {:?}", self.name, id, events);
        let registration = Arc::new(Registration {
            id,
            events,
            dispatcher,
        });

        if self.closed.load(Ordering::Acquire) {
            warn!("{}: listener {} registered after close", self.name, id);
            registration
                .dispatcher
                .close(self.config.shutdown_timeout());
        } else {
            self.registrations.write().push(registration);
        }

        id
    }

    /// Remove and shut down a listener. Returns false if the id is unknown.
    pub fn deregister(&self, id: ListenerId) -> bool {
        let removed = {
            let mut registrations = self.registrations.write();
            let position = registrations.iter().position(|r| r.id == id);
            position.map(|index| registrations.remove(index))
        };

        match removed {
            Some(registration) => {
                registration
                    .dispatcher
                    .close(self.config.shutdown_timeout());
                debug!("{}: deregistered listener {}", self.name, id);
                true
            }
            None => false,
        }
    }

    /// Deliver `record` to every listener registered for `event`.
    pub fn notify(&self, event: CacheEvent, record: &V) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        // snapshot so listeners may register or deregister while being notified
        let targets: Vec<Arc<Registration<V>>> = self
            .registrations
            .read()
            .iter()
            .filter(|r| r.events.contains(&event))
            .cloned()
            .collect();

        for registration in targets {
            registration.dispatcher.dispatch(event, record);
        }
    }

    pub fn len(&self) -> usize {
        self.registrations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self) -> Vec<DispatcherStatus> {
        self.registrations
            .read()
            .iter()
            .map(|r| r.dispatcher.status())
            .collect()
    }

    pub fn status_json(&self) -> JsonString {
        to_json(&self.status())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Flush buffers, drain pools within the shutdown timeout, then drop all listeners.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let registrations: Vec<Arc<Registration<V>>> = self.registrations.write().drain(..).collect();
        info!("{}: closing {} listener(s)", self.name, registrations.len());

        let timeout = self.config.shutdown_timeout();
        for registration in registrations {
            registration.dispatcher.close(timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(CacheEvent, i64)>>,
    }

    impl CacheListener<i64> for Recorder {
        fn on_event(&self, event: CacheEvent, record: i64) -> anyhow::Result<()> {
            self.seen.lock().push((event, record));
            Ok(())
        }
    }

    #[test]
    fn filters_by_event_kind() {
        let manager: ListenerManager<i64> = ListenerManager::new("test", ListenerConfig::default());
        let accepted = Arc::new(Recorder::default());
        let everything = Arc::new(Recorder::default());

        manager.register(accepted.clone(), DispatchMode::Direct, &[CacheEvent::UpdateAccepted]);
        manager.register(everything.clone(), DispatchMode::Direct, &[]);
        assert_eq!(manager.len(), 2);

        manager.notify(CacheEvent::UpdateAccepted, &1);
        manager.notify(CacheEvent::UpdateRejected, &2);

        assert_eq!(*accepted.seen.lock(), vec![(CacheEvent::UpdateAccepted, 1)]);
        assert_eq!(
            *everything.seen.lock(),
            vec![(CacheEvent::UpdateAccepted, 1), (CacheEvent::UpdateRejected, 2)]
        );
    }

    #[test]
    fn deregister_stops_delivery() {
        let manager: ListenerManager<i64> = ListenerManager::new("test", ListenerConfig::default());
        let recorder = Arc::new(Recorder::default());

        let id = manager.register(recorder.clone(), DispatchMode::Direct, &[]);
        manager.notify(CacheEvent::UpdateAccepted, &1);
        assert!(manager.deregister(id));
        assert!(!manager.deregister(id));
        manager.notify(CacheEvent::UpdateAccepted, &2);

        assert_eq!(recorder.seen.lock().len(), 1);
        assert!(manager.is_empty());
    }

    #[test]
    fn failing_listener_does_not_block_others() {
        let manager: ListenerManager<i64> = ListenerManager::new("test", ListenerConfig::default());
        let failing = |_event: CacheEvent, _record: i64| -> anyhow::Result<()> {
            anyhow::bail!("always fails")
        };
        let recorder = Arc::new(Recorder::default());

        manager.register(Arc::new(failing), DispatchMode::Direct, &[]);
        manager.register(recorder.clone(), DispatchMode::Direct, &[]);
        manager.notify(CacheEvent::UpdateAccepted, &7);

        assert_eq!(recorder.seen.lock().len(), 1);
        let status = manager.status();
        assert_eq!(status[0].error_count, 1);
        assert_eq!(status[1].error_count, 0);
        assert!(manager.status_json().starts_with('['));
    }

    #[test]
    fn close_is_idempotent() {
        let manager: ListenerManager<i64> = ListenerManager::new("test", ListenerConfig::default());
        let recorder = Arc::new(Recorder::default());
        let mode = manager.pooled_mode();
        manager.register(recorder.clone(), mode, &[]);

        for n in 0..10 {
            manager.notify(CacheEvent::UpdateAccepted, &n);
        }
        manager.close();
        manager.close();

        assert!(manager.is_closed());
        assert!(manager.is_empty());
        assert_eq!(recorder.seen.lock().len(), 10);

        manager.notify(CacheEvent::UpdateAccepted, &99);
        assert_eq!(recorder.seen.lock().len(), 10);
    }
}
