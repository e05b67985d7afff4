//! The three dispatch strategies. Each owns one listener, a status id and
//! an uptime, and knows how to shut itself down without hanging.
use async_channel::{bounded, Receiver, Sender, TrySendError};
use async_std::future;
use async_std::task::{self, JoinHandle};
use domain_keys::keys::RouteKey;
use log::*;
use parking_lot::Mutex;
use service_uptime::Uptime;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{invoke, BufferedCacheListener, CacheListener, ListenerId};
use crate::cache::flow::CacheEvent;
use crate::status::{DispatchKind, DispatcherState, DispatcherStatus};

pub enum Dispatcher<V> {
    Direct(DirectDispatcher<V>),
    Pooled(PooledDispatcher<V>),
    Buffered(BufferedDispatcher<V>),
}

impl<V: Clone + Send + Sync + 'static> Dispatcher<V> {
    /// hand a copy of `record` to the listener
    pub fn dispatch(&self, event: CacheEvent, record: &V) {
        match self {
            Dispatcher::Direct(d) => d.dispatch(event, record.clone()),
            Dispatcher::Pooled(d) => d.dispatch(event, record.clone()),
            Dispatcher::Buffered(d) => {
                d.dispatch(record.clone());
            }
        }
    }

    pub fn close(&self, timeout: Duration) {
        match self {
            Dispatcher::Direct(d) => d.close(),
            Dispatcher::Pooled(d) => d.close(timeout),
            Dispatcher::Buffered(d) => d.close(timeout),
        }
    }

    pub fn status(&self) -> DispatcherStatus {
        match self {
            Dispatcher::Direct(d) => d.status(),
            Dispatcher::Pooled(d) => d.status(),
            Dispatcher::Buffered(d) => d.status(),
        }
    }
}

fn state_of(closed: bool, busy: bool, errors: u64) -> DispatcherState {
    if closed {
        DispatcherState::Shutdown
    } else if errors > 0 {
        DispatcherState::Broken
    } else if busy {
        DispatcherState::Busy
    } else {
        DispatcherState::Idle
    }
}

/// runs the listener on the writer's thread
pub struct DirectDispatcher<V> {
    id: String,
    listener_id: ListenerId,
    uptime: Uptime,
    listener: Arc<dyn CacheListener<V>>,
    errors: AtomicU64,
    closed: AtomicBool,
}

impl<V: Clone + Send + Sync + 'static> DirectDispatcher<V> {
    pub fn new(listener_id: ListenerId, listener: Arc<dyn CacheListener<V>>) -> DirectDispatcher<V> {
        DirectDispatcher {
            id: RouteKey::create(),
            listener_id,
            uptime: Uptime::new(),
            listener,
            errors: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn dispatch(&self, event: CacheEvent, record: V) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        invoke(self.listener_id, &self.errors, || {
            self.listener.on_event(event, record)
        });
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn status(&self) -> DispatcherStatus {
        let errors = self.errors.load(Ordering::Relaxed);
        DispatcherStatus::new(
            self.id.clone(),
            self.listener_id,
            DispatchKind::Direct,
            state_of(self.closed.load(Ordering::Acquire), false, errors),
            self.uptime.to_string(),
            0,
            errors,
        )
    }
}

/// a fixed pool of worker tasks sharing one bounded queue
pub struct PooledDispatcher<V> {
    id: String,
    listener_id: ListenerId,
    uptime: Uptime,
    request_tx: Sender<(CacheEvent, V)>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stopped: Arc<AtomicBool>,
    busy: Arc<AtomicUsize>,
    errors: Arc<AtomicU64>,
}

// the worker loop
async fn pooled_worker<V: Send + 'static>(
    listener_id: ListenerId,
    listener: Arc<dyn CacheListener<V>>,
    rx: Receiver<(CacheEvent, V)>,
    stopped: Arc<AtomicBool>,
    busy: Arc<AtomicUsize>,
    errors: Arc<AtomicU64>,
) {
    while let Ok((event, record)) = rx.recv().await {
        if stopped.load(Ordering::Acquire) {
            break;
        }
        busy.fetch_add(1, Ordering::AcqRel);

        // listeners are blocking code; keep them off the executor threads
        let listener = listener.clone();
        let errors = errors.clone();
        task::spawn_blocking(move || {
            invoke(listener_id, &errors, || listener.on_event(event, record))
        })
        .await;

        busy.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<V: Clone + Send + Sync + 'static> PooledDispatcher<V> {
    /// create the queue and start `pool_size` workers
    pub fn start(
        listener_id: ListenerId,
        listener: Arc<dyn CacheListener<V>>,
        pool_size: usize,
        queue_capacity: usize,
    ) -> PooledDispatcher<V> {
        let id = RouteKey::create();
        let (request_tx, request_rx) = bounded(queue_capacity.max(1));
        let stopped = Arc::new(AtomicBool::new(false));
        let busy = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicU64::new(0));

        info!(
            "starting pooled dispatcher {} for listener {} with {} workers",
            id, listener_id, pool_size
        );

        let handles = (0..pool_size.max(1))
            .map(|_| {
                task::spawn(pooled_worker(
                    listener_id,
                    listener.clone(),
                    request_rx.clone(),
                    stopped.clone(),
                    busy.clone(),
                    errors.clone(),
                ))
            })
            .collect();

        PooledDispatcher {
            id,
            listener_id,
            uptime: Uptime::new(),
            request_tx,
            handles: Mutex::new(handles),
            stopped,
            busy,
            errors,
        }
    }

    /// queue the record; waits for room when the queue is full
    pub fn dispatch(&self, event: CacheEvent, record: V) {
        match self.request_tx.try_send((event, record)) {
            Ok(()) => (),
            Err(TrySendError::Full(request)) => {
                debug!("listener {} queue full, waiting", self.listener_id);
                if task::block_on(self.request_tx.send(request)).is_err() {
                    warn!("listener {} closed while waiting to queue", self.listener_id);
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!("listener {} is closed, dropping {}", self.listener_id, event);
            }
        }
    }

    /// Drain queued work for up to `timeout`, then stop the workers.
    pub fn close(&self, timeout: Duration) {
        self.request_tx.close();
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();

        let drained = task::block_on(future::timeout(timeout, async move {
            for handle in handles {
                handle.await;
            }
        }));

        if drained.is_err() {
            warn!(
                "listener {} did not drain within {:?}, force stopping with {} queued",
                self.listener_id,
                timeout,
                self.request_tx.len()
            );
        }
        self.stopped.store(true, Ordering::Release);
    }

    pub fn status(&self) -> DispatcherStatus {
        let errors = self.errors.load(Ordering::Relaxed);
        let pending = self.request_tx.len();
        let busy = pending > 0 || self.busy.load(Ordering::Acquire) > 0;
        DispatcherStatus::new(
            self.id.clone(),
            self.listener_id,
            DispatchKind::Pooled,
            state_of(self.request_tx.is_closed(), busy, errors),
            self.uptime.to_string(),
            pending,
            errors,
        )
    }
}

struct Buffer<V> {
    listener_id: ListenerId,
    listener: Arc<dyn BufferedCacheListener<V>>,
    records: Mutex<Vec<V>>,
    // serializes batch delivery so batches arrive in order
    delivery: Mutex<()>,
    max_size: usize,
    errors: AtomicU64,
}

impl<V> Buffer<V> {
    fn flush(&self) {
        let _delivery = self.delivery.lock();
        let batch = mem::take(&mut *self.records.lock());
        if batch.is_empty() {
            return;
        }

        trace!("listener {} flushing {} records", self.listener_id, batch.len());
        invoke(self.listener_id, &self.errors, || self.listener.on_batch(batch));
    }
}

/// collects records and delivers them in batches
pub struct BufferedDispatcher<V> {
    id: String,
    listener_id: ListenerId,
    uptime: Uptime,
    buffer: Arc<Buffer<V>>,
    shutdown_tx: Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<V: Clone + Send + Sync + 'static> BufferedDispatcher<V> {
    /// start the flush timer task
    pub fn start(
        listener_id: ListenerId,
        listener: Arc<dyn BufferedCacheListener<V>>,
        interval: Duration,
        max_size: usize,
    ) -> BufferedDispatcher<V> {
        let id = RouteKey::create();
        let buffer = Arc::new(Buffer {
            listener_id,
            listener,
            records: Mutex::new(vec![]),
            delivery: Mutex::new(()),
            max_size: max_size.max(1),
            errors: AtomicU64::new(0),
        });
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        info!(
            "starting buffered dispatcher {} for listener {}, interval: {:?}, max size: {}",
            id, listener_id, interval, max_size
        );

        let timer_buffer = buffer.clone();
        let handle = task::spawn(async move {
            loop {
                let stop = future::timeout(interval, shutdown_rx.recv()).await.is_ok();
                let buffer = timer_buffer.clone();
                task::spawn_blocking(move || buffer.flush()).await;
                if stop {
                    break;
                }
            }
            debug!("buffer timer exit for listener {}", timer_buffer.listener_id);
        });

        BufferedDispatcher {
            id,
            listener_id,
            uptime: Uptime::new(),
            buffer,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Buffer `record`; false once the dispatcher is closed.
    pub fn dispatch(&self, record: V) -> bool {
        let full = {
            // checked under the buffer lock so the final flush in close sees every push
            let mut records = self.buffer.records.lock();
            if self.shutdown_tx.is_closed() {
                return false;
            }
            records.push(record);
            records.len() >= self.buffer.max_size
        };

        if full {
            self.buffer.flush();
        }
        true
    }

    /// deliver whatever is buffered now
    pub fn flush(&self) {
        self.buffer.flush();
    }

    /// Flush pending records and stop the timer, waiting up to `timeout`.
    pub fn close(&self, timeout: Duration) {
        {
            let _records = self.buffer.records.lock();
            self.shutdown_tx.close();
        }

        if let Some(handle) = self.handle.lock().take() {
            if task::block_on(future::timeout(timeout, handle)).is_err() {
                warn!(
                    "buffered listener {} did not stop within {:?}, abandoning timer",
                    self.listener_id, timeout
                );
                return;
            }
            // anything pushed while the timer was shutting down
            self.buffer.flush();
        }
    }

    pub fn status(&self) -> DispatcherStatus {
        let errors = self.buffer.errors.load(Ordering::Relaxed);
        let pending = self.buffer.records.lock().len();
        DispatcherStatus::new(
            self.id.clone(),
            self.listener_id,
            DispatchKind::Buffered,
            state_of(self.shutdown_tx.is_closed(), pending > 0, errors),
            self.uptime.to_string(),
            pending,
            errors,
        )
    }
}
