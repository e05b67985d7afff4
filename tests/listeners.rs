/// integration tests for direct, pooled and buffered listener delivery
///
use monitor_cache::config::CacheConfig;
use monitor_cache::listener::{BufferConfig, BufferedCacheListener};
use monitor_cache::record::TagValue;
use monitor_cache::status::{DispatchKind, DispatcherState};
use monitor_cache::tag::DataTag;
use monitor_cache::{C2monCache, CacheEvent};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn cache() -> C2monCache<DataTag> {
    C2monCache::new("dataTag", &CacheConfig::default())
}

fn tag(id: i64, value: i64) -> DataTag {
    let mut tag = DataTag::new(id, "level");
    tag.value = Some(TagValue::Int(value));
    tag
}

struct Batches {
    received: Mutex<Vec<Vec<DataTag>>>,
}

impl BufferedCacheListener<DataTag> for Batches {
    fn on_batch(&self, records: Vec<DataTag>) -> anyhow::Result<()> {
        self.received.lock().push(records);
        Ok(())
    }
}

fn wait_for<F: Fn() -> bool>(done: F, limit: Duration) {
    let start = Instant::now();
    while !done() && start.elapsed() < limit {
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn buffered_listener_gets_one_batch_per_interval() {
    let cache = cache();
    let listener = Arc::new(Batches {
        received: Mutex::new(vec![]),
    });
    let buffer = BufferConfig {
        interval: Duration::from_secs(1),
        max_size: 100_000,
    };
    cache.register_buffered_listener(listener.clone(), buffer, &[CacheEvent::UpdateAccepted]);

    for id in 1..=5 {
        cache.put(id, tag(id, id * 10)).unwrap();
        thread::sleep(Duration::from_millis(40));
    }
    assert!(listener.received.lock().is_empty());

    wait_for(|| !listener.received.lock().is_empty(), Duration::from_secs(2));

    let batches = listener.received.lock().clone();
    assert_eq!(batches.len(), 1);
    let ids: Vec<i64> = batches[0].iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);

    cache.close();
}

#[test]
fn listener_copy_is_detached_from_cache() {
    let cache = cache();
    let seen = Arc::new(Mutex::new(vec![]));
    let sink = seen.clone();
    let listener = move |_event: CacheEvent, mut record: DataTag| {
        record.name = "tampered".to_string();
        record.value = Some(TagValue::Int(-1));
        sink.lock().push(record);
        Ok::<(), anyhow::Error>(())
    };
    cache.register_listener(Arc::new(listener), &[CacheEvent::UpdateAccepted]);

    cache.put(1, tag(1, 42)).unwrap();

    assert_eq!(seen.lock().len(), 1);
    let stored = cache.get(1).unwrap();
    assert_eq!(stored.name, "level");
    assert_eq!(stored.value, Some(TagValue::Int(42)));
}

#[test]
fn pooled_listener_receives_every_update() {
    let cache = cache();
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let listener = move |_event: CacheEvent, _record: DataTag| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<(), anyhow::Error>(())
    };
    cache.register_threaded_listener(Arc::new(listener), &[CacheEvent::UpdateAccepted]);

    for id in 0..50 {
        cache.put(id, tag(id, id)).unwrap();
    }

    let status = cache.listeners().status();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].kind, DispatchKind::Pooled);
    assert_eq!(status[0].error_count, 0);

    // close drains the queue before stopping the workers
    cache.close();
    assert_eq!(count.load(Ordering::SeqCst), 50);
    assert!(cache.listeners().is_closed());
    assert!(cache.listeners().is_empty());
}

#[test]
fn failing_listener_does_not_reach_the_writer() {
    let cache = cache();
    let panicking = |_event: CacheEvent, record: DataTag| -> anyhow::Result<()> {
        if record.id == 2 {
            panic!("listener blew up on {}", record.id);
        }
        anyhow::bail!("listener refused {}", record.id)
    };
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = delivered.clone();
    let healthy = move |_event: CacheEvent, _record: DataTag| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<(), anyhow::Error>(())
    };
    let bad_id = cache.register_listener(Arc::new(panicking), &[CacheEvent::UpdateAccepted]);
    cache.register_listener(Arc::new(healthy), &[CacheEvent::UpdateAccepted]);

    assert!(cache.put(1, tag(1, 1)).unwrap());
    assert!(cache.put(2, tag(2, 2)).unwrap());
    assert_eq!(delivered.load(Ordering::SeqCst), 2);

    let status = cache.listeners().status();
    let bad = status.iter().find(|s| s.listener_id == bad_id).unwrap();
    assert_eq!(bad.error_count, 2);
    assert_eq!(bad.state, DispatcherState::Broken);
    assert_eq!(bad.kind, DispatchKind::Direct);
}

#[test]
fn deregistered_listener_is_not_called() {
    let cache = cache();
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let listener = move |_event: CacheEvent, _record: DataTag| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<(), anyhow::Error>(())
    };
    let id = cache.register_listener(Arc::new(listener), &[]);

    cache.put(1, tag(1, 1)).unwrap();
    assert!(cache.deregister_listener(id));
    assert!(!cache.deregister_listener(id));
    cache.put(1, tag(1, 2)).unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 1);
}

fn cache_with_shutdown(shutdown_timeout_ms: u64) -> C2monCache<DataTag> {
    let mut config = CacheConfig::default();
    config.listener.pool_size = 2;
    config.listener.shutdown_timeout_ms = shutdown_timeout_ms;
    C2monCache::new("dataTag", &config)
}

#[test]
fn slow_pooled_listener_does_not_delay_buffered_delivery() {
    let cache = cache_with_shutdown(200);
    let slow = |_event: CacheEvent, _record: DataTag| {
        thread::sleep(Duration::from_secs(2));
        Ok::<(), anyhow::Error>(())
    };
    cache.register_threaded_listener(Arc::new(slow), &[CacheEvent::UpdateAccepted]);

    let listener = Arc::new(Batches {
        received: Mutex::new(vec![]),
    });
    let buffer = BufferConfig {
        interval: Duration::from_millis(100),
        max_size: 100_000,
    };
    cache.register_buffered_listener(listener.clone(), buffer, &[CacheEvent::UpdateAccepted]);

    let start = Instant::now();
    for id in 1..=8 {
        cache.put(id, tag(id, id)).unwrap();
    }

    wait_for(|| !listener.received.lock().is_empty(), Duration::from_secs(3));
    assert!(start.elapsed() < Duration::from_secs(1));
    let delivered: usize = listener.received.lock().iter().map(|b| b.len()).sum();
    assert!(delivered > 0);

    cache.close();
}

#[test]
fn close_returns_when_pooled_listener_hangs() {
    let cache = cache_with_shutdown(200);
    let hung = |_event: CacheEvent, _record: DataTag| {
        thread::sleep(Duration::from_secs(30));
        Ok::<(), anyhow::Error>(())
    };
    cache.register_threaded_listener(Arc::new(hung), &[]);

    for id in 1..=4 {
        cache.put(id, tag(id, id)).unwrap();
    }
    thread::sleep(Duration::from_millis(50));

    let start = Instant::now();
    cache.close();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(cache.listeners().is_closed());
}

struct HungBatches {
    started: AtomicUsize,
}

impl BufferedCacheListener<DataTag> for HungBatches {
    fn on_batch(&self, _records: Vec<DataTag>) -> anyhow::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_secs(30));
        Ok(())
    }
}

#[test]
fn close_returns_when_buffered_listener_hangs() {
    let cache = cache_with_shutdown(200);
    let listener = Arc::new(HungBatches {
        started: AtomicUsize::new(0),
    });
    let buffer = BufferConfig {
        interval: Duration::from_millis(20),
        max_size: 100_000,
    };
    cache.register_buffered_listener(listener.clone(), buffer, &[]);

    cache.put(1, tag(1, 1)).unwrap();
    wait_for(
        || listener.started.load(Ordering::SeqCst) > 0,
        Duration::from_secs(2),
    );
    assert_eq!(listener.started.load(Ordering::SeqCst), 1);

    let start = Instant::now();
    cache.close();
    assert!(start.elapsed() < Duration::from_secs(2));
}
