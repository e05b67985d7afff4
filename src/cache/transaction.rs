//! Per-key transactions.
//!
//! Each key has its own lock; there is no cache-wide lock. A thread that
//! already holds the transaction for a key reuses it instead of opening a
//! nested one, so `put` called from inside `execute_transaction` (or from a
//! listener running inline under the writer's lock) never self-deadlocks.
//!
//! A lock wait that times out while the waiting thread holds other key locks
//! is reported as `TransactionDeadlock`; any other timeout is a plain
//! `TransactionTimeout`. Neither is retried here.
use hashbrown::HashMap;
use log::*;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CacheError, Result};
use crate::record::Id;

static NEXT_COORDINATOR: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    // (coordinator uid, key) for every transaction open on this thread
    static OPEN_TRANSACTIONS: RefCell<Vec<(usize, Id)>> = RefCell::new(Vec::new());
}

// pops the open-transaction marker on exit, including unwinding
struct OpenTransaction;

impl OpenTransaction {
    fn enter(uid: usize, key: Id) -> OpenTransaction {
        OPEN_TRANSACTIONS.with(|open| open.borrow_mut().push((uid, key)));
        OpenTransaction
    }
}

impl Drop for OpenTransaction {
    fn drop(&mut self) {
        OPEN_TRANSACTIONS.with(|open| {
            open.borrow_mut().pop();
        });
    }
}

#[derive(Debug)]
pub struct TransactionCoordinator {
    uid: usize,
    name: String,
    timeout: Duration,
    locks: Mutex<HashMap<Id, Arc<Mutex<()>>>>,
}

impl TransactionCoordinator {
    pub fn new(name: &str, timeout: Duration) -> TransactionCoordinator {
        TransactionCoordinator {
            uid: NEXT_COORDINATOR.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// true if the calling thread holds the transaction for `key`
    pub fn in_transaction(&self, key: Id) -> bool {
        let uid = self.uid;
        OPEN_TRANSACTIONS.with(|open| open.borrow().iter().any(|t| *t == (uid, key)))
    }

    /// Run `work` holding the transaction for `key`, reusing an open one.
    ///
    /// Blocks up to the configured timeout when another thread holds the key.
    pub fn execute<T, F>(&self, key: Id, work: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        if self.in_transaction(key) {
            trace!("{}: reusing open transaction for key {}", self.name, key);
            return work();
        }

        let lock = self.lock_for(key);
        let _guard = match lock.try_lock_for(self.timeout) {
            Some(guard) => guard,
            None => return Err(self.timeout_error(key)),
        };

        let _open = OpenTransaction::enter(self.uid, key);
        work()
    }

    /// Drop the lock entry for `key` unless a thread holds or waits on it.
    pub fn release(&self, key: Id) -> bool {
        let mut locks = self.locks.lock();
        match locks.get(&key) {
            Some(lock) if Arc::strong_count(lock) == 1 => {
                locks.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// number of keys with a lock entry
    pub fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }

    fn lock_for(&self, key: Id) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn timeout_error(&self, key: Id) -> CacheError {
        let waited_ms = self.timeout.as_millis() as u64;
        let held = OPEN_TRANSACTIONS.with(|open| open.borrow().len());

        if held > 0 {
            error!(
                "{}: timeout due to deadlock on key {} after {}ms ({} other transaction(s) held by this thread)",
                self.name, key, waited_ms, held
            );
            CacheError::TransactionDeadlock {
                cache: self.name.clone(),
                key,
                waited_ms,
            }
        } else {
            warn!(
                "{}: timeout waiting for key {} after {}ms",
                self.name, key, waited_ms
            );
            CacheError::TransactionTimeout {
                cache: self.name.clone(),
                key,
                waited_ms,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn reentrant_on_same_key() {
        let tx = TransactionCoordinator::new("test", Duration::from_millis(100));
        assert!(!tx.in_transaction(1));

        let value = tx
            .execute(1, || {
                assert!(tx.in_transaction(1));
                tx.execute(1, || {
                    assert!(tx.in_transaction(1));
                    Ok(42)
                })
            })
            .expect("nested execute on the same key must not block");

        assert_eq!(value, 42);
        assert!(!tx.in_transaction(1));
    }

    #[test]
    fn error_releases_the_key() {
        let tx = TransactionCoordinator::new("test", Duration::from_millis(100));
        let result: Result<()> = tx.execute(5, || Err(CacheError::not_found("test", 5)));
        assert!(result.unwrap_err().is_not_found());

        assert!(tx.execute(5, || Ok(())).is_ok());
        assert!(!tx.in_transaction(5));
    }

    #[test]
    fn plain_timeout() {
        let tx = Arc::new(TransactionCoordinator::new("test", Duration::from_millis(50)));
        let barrier = Arc::new(Barrier::new(2));

        let holder = {
            let tx = tx.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                tx.execute(1, || {
                    barrier.wait();
                    thread::sleep(Duration::from_millis(300));
                    Ok(())
                })
            })
        };

        barrier.wait();
        let result = tx.execute(1, || Ok(()));
        assert!(matches!(
            result,
            Err(CacheError::TransactionTimeout { key: 1, .. })
        ));

        assert!(holder.join().unwrap().is_ok());
    }

    #[test]
    fn crossed_locks_report_deadlock() {
        let tx = Arc::new(TransactionCoordinator::new("test", Duration::from_millis(200)));
        let barrier = Arc::new(Barrier::new(2));

        let spawn = |first: Id, second: Id| {
            let tx = tx.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                tx.execute(first, || {
                    barrier.wait();
                    tx.execute(second, || Ok(()))
                })
            })
        };

        let a = spawn(1, 2);
        let b = spawn(2, 1);
        let results = vec![a.join().unwrap(), b.join().unwrap()];

        let deadlocks = results
            .iter()
            .filter(|r| matches!(r, Err(CacheError::TransactionDeadlock { .. })))
            .count();
        assert!(deadlocks >= 1);
    }

    #[test]
    fn release_drops_idle_locks_only() {
        let tx = TransactionCoordinator::new("test", Duration::from_millis(50));
        tx.execute(1, || Ok(())).unwrap();
        tx.execute(2, || Ok(())).unwrap();
        assert_eq!(tx.lock_count(), 2);

        let held = tx.execute(1, || Ok(tx.release(1))).unwrap();
        assert!(!held);
        assert_eq!(tx.lock_count(), 2);

        assert!(tx.release(1));
        assert!(!tx.release(1));
        assert_eq!(tx.lock_count(), 1);

        // a released key gets a fresh lock on next use
        tx.execute(1, || Ok(())).unwrap();
        assert_eq!(tx.lock_count(), 2);
    }

    #[test]
    fn separate_keys_do_not_block() {
        let tx = TransactionCoordinator::new("test", Duration::from_millis(50));
        let result = tx.execute(1, || tx.execute(2, || Ok("both")));
        assert_eq!(result.unwrap(), "both");
    }
}
