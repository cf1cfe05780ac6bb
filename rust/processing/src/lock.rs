// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Concurrent resolution lock
//!
//! Per-key mutual exclusion for check-then-create of shared records. Callers
//! with the same key run one at a time; different keys never wait on each
//! other. Slots are reference counted and dropped with their last user.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::error::{Error, Result};

pub struct ResolutionLock {
    slots: Mutex<FxHashMap<String, Arc<Mutex<()>>>>,
    timeout: Duration,
}

/// A reference to one key's mutex. Removes the slot from the registry when
/// the last reference goes away.
struct SlotRef<'a> {
    lock: &'a ResolutionLock,
    key: &'a str,
    mutex: Arc<Mutex<()>>,
}

impl Drop for SlotRef<'_> {
    fn drop(&mut self) {
        let mut slots = self.lock.slots.lock();
        // registry + this reference
        if Arc::strong_count(&self.mutex) == 2 {
            slots.remove(self.key);
        }
    }
}

impl ResolutionLock {
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(FxHashMap::default()),
            timeout,
        }
    }

    /// Run `body` while holding the lock for `key`.
    ///
    /// Waits at most the configured timeout. The lock is released on every
    /// exit path of `body`, including errors and panics.
    pub fn with_lock<T>(&self, key: &str, body: impl FnOnce() -> Result<T>) -> Result<T> {
        let slot = self.slot(key);
        let Some(_guard) = slot.mutex.try_lock_for(self.timeout) else {
            warn!(key = %key, timeout_ms = self.timeout.as_millis(), "Resolution lock timed out");
            return Err(Error::LockTimeout {
                key: key.to_string(),
                timeout_ms: self.timeout.as_millis(),
            });
        };
        body()
    }

    fn slot<'a>(&'a self, key: &'a str) -> SlotRef<'a> {
        let mutex = Arc::clone(self.slots.lock().entry(key.to_string()).or_default());
        SlotRef {
            lock: self,
            key,
            mutex,
        }
    }

    /// Number of keys currently held or waited on.
    pub fn active_keys(&self) -> usize {
        self.slots.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn test_same_key_is_exclusive() {
        let lock = ResolutionLock::new(Duration::from_secs(5));
        let inside = AtomicUsize::new(0);
        let max_inside = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    lock.with_lock("tree.3ds", || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(2));
                        inside.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .unwrap();
                });
            }
        });
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(lock.active_keys(), 0);
    }

    #[test]
    fn test_different_keys_run_in_parallel() {
        let lock = ResolutionLock::new(Duration::from_secs(5));
        let barrier = Barrier::new(2);
        std::thread::scope(|s| {
            for key in ["a", "b"] {
                let lock = &lock;
                let barrier = &barrier;
                // Both bodies must be inside at the same time to pass the barrier
                s.spawn(move || lock.with_lock(key, || Ok(barrier.wait())).unwrap());
            }
        });
    }

    #[test]
    fn test_timeout_and_release_on_error() {
        let lock = ResolutionLock::new(Duration::from_millis(20));
        let failed: Result<()> = lock.with_lock("k", || Err(Error::storage("boom")));
        assert!(failed.is_err());
        // released after the error
        assert!(lock.with_lock("k", || Ok(1)).is_ok());

        std::thread::scope(|s| {
            let (tx, rx) = crossbeam_channel::bounded::<()>(0);
            let lock = &lock;
            s.spawn(move || {
                lock.with_lock("k", || {
                    tx.send(()).unwrap();
                    std::thread::sleep(Duration::from_millis(200));
                    Ok(())
                })
                .unwrap();
            });
            rx.recv().unwrap();
            assert!(matches!(
                lock.with_lock("k", || Ok(())),
                Err(Error::LockTimeout { .. })
            ));
        });
    }
}
