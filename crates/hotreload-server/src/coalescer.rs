//! Per-key debounce.
//!
//! File-system sources report bursts of events for one save. A
//! [`ChangeCoalescer`] collapses each burst into a single action per key: every
//! call restarts the key's timer and replaces its action, so only the last
//! call of a burst runs.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::metrics::FILE_CHANGES_COALESCED_TOTAL;

struct Pending {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Debounces actions per key.
///
/// Must be used from within a Tokio runtime.
pub struct ChangeCoalescer<K> {
    delay: Duration,
    pending: Arc<Mutex<HashMap<K, Pending>>>,
    generation: AtomicU64,
}

impl<K> ChangeCoalescer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    /// Coalescer firing `delay` after the last call for a key.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Debounce window.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `action` for `key`, replacing any pending action for it.
    pub fn debounce<F, Fut>(&self, key: K, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let deadline = tokio::time::Instant::now() + self.delay;
        let pending = Arc::clone(&self.pending);
        let task_key = key.clone();

        let mut map = self.pending.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let current = {
                let mut map = pending.lock();
                match map.get(&task_key) {
                    Some(p) if p.generation == generation => {
                        let _ = map.remove(&task_key);
                        true
                    }
                    _ => false,
                }
            };
            if current {
                action().await;
            }
        });
        // The lock is held across spawn so the new task cannot observe the
        // map before its own entry is in place.
        if let Some(previous) = map.insert(key, Pending { generation, handle }) {
            previous.handle.abort();
            counter!(FILE_CHANGES_COALESCED_TOTAL).increment(1);
        }
    }

    /// Drop the pending action for `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        match self.pending.lock().remove(key) {
            Some(p) => {
                p.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Drop every pending action.
    pub fn cancel_all(&self) {
        for (_, p) in self.pending.lock().drain() {
            p.handle.abort();
        }
    }

    /// Keys with a pending action.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl<K> Drop for ChangeCoalescer<K> {
    fn drop(&mut self) {
        for (_, p) in self.pending.lock().drain() {
            p.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn recorder() -> (Arc<Mutex<Vec<(String, usize)>>>, Arc<AtomicUsize>) {
        (Arc::new(Mutex::new(Vec::new())), Arc::new(AtomicUsize::new(0)))
    }

    #[tokio::test(start_paused = true)]
    async fn burst_on_one_key_fires_once_with_last_action() {
        let coalescer = ChangeCoalescer::new(Duration::from_millis(500));
        let (fired, count) = recorder();

        for i in 0..50 {
            let fired = fired.clone();
            let count = count.clone();
            coalescer.debounce("a.swift".to_string(), move || async move {
                let _ = count.fetch_add(1, Ordering::SeqCst);
                fired.lock().push(("a.swift".into(), i));
            });
            tokio::time::advance(Duration::from_millis(5)).await;
        }
        assert_eq!(coalescer.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(fired.lock().as_slice(), &[("a.swift".to_string(), 49)]);
        assert_eq!(coalescer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_fire_independently() {
        let coalescer = ChangeCoalescer::new(Duration::from_millis(500));
        let (fired, _) = recorder();

        for (key, delay_ms) in [("a", 0), ("b", 250), ("a", 100)] {
            tokio::time::advance(Duration::from_millis(delay_ms)).await;
            let fired = fired.clone();
            coalescer.debounce(key.to_string(), move || async move {
                fired.lock().push((key.to_string(), 0));
            });
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut keys: Vec<String> = fired.lock().iter().map(|(k, _)| k.clone()).collect();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn calls_outside_window_fire_separately() {
        let coalescer = ChangeCoalescer::new(Duration::from_millis(100));
        let (_, count) = recorder();

        for _ in 0..2 {
            let count = count.clone();
            coalescer.debounce(1u32, move || async move {
                let _ = count.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_action() {
        let coalescer = ChangeCoalescer::new(Duration::from_millis(100));
        let (_, count) = recorder();
        let c = count.clone();
        coalescer.debounce("k", move || async move {
            let _ = c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(coalescer.cancel(&"k"));
        assert!(!coalescer.cancel(&"k"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_clears_every_key() {
        let coalescer = ChangeCoalescer::new(Duration::from_millis(100));
        let (_, count) = recorder();
        for key in ["x", "y", "z"] {
            let c = count.clone();
            coalescer.debounce(key, move || async move {
                let _ = c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(coalescer.pending_count(), 3);
        coalescer.cancel_all();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
