//! Per-key debounce timers
//!
//! One tokio task per pending key. Re-arming a key aborts its task and spawns a replacement,
//! so each key has at most one live timer and keys never wait on each other.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

struct Pending {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Table<K> {
    next_generation: u64,
    pending: HashMap<K, Pending>,
}

/// Scheduled-task table keyed by `K`
pub struct Debouncer<K> {
    window: Duration,
    table: Arc<Mutex<Table<K>>>,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            table: Arc::new(Mutex::new(Table { next_generation: 0, pending: HashMap::new() })),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Arm or re-arm the timer for `key`; `fire` runs once the window passes without another
    /// call for the same key. A re-arm replaces the previous `fire`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, key: K, fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.next_generation += 1;
        let generation = table.next_generation;

        let window = self.window;
        let shared = Arc::clone(&self.table);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            {
                let mut table = shared.lock().unwrap_or_else(PoisonError::into_inner);
                // A newer timer for the key owns the emission
                match table.pending.get(&task_key) {
                    Some(current) if current.generation == generation => {
                        table.pending.remove(&task_key);
                    }
                    _ => return,
                }
            }
            fire();
        });

        if let Some(previous) = table.pending.insert(key, Pending { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Drop the pending timer for `key`; returns whether one existed
    pub fn cancel(&self, key: &K) -> bool {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        match table.pending.remove(key) {
            Some(pending) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, pending) in table.pending.drain() {
            pending.handle.abort();
        }
    }

    /// Number of keys with an armed timer
    pub fn pending(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).pending.len()
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, pending) in table.pending.drain() {
            pending.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    fn recorder() -> (mpsc::UnboundedSender<(&'static str, u32)>, mpsc::UnboundedReceiver<(&'static str, u32)>) {
        mpsc::unbounded_channel()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<(&'static str, u32)>) -> Vec<(&'static str, u32)> {
        let mut seen = Vec::new();
        while let Ok(item) = rx.try_recv() {
            seen.push(item);
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_latest() {
        let debouncer = Debouncer::new(Duration::from_millis(300));
        let (tx, mut rx) = recorder();

        for i in 0..5 {
            let tx = tx.clone();
            debouncer.schedule("p", move || {
                let _ = tx.send(("p", i));
            });
            sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(debouncer.pending(), 1);
        assert!(drain(&mut rx).is_empty());

        sleep(Duration::from_millis(400)).await;
        assert_eq!(drain(&mut rx), vec![("p", 4)]);
        assert_eq!(debouncer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let debouncer = Debouncer::new(Duration::from_millis(300));
        let (tx, mut rx) = recorder();

        let q = tx.clone();
        debouncer.schedule("q", move || {
            let _ = q.send(("q", 0));
        });
        for i in 0..5 {
            let p = tx.clone();
            debouncer.schedule("p", move || {
                let _ = p.send(("p", i));
            });
            sleep(Duration::from_millis(80)).await;
        }

        // q fired at 300ms while p was still being re-armed
        assert_eq!(drain(&mut rx), vec![("q", 0)]);

        sleep(Duration::from_millis(300)).await;
        assert_eq!(drain(&mut rx), vec![("p", 4)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_stops_pending_timers() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let (tx, mut rx) = recorder();

        for key in ["a", "b"] {
            let tx = tx.clone();
            debouncer.schedule(key, move || {
                let _ = tx.send((key, 0));
            });
        }
        assert!(debouncer.cancel(&"a"));
        assert!(!debouncer.cancel(&"a"));
        debouncer.cancel_all();

        sleep(Duration::from_millis(500)).await;
        assert!(drain(&mut rx).is_empty());
    }
}
