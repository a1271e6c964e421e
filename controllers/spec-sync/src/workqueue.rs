//! Deduplicating work queue.
//!
//! Keys, not events, are queued: any number of notifications for the same
//! policy collapse into one pending reconcile. A key handed out by [`WorkQueue::next`]
//! is "processing" until [`WorkQueue::done`] is called; adding it in the
//! meantime marks it dirty and it is queued again on `done`, so a key is never
//! reconciled by two workers at once.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

#[derive(Debug)]
struct State<K> {
    queue: VecDeque<K>,
    /// Keys waiting to be processed (queued, or re-added while processing)
    dirty: HashSet<K>,
    /// Keys currently held by a worker
    processing: HashSet<K>,
    shutting_down: bool,
}

/// Work queue shared by watchers (producers) and reconcile workers (consumers)
#[derive(Debug)]
pub struct WorkQueue<K> {
    state: Mutex<State<K>>,
    notify: Notify,
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + std::fmt::Debug + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + std::fmt::Debug + 'static,
{
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<K>> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("work queue lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Queue a key. No-op if it is already pending or the queue is shut down.
    pub fn add(&self, key: K) {
        let mut state = self.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            // Re-queued by done()
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Queue a key after `delay` without blocking the caller
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!("Requeueing {:?} after {:?}", key, delay);
            queue.add(key);
        });
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn next(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a concurrent add() or
            // shut_down() cannot slip in unnoticed.
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Mark a key returned by [`next`](Self::next) as finished
    pub fn done(&self, key: &K) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys and reject new ones. Workers blocked in
    /// [`next`](Self::next) return `None`; keys already being processed are
    /// left to finish.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
