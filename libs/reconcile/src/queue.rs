//! Deduplicating work queue.
//!
//! Semantics:
//! - `add` of a key that is already pending is a no-op
//! - a key being processed is never handed to a second worker; re-adding it
//!   marks it dirty and it is queued again once `done` is called
//! - after `shut_down`, `get` keeps returning pending keys until the queue is
//!   drained, then returns `None`

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::ControllerRateLimiter;

#[derive(Default)]
struct State {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    shutting_down: bool,
}

struct Inner {
    name: String,
    state: Mutex<State>,
    notify: Notify,
    limiter: ControllerRateLimiter,
}

/// Rate-limited, deduplicating queue of object keys.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    /// Create a queue with the default controller rate limiter.
    pub fn new(name: &str) -> Self {
        Self::with_rate_limiter(name, ControllerRateLimiter::default())
    }

    pub fn with_rate_limiter(name: &str, limiter: ControllerRateLimiter) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                limiter,
            }),
        }
    }

    /// Queue name, used in logs.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Mark `key` as needing processing. Never blocks.
    pub fn add(&self, key: &str) {
        self.inner.add(key);
    }

    /// Add `key` once `delay` has elapsed.
    pub fn add_after(&self, key: &str, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        if self.is_shutting_down() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.add(&key);
        });
    }

    /// Add `key` after the delay chosen by the rate limiter.
    pub fn add_rate_limited(&self, key: &str) {
        let delay = self.inner.limiter.when(key);
        debug!(queue = %self.inner.name, key, delay_ms = delay.as_millis() as u64, "Requeueing");
        self.add_after(key, delay);
    }

    /// Reset the rate limiter's memory of `key`.
    pub fn forget(&self, key: &str) {
        self.inner.limiter.forget(key);
    }

    /// Times `key` went through `add_rate_limited` since it was last forgotten.
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.inner.limiter.num_requeues(key)
    }

    /// Wait for the next key. Returns `None` once shut down and drained.
    ///
    /// Every key returned must be handed back with [`WorkQueue::done`].
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Finish processing `key`. Requeues it if it was re-added meanwhile.
    pub fn done(&self, key: &str) {
        let mut state = self.inner.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.to_string());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Stop accepting keys and wake all waiting workers.
    pub fn shut_down(&self) {
        self.inner.lock().shutting_down = true;
        debug!(queue = %self.inner.name, "Work queue shutting down");
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().shutting_down
    }

    /// Number of pending keys.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    fn add(&self, key: &str) {
        let mut state = self.lock();
        if state.shutting_down {
            return;
        }
        if !state.dirty.insert(key.to_string()) {
            trace!(queue = %self.name, key, "Key already pending");
            return;
        }
        if state.processing.contains(key) {
            return;
        }
        state.queue.push_back(key.to_string());
        drop(state);
        self.notify.notify_one();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
