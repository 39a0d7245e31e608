use crate::queue::key::TypedKey;
use crate::queue::rate_limiter::{default_controller_rate_limiter, RateLimiter};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};

/// Period a freshly added key waits so bursts of notifications collapse into
/// one delivery.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_millis(50);

#[derive(Default)]
struct QueueState {
    ready: VecDeque<TypedKey>,
    // Keys that need processing: either sitting in `ready` or re-added while in flight.
    dirty: HashSet<TypedKey>,
    processing: HashSet<TypedKey>,
    waiting: HashMap<TypedKey, Instant>,
    // Min-heap over `waiting`; entries superseded by an earlier deadline are skipped on pop.
    schedule: BinaryHeap<Reverse<(Instant, TypedKey)>>,
    shutting_down: bool,
}

impl QueueState {
    fn insert_ready(&mut self, key: TypedKey) -> bool {
        if self.dirty.contains(&key) {
            return false;
        }
        self.dirty.insert(key.clone());
        if self.processing.contains(&key) {
            return false;
        }
        self.ready.push_back(key);
        true
    }

    fn promote_due(&mut self, now: Instant) {
        while let Some(Reverse((ready_at, _))) = self.schedule.peek() {
            if *ready_at > now {
                break;
            }
            let Some(Reverse((ready_at, key))) = self.schedule.pop() else {
                break;
            };
            if self.waiting.get(&key) == Some(&ready_at) {
                self.waiting.remove(&key);
                self.insert_ready(key);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.schedule
            .peek()
            .map(|Reverse((ready_at, _))| *ready_at)
    }
}

/// Deduplicating, rate-limited queue shared by all controllers.
///
/// A key is handed to at most one worker at a time. Adding a key that is in
/// flight marks it dirty, and it is delivered exactly once more after
/// [`WorkQueue::done`]. Producers never block.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    rate_limiter: Box<dyn RateLimiter>,
    dedup_window: Duration,
}

impl WorkQueue {
    pub fn new(rate_limiter: Box<dyn RateLimiter>) -> Self {
        Self::with_dedup_window(rate_limiter, DEFAULT_DEDUP_WINDOW)
    }

    pub fn with_dedup_window(rate_limiter: Box<dyn RateLimiter>, dedup_window: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            rate_limiter,
            dedup_window,
        }
    }

    pub fn dedup_window(&self) -> Duration {
        self.dedup_window
    }

    /// Schedules the key once the dedup window has elapsed.
    pub fn add(&self, key: TypedKey) {
        self.add_after(key, self.dedup_window);
    }

    /// Schedules the key after `delay`. If the key is already waiting, the
    /// earlier deadline wins, and a zero delay moves it straight to ready.
    pub fn add_after(&self, key: TypedKey, delay: Duration) {
        let mut state = self.lock_state();
        if state.shutting_down {
            return;
        }

        if delay.is_zero() {
            // Supersedes any pending deadline; its heap entry no longer matches and is skipped.
            state.waiting.remove(&key);
            let queued = state.insert_ready(key);
            drop(state);
            if queued {
                self.notify.notify_waiters();
            }
            return;
        }

        let ready_at = Instant::now() + delay;
        if matches!(state.waiting.get(&key), Some(existing) if *existing <= ready_at) {
            return;
        }
        state.waiting.insert(key.clone(), ready_at);
        state.schedule.push(Reverse((ready_at, key)));
        drop(state);

        // Sleeping getters must re-arm their timers against the new deadline.
        self.notify.notify_waiters();
    }

    /// Re-queues the key after the delay chosen by the rate limiter.
    pub fn add_rate_limited(&self, key: TypedKey) {
        let delay = self.rate_limiter.when(&key);
        self.add_after(key, delay);
    }

    pub fn forget(&self, key: &TypedKey) {
        self.rate_limiter.forget(key);
    }

    pub fn num_requeues(&self, key: &TypedKey) -> usize {
        self.rate_limiter.num_requeues(key)
    }

    /// Waits for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<TypedKey> {
        loop {
            let notified = self.notify.notified();
            let deadline = {
                let mut state = self.lock_state();
                if state.shutting_down {
                    return None;
                }
                state.promote_due(Instant::now());
                if let Some(key) = state.ready.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more_ready = !state.ready.is_empty();
                    drop(state);
                    if more_ready {
                        self.notify.notify_waiters();
                    }
                    return Some(key);
                }
                state.next_deadline()
            };

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Marks processing of the key as finished, re-queueing it if it was
    /// added again meanwhile.
    pub fn done(&self, key: &TypedKey) {
        let mut state = self.lock_state();
        state.processing.remove(key);
        if state.shutting_down || !state.dirty.contains(key) {
            return;
        }
        state.ready.push_back(key.clone());
        drop(state);
        self.notify.notify_waiters();
    }

    /// Wakes every waiting [`WorkQueue::get`]; later adds are dropped.
    pub fn shut_down(&self) {
        self.lock_state().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock_state().shutting_down
    }

    /// Number of keys ready for delivery right now.
    pub fn len(&self) -> usize {
        self.lock_state().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys scheduled for a future delivery.
    pub fn waiting_len(&self) -> usize {
        self.lock_state().waiting.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(Box::new(default_controller_rate_limiter()))
    }
}
