//! Sliding-window per-client rate limiter.
//!
//! Each key owns an ordered queue of admission instants. A call to
//! [`SlidingWindowLimiter::admit`] evicts instants older than `now - window`,
//! admits iff fewer than `capacity` remain, and records `now` on admission.
//! At most `capacity` admissions for one key fall inside any rolling window.
//!
//! One mutex guards the whole table; it is held only for evict + decide +
//! append. Keys whose queues drain are removed during a periodic sweep.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Number of admissions between sweeps of empty entries.
const SWEEP_EVERY: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// Denied; the oldest in-window request expires after `retry_after`.
    Denied { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

struct Table {
    entries: HashMap<String, VecDeque<Instant>>,
    calls: u64,
}

pub struct SlidingWindowLimiter {
    capacity: usize,
    window: Duration,
    table: Mutex<Table>,
}

impl SlidingWindowLimiter {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity,
            window,
            table: Mutex::new(Table {
                entries: HashMap::new(),
                calls: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decides whether the request identified by `key` at `now` is admitted.
    pub fn admit(&self, key: &str, now: Instant) -> Decision {
        if self.capacity == 0 {
            return Decision::Denied {
                retry_after: self.window,
            };
        }

        let mut table = self.table.lock();
        table.calls += 1;
        if table.calls % SWEEP_EVERY == 0 {
            Self::sweep_locked(&mut table.entries, self.window, now);
        }

        let queue = table.entries.entry(key.to_string()).or_default();
        evict(queue, self.window, now);

        if queue.len() < self.capacity {
            queue.push_back(now);
            Decision::Allowed
        } else {
            // queue is non-empty here because capacity > 0
            let oldest = queue.front().copied().unwrap_or(now);
            let expires = oldest + self.window;
            Decision::Denied {
                retry_after: expires.saturating_duration_since(now),
            }
        }
    }

    /// Drops keys with no in-window requests. Returns the number removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut table = self.table.lock();
        Self::sweep_locked(&mut table.entries, self.window, now)
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.table.lock().entries.len()
    }

    fn sweep_locked(
        entries: &mut HashMap<String, VecDeque<Instant>>,
        window: Duration,
        now: Instant,
    ) -> usize {
        let before = entries.len();
        entries.retain(|_, queue| {
            evict(queue, window, now);
            !queue.is_empty()
        });
        before - entries.len()
    }
}

/// Removes instants older than `now - window` from the front of the queue.
fn evict(queue: &mut VecDeque<Instant>, window: Duration, now: Instant) {
    while let Some(front) = queue.front() {
        if now.saturating_duration_since(*front) > window {
            queue.pop_front();
        } else {
            break;
        }
    }
}
