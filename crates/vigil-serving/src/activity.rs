//! Process-wide activity accounting used for idle detection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

/// Counts in-flight requests and model loads, and remembers when the most
/// recent request started.
///
/// Shared by `Arc` between the dispatcher, the model cache and the idle
/// monitor. Counters only move through the RAII guards returned by
/// [`ActivityState::begin_request`] and [`ActivityState::begin_load`], so every
/// increment is paired with exactly one decrement.
#[derive(Debug, Default)]
pub struct ActivityState {
    in_flight: AtomicUsize,
    loading: AtomicUsize,
    last_called: Mutex<Option<Instant>>,
}

impl ActivityState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the start of a request: increments the in-flight count and
    /// stamps the last-called time. The count drops when the guard is dropped.
    #[must_use = "the request is only counted while the guard is alive"]
    pub fn begin_request(self: &Arc<Self>) -> ActivityGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.stamp(Instant::now());
        ActivityGuard { state: Arc::clone(self), counter: Counter::Request }
    }

    /// Marks a model load in progress until the guard is dropped.
    #[must_use = "the load is only counted while the guard is alive"]
    pub fn begin_load(self: &Arc<Self>) -> ActivityGuard {
        self.loading.fetch_add(1, Ordering::SeqCst);
        ActivityGuard { state: Arc::clone(self), counter: Counter::Load }
    }

    /// Number of requests currently executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Number of model loads currently executing.
    pub fn loads_in_progress(&self) -> usize {
        self.loading.load(Ordering::SeqCst)
    }

    /// Start time of the most recent request, if any request has been seen.
    pub fn last_called(&self) -> Option<Instant> {
        *self.last_called.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Time elapsed between the last request start and `now`.
    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        self.last_called().map(|last| now.saturating_duration_since(last))
    }

    /// True when nothing is running and nothing is loading.
    pub fn is_quiescent(&self) -> bool {
        self.in_flight() == 0 && self.loads_in_progress() == 0
    }

    fn stamp(&self, at: Instant) {
        let mut last = self.last_called.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        // Concurrent starts may stamp out of order; keep the latest.
        if last.is_none_or(|prev| prev < at) {
            *last = Some(at);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Counter {
    Request,
    Load,
}

/// Decrements its counter on drop, on every exit path. Owned, so it can move
/// into a worker closure together with the work it accounts for.
#[derive(Debug)]
pub struct ActivityGuard {
    state: Arc<ActivityState>,
    counter: Counter,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        let counter = match self.counter {
            Counter::Request => &self.state.in_flight,
            Counter::Load => &self.state.loading,
        };
        // Saturating: a counter must never wrap below zero.
        let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}
