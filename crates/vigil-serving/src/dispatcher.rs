//! Bounded worker pool for blocking model work.
//!
//! Async callers hand CPU-bound closures to the dispatcher; they run on
//! tokio's blocking threads, at most `pool_size` at a time, admitted in FIFO
//! order by a fair semaphore.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::activity::ActivityState;

/// Errors raised by the dispatcher itself, as opposed to the work it runs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The worker panicked while running the closure.
    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),

    /// The call did not finish within the configured timeout.
    #[error("Work did not complete within {0:?}")]
    Timeout(Duration),

    /// The pool was shut down before the work could be admitted.
    #[error("Worker pool is closed")]
    PoolClosed,
}

/// Runs blocking closures on a fixed-size pool with activity accounting.
#[derive(Debug)]
pub struct WorkDispatcher {
    /// `None` when work runs inline on the calling task.
    permits: Option<Arc<Semaphore>>,
    pool_size: usize,
    timeout: Option<Duration>,
    activity: Arc<ActivityState>,
}

impl WorkDispatcher {
    /// Create a dispatcher with `pool_size` workers. A pool size of zero runs
    /// every call inline on the caller.
    #[must_use]
    pub fn new(pool_size: usize, activity: Arc<ActivityState>) -> Self {
        let permits = (pool_size > 0).then(|| Arc::new(Semaphore::new(pool_size)));
        Self { permits, pool_size, timeout: None, activity }
    }

    /// Bound how long a caller waits for one call.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn pool_size(&self) -> usize {
        self.pool_size
    }

    #[must_use]
    pub const fn is_inline(&self) -> bool {
        self.permits.is_none()
    }

    #[must_use]
    pub fn activity(&self) -> &Arc<ActivityState> {
        &self.activity
    }

    /// Run `work` as one request: counted in-flight from entry until the work
    /// finishes, whichever way it finishes.
    ///
    /// # Errors
    /// Returns `DispatchError` if the worker panics, times out, or the pool
    /// has been closed.
    pub async fn execute<F, T>(&self, work: F) -> Result<T, DispatchError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.activity.begin_request();
        self.run_blocking(move || {
            let _guard = guard;
            work()
        })
        .await
    }

    /// Run `work` on the pool without request accounting. Used by the model
    /// cache, which tracks loads separately.
    pub(crate) async fn run_blocking<F, T>(&self, work: F) -> Result<T, DispatchError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let Some(permits) = &self.permits else {
            return std::panic::catch_unwind(std::panic::AssertUnwindSafe(work))
                .map_err(|payload| DispatchError::WorkerPanicked(panic_message(&*payload)));
        };

        let permit = Arc::clone(permits)
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::PoolClosed)?;
        debug!(available = permits.available_permits(), "Dispatching work to pool");

        // The permit travels with the work so the pool stays bounded even if
        // the caller stops waiting.
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        });

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(timeout = ?limit, "Dispatched work timed out; it keeps running in background");
                    return Err(DispatchError::Timeout(limit));
                }
            },
            None => handle.await,
        };

        joined.map_err(|e| {
            let message = if e.is_panic() {
                panic_message(&*e.into_panic())
            } else {
                e.to_string()
            };
            error!(error = %message, "Worker failed");
            DispatchError::WorkerPanicked(message)
        })
    }

    /// Stop admitting new work. Calls already running finish normally.
    pub fn close(&self) {
        if let Some(permits) = &self.permits {
            permits.close();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
