//! Idle monitor: requests a graceful shutdown after a period of inactivity.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::activity::ActivityState;

/// Whether the monitor will ever fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Checks every `poll` and fires once idle for longer than `ttl`.
    Armed { ttl: Duration, poll: Duration },
    Disabled,
}

impl MonitorState {
    /// Armed only when both the TTL and the poll interval are positive.
    #[must_use]
    pub const fn from_secs(ttl_secs: u64, poll_secs: u64) -> Self {
        if ttl_secs > 0 && poll_secs > 0 {
            Self::Armed {
                ttl: Duration::from_secs(ttl_secs),
                poll: Duration::from_secs(poll_secs),
            }
        } else {
            Self::Disabled
        }
    }
}

/// Watches [`ActivityState`] and cancels `shutdown` once the process has
/// been idle for longer than the TTL.
#[derive(Debug, Clone)]
pub struct IdleMonitor {
    activity: Arc<ActivityState>,
    state: MonitorState,
    shutdown: CancellationToken,
}

impl IdleMonitor {
    #[must_use]
    pub const fn new(activity: Arc<ActivityState>, state: MonitorState, shutdown: CancellationToken) -> Self {
        Self { activity, state, shutdown }
    }

    #[must_use]
    pub const fn state(&self) -> MonitorState {
        self.state
    }

    /// True when a request has been seen, nothing is running or loading, and
    /// the last request started more than the TTL before `now`.
    #[must_use]
    pub fn should_shutdown_at(&self, now: Instant) -> bool {
        let MonitorState::Armed { ttl, .. } = self.state else {
            return false;
        };
        if !self.activity.is_quiescent() {
            return false;
        }
        self.activity.idle_for(now).is_some_and(|idle| idle > ttl)
    }

    /// Start the monitor loop. Returns `None` when disabled.
    #[must_use]
    pub fn spawn(self) -> Option<JoinHandle<()>> {
        match self.state {
            MonitorState::Armed { .. } => Some(tokio::spawn(self.run())),
            MonitorState::Disabled => None,
        }
    }

    /// Run until the process goes idle or `shutdown` is cancelled elsewhere.
    pub async fn run(self) {
        let MonitorState::Armed { ttl, poll } = self.state else {
            return;
        };
        info!(ttl = ?ttl, poll = ?poll, "Idle monitor armed");

        let mut interval = tokio::time::interval_at(Instant::now() + poll, poll);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    debug!("Idle monitor stopped");
                    return;
                }
                _ = interval.tick() => {
                    debug!(
                        in_flight = self.activity.in_flight(),
                        loading = self.activity.loads_in_progress(),
                        "Checking for inactivity"
                    );
                    if self.should_shutdown_at(Instant::now()) {
                        info!("Shutting down due to inactivity");
                        self.shutdown.cancel();
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armed(activity: &Arc<ActivityState>, token: &CancellationToken) -> IdleMonitor {
        IdleMonitor::new(Arc::clone(activity), MonitorState::from_secs(5, 1), token.clone())
    }

    #[test]
    fn test_state_from_secs() {
        assert!(matches!(MonitorState::from_secs(5, 1), MonitorState::Armed { .. }));
        assert_eq!(MonitorState::from_secs(0, 1), MonitorState::Disabled);
        assert_eq!(MonitorState::from_secs(5, 0), MonitorState::Disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_fires_before_first_request() {
        let activity = Arc::new(ActivityState::new());
        let monitor = armed(&activity, &CancellationToken::new());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!monitor.should_shutdown_at(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_shortly_after_ttl() {
        let activity = Arc::new(ActivityState::new());
        let token = CancellationToken::new();
        drop(activity.begin_request());
        let start = Instant::now();

        let handle = armed(&activity, &token).spawn().unwrap();
        token.cancelled().await;
        handle.await.unwrap();

        let elapsed = start.elapsed();
        assert!(elapsed > Duration::from_secs(5), "fired early: {elapsed:?}");
        assert!(elapsed <= Duration::from_secs(7), "fired late: {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_request_blocks_shutdown() {
        let activity = Arc::new(ActivityState::new());
        let token = CancellationToken::new();
        let guard = activity.begin_request();

        let handle = armed(&activity, &token).spawn().unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!token.is_cancelled());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(2), token.cancelled()).await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_in_progress_blocks_shutdown() {
        let activity = Arc::new(ActivityState::new());
        let token = CancellationToken::new();
        drop(activity.begin_request());
        let load = activity.begin_load();

        let _handle = armed(&activity, &token).spawn().unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!token.is_cancelled());

        drop(load);
        tokio::time::timeout(Duration::from_secs(2), token.cancelled()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_request_resets_idle_clock() {
        let activity = Arc::new(ActivityState::new());
        let token = CancellationToken::new();
        drop(activity.begin_request());

        let _handle = armed(&activity, &token).spawn().unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        drop(activity.begin_request());
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!token.is_cancelled());

        tokio::time::timeout(Duration::from_secs(3), token.cancelled()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancel_stops_monitor() {
        let activity = Arc::new(ActivityState::new());
        let token = CancellationToken::new();

        let handle = armed(&activity, &token).spawn().unwrap();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[test]
    fn test_disabled_monitor_does_not_spawn() {
        let activity = Arc::new(ActivityState::new());
        let monitor = IdleMonitor::new(activity, MonitorState::Disabled, CancellationToken::new());
        assert!(monitor.spawn().is_none());
    }
}
