//! Interval revalidation gated on visibility and connectivity.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{FetchCoordinator, Fetcher};
use crate::cache::CacheKey;

/// Shortest interval `poll` runs at; shorter ones are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A cheap yes/no check evaluated before each poll.
pub type Predicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Polling configuration for one key.
#[derive(Clone)]
pub struct PollOptions {
    pub interval: Duration,
    /// Skip ticks while this returns false (e.g. the feed is off-screen).
    pub is_visible: Option<Predicate>,
    /// Skip ticks while this returns false (e.g. the device is offline).
    pub is_online: Option<Predicate>,
}

impl PollOptions {
    pub fn every(interval: Duration) -> Self {
        Self { interval, is_visible: None, is_online: None }
    }

    pub fn with_visibility(mut self, is_visible: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.is_visible = Some(Arc::new(is_visible));
        self
    }

    pub fn with_connectivity(mut self, is_online: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.is_online = Some(Arc::new(is_online));
        self
    }

    fn should_poll(&self) -> bool {
        self.is_visible.as_ref().is_none_or(|f| f()) && self.is_online.as_ref().is_none_or(|f| f())
    }
}

impl std::fmt::Debug for PollOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollOptions")
            .field("interval", &self.interval)
            .field("is_visible", &self.is_visible.is_some())
            .field("is_online", &self.is_online.is_some())
            .finish()
    }
}

/// Running poll loop; stops when dropped.
#[derive(Debug)]
pub struct PollHandle {
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn stop(self) {}
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl<T> FetchCoordinator<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Revalidate `key` every `options.interval` until the handle is dropped.
    ///
    /// The first revalidation happens one interval after the call. Intervals
    /// below [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn poll(&self, key: &CacheKey, fetcher: Arc<dyn Fetcher<T>>, options: PollOptions) -> PollHandle {
        let coordinator = self.clone();
        let key = key.clone();
        let interval = options.interval.max(MIN_POLL_INTERVAL);
        if interval != options.interval {
            tracing::warn!(key = %key, requested = ?options.interval, ?interval, "poll interval too short; clamping");
        }
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !options.should_poll() {
                    tracing::trace!(key = %key, "poll skipped; not visible or offline");
                    continue;
                }
                if let Err(err) = coordinator.revalidate(&key, Arc::clone(&fetcher)).await {
                    tracing::debug!(key = %key, error = %err, "poll revalidation failed");
                }
            }
        });
        PollHandle { task }
    }
}
