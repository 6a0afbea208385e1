//! Subscriber view over one (optional) key.
//!
//! A `Query` is what a feed or detail view holds: it subscribes to its key,
//! loads through the coordinator, optionally polls, and can switch keys while
//! still showing the previous key's data.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::poll::{PollHandle, PollOptions, Predicate};
use super::{FetchCoordinator, Fetcher};
use crate::cache::{CacheKey, Subscription};
use crate::FetchError;

/// Behavior of a [`Query`].
#[derive(Clone, Default)]
pub struct QueryOptions {
    /// While a newly selected key has no data, keep showing the data of the
    /// key selected before it.
    pub keep_previous_data: bool,
    /// Poll the key at this interval.
    pub refresh_interval: Option<Duration>,
    pub is_visible: Option<Predicate>,
    /// Loads and polls are skipped while this returns false.
    pub is_online: Option<Predicate>,
}

impl QueryOptions {
    fn online(&self) -> bool {
        self.is_online.as_ref().is_none_or(|f| f())
    }
}

/// What a view renders.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub error: Option<FetchError>,
    pub is_validating: bool,
    /// `data` belongs to the previously selected key.
    pub is_previous_data: bool,
}

impl<T> QueryState<T> {
    fn empty() -> Self {
        Self { data: None, error: None, is_validating: false, is_previous_data: false }
    }

    /// First load in progress with nothing to show yet.
    pub fn is_fetching(&self) -> bool {
        self.data.is_none() && self.is_validating
    }
}

/// A subscribed, optionally polling view over a cache key.
///
/// A `None` key is a conditional query: nothing is fetched until a key is set.
pub struct Query<T> {
    coordinator: FetchCoordinator<T>,
    fetcher: Arc<dyn Fetcher<T>>,
    options: QueryOptions,
    key: Option<CacheKey>,
    previous: Option<T>,
    version: watch::Sender<u64>,
    subscription: Option<Subscription>,
    poll: Option<PollHandle>,
}

impl<T> Query<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(
        coordinator: FetchCoordinator<T>, key: Option<CacheKey>, fetcher: Arc<dyn Fetcher<T>>, options: QueryOptions,
    ) -> Self {
        let (version, _) = watch::channel(0);
        let mut query =
            Self { coordinator, fetcher, options, key: None, previous: None, version, subscription: None, poll: None };
        query.attach(key);
        query
    }

    /// Build the query and load it once.
    pub async fn mount(
        coordinator: FetchCoordinator<T>, key: Option<CacheKey>, fetcher: Arc<dyn Fetcher<T>>, options: QueryOptions,
    ) -> Self {
        let query = Self::new(coordinator, key, fetcher, options);
        query.load().await;
        query
    }

    pub fn key(&self) -> Option<&CacheKey> {
        self.key.as_ref()
    }

    /// Receiver bumped on every change to the underlying entry.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Load the current key, joining any in-flight fetch.
    pub async fn load(&self) -> QueryState<T> {
        if let Some(key) = &self.key
            && self.options.online()
        {
            let _ = self.coordinator.fetch(key, Arc::clone(&self.fetcher)).await;
        }
        self.snapshot()
    }

    /// Force a refetch of the current key.
    pub async fn revalidate(&self) -> QueryState<T> {
        if let Some(key) = &self.key
            && self.options.online()
        {
            let _ = self.coordinator.revalidate(key, Arc::clone(&self.fetcher)).await;
        }
        self.snapshot()
    }

    pub fn snapshot(&self) -> QueryState<T> {
        let Some(key) = &self.key else {
            return QueryState::empty();
        };

        let entry = self.coordinator.cache().get(key);
        let (data, error, is_validating) = match entry {
            Some(entry) => (entry.data, entry.error, entry.is_validating),
            None => (None, None, false),
        };

        match data {
            Some(data) => QueryState { data: Some(data), error, is_validating, is_previous_data: false },
            None if self.options.keep_previous_data && self.previous.is_some() => {
                QueryState { data: self.previous.clone(), error, is_validating, is_previous_data: true }
            }
            None => QueryState { data: None, error, is_validating, is_previous_data: false },
        }
    }

    /// Point the query at another key. Call `load` afterwards to fetch it.
    pub fn set_key(&mut self, key: Option<CacheKey>) {
        if self.key == key {
            return;
        }
        if let Some(data) = self.snapshot().data {
            self.previous = Some(data);
        }
        self.attach(key);
        self.version.send_modify(|v| *v += 1);
    }

    fn attach(&mut self, key: Option<CacheKey>) {
        self.subscription = None;
        self.poll = None;

        if let Some(key) = &key {
            let version = self.version.clone();
            self.subscription = Some(self.coordinator.cache().subscribe(key, move |_| {
                version.send_modify(|v| *v += 1);
            }));

            if let Some(interval) = self.options.refresh_interval {
                let options = PollOptions {
                    interval,
                    is_visible: self.options.is_visible.clone(),
                    is_online: self.options.is_online.clone(),
                };
                self.poll = Some(self.coordinator.poll(key, Arc::clone(&self.fetcher), options));
            }
        }
        self.key = key;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResourceCache;
    use crate::fetch::fetcher_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn world_key(id: &str) -> CacheKey {
        CacheKey::new("world_posts").with_param("world_id", id)
    }

    fn echo_fetcher(calls: Arc<AtomicUsize>) -> Arc<dyn Fetcher<String>> {
        Arc::new(fetcher_fn(move |key: CacheKey| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(format!("posts of {}", key.param_str("world_id").unwrap_or_default()))
            }
        }))
    }

    #[tokio::test]
    async fn test_conditional_key_never_fetches() {
        let coordinator = FetchCoordinator::new(ResourceCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let query = Query::mount(coordinator, None, echo_fetcher(Arc::clone(&calls)), QueryOptions::default()).await;

        assert_eq!(query.snapshot(), QueryState::empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mount_loads_and_subscribes() {
        let cache = ResourceCache::new();
        let coordinator = FetchCoordinator::new(cache.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let query =
            Query::mount(coordinator, Some(world_key("w1")), echo_fetcher(calls), QueryOptions::default()).await;

        assert_eq!(query.snapshot().data.as_deref(), Some("posts of w1"));
        assert_eq!(cache.subscriber_count(&world_key("w1")), 1);

        let changes = query.changes();
        cache.set(&world_key("w1"), "edited".to_string());
        assert!(changes.has_changed().unwrap());
        assert_eq!(query.snapshot().data.as_deref(), Some("edited"));

        drop(query);
        assert_eq!(cache.subscriber_count(&world_key("w1")), 0);
    }

    #[tokio::test]
    async fn test_keep_previous_data_across_key_switch() {
        let coordinator = FetchCoordinator::new(ResourceCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let options = QueryOptions { keep_previous_data: true, ..Default::default() };
        let mut query = Query::mount(coordinator, Some(world_key("w1")), echo_fetcher(calls), options).await;

        query.set_key(Some(world_key("w2")));
        let state = query.snapshot();
        assert_eq!(state.data.as_deref(), Some("posts of w1"));
        assert!(state.is_previous_data);
        assert!(!state.is_validating);
        assert!(!state.is_fetching());

        let state = query.load().await;
        assert_eq!(state.data.as_deref(), Some("posts of w2"));
        assert!(!state.is_previous_data);
    }

    #[tokio::test]
    async fn test_key_switch_without_keep_previous_data() {
        let coordinator = FetchCoordinator::new(ResourceCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut query =
            Query::mount(coordinator, Some(world_key("w1")), echo_fetcher(calls), QueryOptions::default()).await;

        query.set_key(Some(world_key("w2")));
        assert!(query.snapshot().data.is_none());
    }

    #[tokio::test]
    async fn test_offline_skips_loading() {
        let coordinator = FetchCoordinator::new(ResourceCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let options = QueryOptions { is_online: Some(Arc::new(|| false)), ..Default::default() };
        let query = Query::mount(coordinator, Some(world_key("w1")), echo_fetcher(Arc::clone(&calls)), options).await;

        assert!(query.snapshot().data.is_none());
        assert!(query.revalidate().await.data.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_interval_polls() {
        let coordinator = FetchCoordinator::new(ResourceCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let options = QueryOptions { refresh_interval: Some(Duration::from_secs(30)), ..Default::default() };
        let query = Query::mount(coordinator, Some(world_key("w1")), echo_fetcher(Arc::clone(&calls)), options).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        drop(query);
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
