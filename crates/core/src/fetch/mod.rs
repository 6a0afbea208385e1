//! Fetch coordination over the resource cache.
//!
//! ### Deduplication
//! - One in-flight fetch per key; later callers share its result.
//! - `revalidate` forces a fresh fetch that supersedes the in-flight one.
//!
//! ### Ordering
//! - Every fetch takes a write ticket when issued. A response whose ticket
//!   is older than the key's last committed write is discarded.
//!
//! ### Lifetime
//! - Fetches run on spawned tasks. Dropping the caller or the last
//!   subscriber never cancels one; its result still lands in the cache.
//!
//! ### Failure
//! - Errors are recorded on the entry next to the last good data and
//!   retried on the next revalidation trigger.

pub mod pages;
pub mod poll;
pub mod query;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

pub use pages::{KeyLoader, PageLoader};
pub use poll::{MIN_POLL_INTERVAL, PollHandle, PollOptions, Predicate};
pub use query::{Query, QueryOptions, QueryState};

use crate::cache::{CacheKey, ResourceCache, WriteTicket};
use crate::FetchError;

/// Loads the data behind a cache key.
///
/// Implemented by the HTTP route transport; tests use [`fetcher_fn`].
#[async_trait]
pub trait Fetcher<T>: Send + Sync {
    async fn fetch(&self, key: &CacheKey) -> Result<T, FetchError>;
}

/// Adapter turning an async closure into a [`Fetcher`].
pub struct FnFetcher<F>(F);

/// Wrap `f(key) -> impl Future<Output = Result<T, FetchError>>` as a fetcher.
pub fn fetcher_fn<T, F, Fut>(f: F) -> FnFetcher<F>
where
    F: Fn(CacheKey) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
    FnFetcher(f)
}

#[async_trait]
impl<T, F, Fut> Fetcher<T> for FnFetcher<F>
where
    F: Fn(CacheKey) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    T: Send + 'static,
{
    async fn fetch(&self, key: &CacheKey) -> Result<T, FetchError> {
        (self.0)(key.clone()).await
    }
}

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, FetchError>>>;

struct InFlight<T> {
    seq: u64,
    shared: SharedFetch<T>,
}

struct State<T> {
    in_flight: HashMap<CacheKey, InFlight<T>>,
    fetchers: HashMap<CacheKey, Arc<dyn Fetcher<T>>>,
}

/// Deduplicating, order-preserving fetch front end for a [`ResourceCache`].
///
/// Cheap to clone; clones share in-flight bookkeeping.
pub struct FetchCoordinator<T> {
    cache: ResourceCache<T>,
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for FetchCoordinator<T> {
    fn clone(&self) -> Self {
        Self { cache: self.cache.clone(), state: Arc::clone(&self.state) }
    }
}

impl<T> FetchCoordinator<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(cache: ResourceCache<T>) -> Self {
        Self { cache, state: Arc::new(Mutex::new(State { in_flight: HashMap::new(), fetchers: HashMap::new() })) }
    }

    pub fn cache(&self) -> &ResourceCache<T> {
        &self.cache
    }

    /// Fetch `key`, joining the in-flight request for it if there is one.
    pub async fn fetch(&self, key: &CacheKey, fetcher: Arc<dyn Fetcher<T>>) -> Result<T, FetchError> {
        self.start(key, Some(fetcher), false)
            .ok_or_else(|| FetchError::Aborted(format!("no fetcher registered for {key}")))?
            .await
    }

    /// Fetch `key` again even if a request is in flight; the new request
    /// supersedes the old one.
    pub async fn revalidate(&self, key: &CacheKey, fetcher: Arc<dyn Fetcher<T>>) -> Result<T, FetchError> {
        self.start(key, Some(fetcher), true)
            .ok_or_else(|| FetchError::Aborted(format!("no fetcher registered for {key}")))?
            .await
    }

    /// Revalidate with the fetcher last used for `key`.
    ///
    /// Returns `None` if nothing ever fetched this key.
    pub async fn revalidate_key(&self, key: &CacheKey) -> Option<Result<T, FetchError>> {
        let shared = self.start(key, None, true)?;
        Some(shared.await)
    }

    /// Kick off a revalidation without waiting for it.
    ///
    /// Returns whether a fetcher was known for `key`.
    pub fn revalidate_in_background(&self, key: &CacheKey) -> bool {
        self.start(key, None, true).is_some()
    }

    /// Revalidate every subscribed key with a known fetcher.
    pub fn revalidate_all(&self) -> usize {
        let keys = self.cache.subscribed_keys();
        let started = keys.iter().filter(|key| self.revalidate_in_background(key)).count();
        tracing::debug!(started, subscribed = keys.len(), "revalidating subscribed keys");
        started
    }

    /// Remember `fetcher` for `key` without fetching.
    pub fn register(&self, key: &CacheKey, fetcher: Arc<dyn Fetcher<T>>) {
        self.state.lock().fetchers.insert(key.clone(), fetcher);
    }

    pub fn is_fetching(&self, key: &CacheKey) -> bool {
        self.state.lock().in_flight.contains_key(key)
    }

    /// Session change: forget in-flight requests and clear the cache.
    ///
    /// Requests already on the wire still finish, but the cache refuses
    /// their results.
    pub fn reset(&self) {
        let abandoned = {
            let mut state = self.state.lock();
            let abandoned = state.in_flight.len();
            state.in_flight.clear();
            abandoned
        };
        tracing::info!(abandoned, "session reset; clearing resource cache");
        self.cache.reset();
    }

    /// `reset`, then refetch everything that still has subscribers.
    pub fn reset_and_revalidate(&self) -> usize {
        self.reset();
        self.revalidate_all()
    }

    /// Start (or join) a fetch. Returns `None` when no fetcher is supplied
    /// or remembered for the key.
    fn start(&self, key: &CacheKey, fetcher: Option<Arc<dyn Fetcher<T>>>, force: bool) -> Option<SharedFetch<T>> {
        let shared = {
            let mut state = self.state.lock();
            let fetcher = match fetcher {
                Some(fetcher) => {
                    state.fetchers.insert(key.clone(), Arc::clone(&fetcher));
                    fetcher
                }
                None => Arc::clone(state.fetchers.get(key)?),
            };

            if !force && let Some(in_flight) = state.in_flight.get(key) {
                tracing::debug!(key = %key, seq = in_flight.seq, "joining in-flight fetch");
                return Some(in_flight.shared.clone());
            }

            let ticket = self.cache.begin(key);
            let seq = ticket.seq;
            let shared = self.clone().run(ticket, fetcher).boxed().shared();
            if let Some(previous) = state.in_flight.insert(key.clone(), InFlight { seq, shared: shared.clone() }) {
                tracing::debug!(key = %key, superseded = previous.seq, seq, "superseding in-flight fetch");
            }
            shared
        };

        self.cache.set_validating(key, true);
        tokio::spawn(shared.clone());
        Some(shared)
    }

    async fn run(self, ticket: WriteTicket, fetcher: Arc<dyn Fetcher<T>>) -> Result<T, FetchError> {
        let result = fetcher.fetch(&ticket.key).await;

        let still_validating = {
            let mut state = self.state.lock();
            match state.in_flight.get(&ticket.key) {
                Some(in_flight) if in_flight.seq == ticket.seq => {
                    state.in_flight.remove(&ticket.key);
                    false
                }
                Some(_) => true,
                None => false,
            }
        };

        if let Err(err) = &result {
            tracing::warn!(key = %ticket.key, error = %err, "fetch failed; keeping last good data");
        }

        if !self.cache.settle_fetch(&ticket, result.clone(), still_validating) {
            tracing::debug!(key = %ticket.key, seq = ticket.seq, "discarded stale fetch response");
        }

        result
    }
}
