//! Paginated feeds built from per-page cache keys.
//!
//! Each page is its own cache entry. A key loader derives the key of page
//! `i` from page `i - 1` (cursor pagination) and returns `None` once there is
//! no next page.

use std::sync::Arc;

use super::{FetchCoordinator, Fetcher};
use crate::cache::CacheKey;
use crate::FetchError;

/// Key of page `index`, given the page before it (`None` for the first page).
pub type KeyLoader<P> = Arc<dyn Fn(usize, Option<&P>) -> Option<CacheKey> + Send + Sync>;

/// "Load more" feed over a [`FetchCoordinator`].
pub struct PageLoader<P> {
    coordinator: FetchCoordinator<P>,
    fetcher: Arc<dyn Fetcher<P>>,
    get_key: KeyLoader<P>,
    has_next: Arc<dyn Fn(&P) -> bool + Send + Sync>,
    size: usize,
    keys: Vec<CacheKey>,
}

impl<P> PageLoader<P>
where
    P: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(
        coordinator: FetchCoordinator<P>, fetcher: Arc<dyn Fetcher<P>>,
        get_key: impl Fn(usize, Option<&P>) -> Option<CacheKey> + Send + Sync + 'static,
        has_next: impl Fn(&P) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self { coordinator, fetcher, get_key: Arc::new(get_key), has_next: Arc::new(has_next), size: 0, keys: Vec::new() }
    }

    /// Number of pages requested so far.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Keys of the pages currently loaded, in order.
    pub fn keys(&self) -> &[CacheKey] {
        &self.keys
    }

    /// Ensure the first `size` pages are loaded, reusing cached pages.
    ///
    /// Returns how many pages are available, which is less than `size` when
    /// the feed ran out.
    pub async fn set_size(&mut self, size: usize) -> Result<usize, FetchError> {
        self.load(size, false).await
    }

    /// Request one more page, unless the last page said there are no more.
    pub async fn load_more(&mut self) -> Result<usize, FetchError> {
        if self.has_more() == Some(false) {
            return Ok(self.keys.len());
        }
        self.set_size(self.keys.len() + 1).await
    }

    /// Refetch every requested page in order.
    pub async fn revalidate(&mut self) -> Result<usize, FetchError> {
        self.load(self.size, true).await
    }

    /// Loaded pages, in order.
    pub fn pages(&self) -> Vec<P> {
        let cache = self.coordinator.cache();
        self.keys.iter().map_while(|key| cache.data(key)).collect()
    }

    /// All items across loaded pages.
    pub fn items<I>(&self, project: impl Fn(&P) -> Vec<I>) -> Vec<I> {
        self.pages().iter().flat_map(project).collect()
    }

    /// Whether the last loaded page points at another one; `None` before
    /// anything is loaded.
    pub fn has_more(&self) -> Option<bool> {
        self.pages().last().map(|page| (self.has_next)(page))
    }

    async fn load(&mut self, size: usize, force: bool) -> Result<usize, FetchError> {
        self.size = size;
        let mut keys = Vec::with_capacity(size);
        let mut previous: Option<P> = None;

        for index in 0..size {
            let Some(key) = (self.get_key)(index, previous.as_ref()) else {
                break;
            };

            let cached = if force { None } else { self.coordinator.cache().data(&key) };
            let page = match cached {
                Some(page) => page,
                None => {
                    let result = if force {
                        self.coordinator.revalidate(&key, Arc::clone(&self.fetcher)).await
                    } else {
                        self.coordinator.fetch(&key, Arc::clone(&self.fetcher)).await
                    };
                    match result {
                        Ok(page) => page,
                        Err(err) => {
                            tracing::warn!(page = index, key = %key, error = %err, "failed to load page");
                            self.keys = keys;
                            return Err(err);
                        }
                    }
                }
            };

            keys.push(key);
            previous = Some(page);
        }

        self.keys = keys;
        Ok(self.keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResourceCache;
    use crate::fetch::fetcher_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct Page {
        posts: Vec<u32>,
        next: Option<u64>,
    }

    fn feed_key(_index: usize, previous: Option<&Page>) -> Option<CacheKey> {
        let base = CacheKey::new("universe_posts");
        match previous {
            None => Some(base),
            Some(page) => page.next.map(|next| base.with_param("page", next)),
        }
    }

    /// Three pages of two posts each.
    fn feed_fetcher(calls: Arc<AtomicUsize>) -> Arc<dyn Fetcher<Page>> {
        Arc::new(fetcher_fn(move |key: CacheKey| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let page = key.param("page").and_then(|p| p.as_u64()).unwrap_or(1);
                let first = (page as u32 - 1) * 2 + 1;
                Ok(Page { posts: vec![first, first + 1], next: (page < 3).then_some(page + 1) })
            }
        }))
    }

    fn loader(calls: Arc<AtomicUsize>) -> PageLoader<Page> {
        let coordinator = FetchCoordinator::new(ResourceCache::new());
        PageLoader::new(coordinator, feed_fetcher(calls), feed_key, |page: &Page| page.next.is_some())
    }

    #[tokio::test]
    async fn test_load_more_appends_pages() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut feed = loader(Arc::clone(&calls));
        assert_eq!(feed.has_more(), None);

        assert_eq!(feed.set_size(1).await, Ok(1));
        assert_eq!(feed.items(|p| p.posts.clone()), vec![1, 2]);
        assert_eq!(feed.has_more(), Some(true));

        assert_eq!(feed.load_more().await, Ok(2));
        assert_eq!(feed.items(|p| p.posts.clone()), vec![1, 2, 3, 4]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stops_when_no_next_page() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut feed = loader(Arc::clone(&calls));

        assert_eq!(feed.set_size(5).await, Ok(3));
        assert_eq!(feed.pages().len(), 3);
        assert_eq!(feed.has_more(), Some(false));
        assert_eq!(feed.load_more().await, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cached_pages_reused_and_revalidate_refetches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut feed = loader(Arc::clone(&calls));

        feed.set_size(2).await.unwrap();
        feed.set_size(2).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        feed.revalidate().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(feed.keys().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_page_keeps_earlier_pages() {
        let coordinator = FetchCoordinator::new(ResourceCache::new());
        let fetcher: Arc<dyn Fetcher<Page>> = Arc::new(fetcher_fn(|key: CacheKey| async move {
            match key.param("page") {
                None => Ok(Page { posts: vec![1], next: Some(2) }),
                Some(_) => Err(FetchError::Status { status: 503, message: "server is unresponsive".into() }),
            }
        }));
        let mut feed = PageLoader::new(coordinator, fetcher, feed_key, |page: &Page| page.next.is_some());

        assert!(feed.set_size(2).await.is_err());
        assert_eq!(feed.items(|p| p.posts.clone()), vec![1]);
    }
}
