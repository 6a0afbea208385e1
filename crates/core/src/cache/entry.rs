//! Cache entry state as observed by subscribers.

use chrono::{DateTime, Utc};

use super::CacheKey;
use crate::FetchError;

/// The cached state of one key.
///
/// `error` is set when the latest revalidation failed. The last good `data`
/// is kept alongside it so a feed can render stale content with an error
/// indicator. A successful write always clears `error`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub key: CacheKey,
    pub data: Option<T>,
    pub error: Option<FetchError>,
    pub is_validating: bool,
    pub updated_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub(crate) fn empty(key: CacheKey) -> Self {
        Self { key, data: None, error: None, is_validating: false, updated_at: Utc::now() }
    }

    /// Nothing has been loaded yet and nothing is on the way.
    pub fn is_idle_miss(&self) -> bool {
        self.data.is_none() && self.error.is_none() && !self.is_validating
    }

    /// Data is present but the most recent refresh failed.
    pub fn is_stale(&self) -> bool {
        self.data.is_some() && self.error.is_some()
    }

    /// First load in progress: validating with nothing to show yet.
    pub fn is_loading(&self) -> bool {
        self.data.is_none() && self.is_validating
    }
}
