//! In-memory resource cache for remote collections.
//!
//! This module provides the process-wide store that feeds and forms read
//! from. It supports:
//!
//! - Typed keys (route + normalized parameters) with structural equality
//! - Listener registration independent of any UI framework
//! - Sequence-checked writes so stale responses never win
//! - Session reset and retention-based eviction of orphaned entries

pub mod entry;
pub mod hash;
pub mod key;
pub mod store;

pub use crate::Error;

pub use entry::CacheEntry;
pub use key::CacheKey;
pub use store::{Listener, Patch, ResourceCache, Subscription};

pub(crate) use store::{Settlement, WriteTicket};
