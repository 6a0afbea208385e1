//! Client-side resource cache for smallworld.
//!
//! This crate provides:
//! - A keyed resource cache with subscriptions and ordered writes
//! - Deduplicated, polling fetches over that cache
//! - Optimistic mutations with rollback
//! - Form state bound to mutations
//! - Unified error types and configuration

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod form;
pub mod mutation;

pub use cache::{CacheEntry, CacheKey, ResourceCache, Subscription};
pub use config::AppConfig;
pub use error::{BASE_FIELD, Error, FetchError, FieldErrors, MutationError};
pub use fetch::{FetchCoordinator, Fetcher, PageLoader, Query, QueryOptions, QueryState, fetcher_fn};
pub use form::{Form, FormConfig, SubmitOutcome, SuccessPolicy};
pub use mutation::{MutationExecutor, MutationOptions};
