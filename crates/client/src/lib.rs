//! HTTP route transport for smallworld.
//!
//! This crate provides the named routes of the smallworld backend, a reqwest
//! client that sends requests to them, and adapters that plug it into the
//! core cache as a [`smallworld_core::Fetcher`] or a mutation action.

pub mod error;
pub mod fetch;
pub mod models;
pub mod routes;

pub use error::RouteError;
pub use fetch::{ClientConfig, RequestOptions, RouteClient, RouteFetcher};
pub use models::{CreatedPost, CreatedReaction, DeletedReaction, Post, PostReaction, PostsPage, Reactions, posts_page_key};
pub use routes::{Method, Route};
