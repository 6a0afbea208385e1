//! Named smallworld routes.
//!
//! A route is a name, an HTTP method and a path template whose `:param`
//! segments are filled from the request params. The route name doubles as
//! the cache key route, so two requests with equal params share an entry.

use serde_json::Value;
use smallworld_core::CacheKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }

    /// Whether requests with this method carry a JSON body.
    pub fn has_body(self) -> bool {
        !matches!(self, Method::Get | Method::Delete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Route {
    pub name: &'static str,
    pub method: Method,
    pub template: &'static str,
}

impl Route {
    pub const fn new(name: &'static str, method: Method, template: &'static str) -> Self {
        Self { name, method, template }
    }

    /// Cache key for this route, or `None` when `params` is null (a
    /// conditional key that should not be fetched yet).
    pub fn key(&self, params: Value) -> Result<Option<CacheKey>, smallworld_core::Error> {
        if params.is_null() {
            return Ok(None);
        }
        CacheKey::from_params(self.name, params).map(Some)
    }
}

pub const WORLD_POSTS: Route = Route::new("world_posts", Method::Get, "/world/posts");
pub const CREATE_WORLD_POST: Route = Route::new("world_posts#create", Method::Post, "/world/posts");
pub const POST_REACTIONS: Route = Route::new("post_reactions", Method::Get, "/posts/:post_id/reactions");
pub const CREATE_POST_REACTION: Route =
    Route::new("post_reactions#create", Method::Post, "/posts/:post_id/reactions");
pub const DELETE_POST_REACTION: Route = Route::new("post_reactions#destroy", Method::Delete, "/post_reactions/:id");
