//! HTTP transport for smallworld routes.
//!
//! ### Requests
//! - JSON in, JSON out; `Accept: application/json` on every request.
//! - Path params fill the route template; the rest become the query string.
//! - The session token, when configured, is sent as a bearer token.
//!
//! ### Failures
//! - `{ "error": "..." }` bodies become `RouteError::Server`.
//! - `{ "errors": { field: message } }` bodies become `RouteError::Invalid`.
//! - Failures are logged as `failed to <descriptor>` at error level, or at
//!   debug level for requests marked `fail_silently`.

pub mod url;

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};
use reqwest::{Client, header};
use serde::de::DeserializeOwned;
use serde_json::Value;
use smallworld_core::{AppConfig, CacheKey, FetchError, Fetcher, MutationError};

pub use self::url::{UrlError, build_url, canonicalize_base};

use crate::error::RouteError;
use crate::routes::Route;

/// Configuration for the route client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the backend (default: "http://localhost:3000")
    pub base_url: String,

    /// User agent string (default: "smallworld/0.1")
    pub user_agent: String,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Bearer token for the signed-in session
    pub session_token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            user_agent: "smallworld/0.1".to_string(),
            timeout: Duration::from_millis(20000),
            session_token: None,
        }
    }
}

impl From<&AppConfig> for ClientConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            base_url: config.api_base_url.clone(),
            user_agent: config.user_agent.clone(),
            timeout: config.timeout(),
            session_token: config.session_token.clone(),
        }
    }
}

/// Per-request logging behavior.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// What the request does, e.g. "load posts".
    pub descriptor: String,
    pub fail_silently: bool,
}

impl RequestOptions {
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self { descriptor: descriptor.into(), fail_silently: false }
    }

    pub fn silently(mut self) -> Self {
        self.fail_silently = true;
        self
    }
}

/// HTTP client for smallworld routes.
#[derive(Debug, Clone)]
pub struct RouteClient {
    http: Client,
    base: ::url::Url,
    config: ClientConfig,
}

impl RouteClient {
    /// Create a new route client with the given configuration.
    pub fn new(config: ClientConfig) -> Result<Self, RouteError> {
        let base = canonicalize_base(&config.base_url)?;

        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()?;

        Ok(Self { http, base, config })
    }

    pub fn from_app_config(config: &AppConfig) -> Result<Self, RouteError> {
        Self::new(ClientConfig::from(config))
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn url_for(&self, route: &Route, params: &BTreeMap<String, Value>) -> Result<::url::Url, RouteError> {
        Ok(build_url(&self.base, route.template, params)?)
    }

    /// Send a request to `route`.
    ///
    /// `params` must be a JSON object or null. `body` is ignored for methods
    /// without a body.
    pub async fn request<D: DeserializeOwned>(
        &self, route: &Route, params: &Value, body: Option<&Value>, options: &RequestOptions,
    ) -> Result<D, RouteError> {
        let params: BTreeMap<String, Value> =
            params.as_object().map(|m| m.clone().into_iter().collect()).unwrap_or_default();
        self.send(route, &params, body, options).await
    }

    async fn send<D: DeserializeOwned>(
        &self, route: &Route, params: &BTreeMap<String, Value>, body: Option<&Value>, options: &RequestOptions,
    ) -> Result<D, RouteError> {
        let result = self.send_inner(route, params, body).await;
        if let Err(err) = &result {
            if options.fail_silently {
                tracing::debug!(route = route.name, error = %err, "failed to {}", options.descriptor);
            } else {
                tracing::error!(route = route.name, error = %err, "failed to {}: {}", options.descriptor, err.user_message());
            }
        }
        result
    }

    async fn send_inner<D: DeserializeOwned>(
        &self, route: &Route, params: &BTreeMap<String, Value>, body: Option<&Value>,
    ) -> Result<D, RouteError> {
        let start = Instant::now();
        let url = self.url_for(route, params)?;

        let mut request = self.http.request(route.method.as_reqwest(), url.as_str()).header(header::ACCEPT, "application/json");
        if let Some(token) = &self.config.session_token {
            request = request.bearer_auth(token);
        }
        if route.method.has_body()
            && let Some(body) = body
        {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        tracing::debug!(
            route = route.name,
            status = status.as_u16(),
            bytes = bytes.len(),
            "{} {} in {}ms",
            route.method.as_reqwest(),
            url,
            start.elapsed().as_millis()
        );

        if !status.is_success() {
            return Err(RouteError::from_response(status.as_u16(), &bytes));
        }

        let bytes: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };
        serde_json::from_slice(bytes).map_err(|e| RouteError::Parse(e.to_string()))
    }

    /// A [`Fetcher`] that reads `route` with each cache key's params.
    pub fn fetcher<D>(&self, route: Route, descriptor: impl Into<String>) -> RouteFetcher<D> {
        RouteFetcher {
            client: self.clone(),
            route,
            options: RequestOptions::new(descriptor),
            _data: PhantomData,
        }
    }

    /// A mutation action sending its payload to `route`.
    ///
    /// Fits both [`smallworld_core::FormConfig::new`] and
    /// [`smallworld_core::MutationExecutor::execute`].
    pub fn action<R>(
        &self, route: Route, params: Value, options: RequestOptions,
    ) -> impl Fn(Value) -> BoxFuture<'static, Result<R, MutationError>> + Send + Sync + 'static
    where
        R: DeserializeOwned + Send + 'static,
    {
        let client = self.clone();
        move |payload| {
            let client = client.clone();
            let params = params.clone();
            let options = options.clone();
            async move { client.request(&route, &params, Some(&payload), &options).await.map_err(MutationError::from) }
                .boxed()
        }
    }
}

/// Reads one route through a [`RouteClient`].
pub struct RouteFetcher<D> {
    client: RouteClient,
    route: Route,
    options: RequestOptions,
    _data: PhantomData<fn() -> D>,
}

impl<D> RouteFetcher<D> {
    pub fn silently(mut self) -> Self {
        self.options.fail_silently = true;
        self
    }
}

#[async_trait]
impl<D> Fetcher<D> for RouteFetcher<D>
where
    D: DeserializeOwned + Send + 'static,
{
    async fn fetch(&self, key: &CacheKey) -> Result<D, FetchError> {
        if key.route() != self.route.name {
            tracing::warn!(key = %key, route = self.route.name, "fetching key with a different route");
        }
        self.client.send(&self.route, key.params(), None, &self.options).await.map_err(FetchError::from)
    }
}
