//! Commands run against a live backend.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Value, json};
use smallworld_client::routes::{
    CREATE_POST_REACTION, CREATE_WORLD_POST, DELETE_POST_REACTION, POST_REACTIONS, WORLD_POSTS,
};
use smallworld_client::{
    CreatedPost, CreatedReaction, DeletedReaction, Post, PostReaction, PostsPage, Reactions, RequestOptions,
    RouteClient, posts_page_key,
};
use smallworld_core::form::{FieldValues, is_filled_value};
use smallworld_core::{
    AppConfig, CacheKey, FetchCoordinator, Fetcher, FieldErrors, Form, FormConfig, MutationExecutor, MutationOptions,
    PageLoader, Query, QueryOptions, ResourceCache, SubmitOutcome,
};

/// Poll interval for `feed --watch` when none is configured.
const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(30);

pub struct App {
    config: AppConfig,
    client: RouteClient,
    posts: MutationExecutor<PostsPage>,
    reactions: MutationExecutor<Reactions>,
}

impl App {
    pub fn new(config: AppConfig) -> Result<Self> {
        let client = RouteClient::from_app_config(&config).context("failed to build HTTP client")?;
        Ok(Self {
            posts: MutationExecutor::new(FetchCoordinator::new(ResourceCache::new())),
            reactions: MutationExecutor::new(FetchCoordinator::new(ResourceCache::new())),
            client,
            config,
        })
    }

    fn posts_fetcher(&self) -> Arc<dyn Fetcher<PostsPage>> {
        Arc::new(self.client.fetcher(WORLD_POSTS, "load posts"))
    }

    fn reactions_fetcher(&self) -> Arc<dyn Fetcher<Reactions>> {
        Arc::new(self.client.fetcher(POST_REACTIONS, "load reactions").silently())
    }

    fn feed_loader(&self, world: &str) -> PageLoader<PostsPage> {
        PageLoader::new(
            self.posts.coordinator().clone(),
            self.posts_fetcher(),
            posts_page_key(WORLD_POSTS, world_params(world)),
            |page: &PostsPage| page.next_page().is_some(),
        )
    }

    pub async fn feed(&self, world: &str, pages: usize) -> Result<Vec<Post>> {
        let mut feed = self.feed_loader(world);
        let loaded = feed.set_size(pages).await.context("failed to load posts")?;
        tracing::debug!(world, loaded, has_more = ?feed.has_more(), "loaded feed");
        Ok(feed.items(|page| page.posts.clone()))
    }

    /// Poll the first page of a world's feed until interrupted.
    pub async fn watch(&self, world: &str) -> Result<()> {
        let key = first_page_key(world)?;
        let options = QueryOptions {
            keep_previous_data: true,
            refresh_interval: Some(self.config.refresh_interval().unwrap_or(DEFAULT_WATCH_INTERVAL)),
            ..Default::default()
        };
        let query = Query::mount(self.posts.coordinator().clone(), Some(key), self.posts_fetcher(), options).await;
        let mut changes = query.changes();

        let mut shown = query.snapshot().data;
        if let Some(page) = &shown {
            print_posts(&page.posts)?;
        }

        loop {
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = query.snapshot();
                    if let Some(err) = &state.error {
                        tracing::warn!(error = %err, "feed refresh failed");
                    }
                    if state.data.is_some() && state.data != shown {
                        if let Some(page) = &state.data {
                            print_posts(&page.posts)?;
                        }
                        shown = state.data;
                    }
                    self.posts.cache().evict_orphaned(self.config.retention());
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        tracing::info!("stopped watching feed");
        Ok(())
    }

    pub async fn post(&self, world: &str, title: Option<&str>, body: &str) -> Result<Post> {
        let feed_key = first_page_key(world)?;
        if let Err(err) = self.feed_loader(world).set_size(1).await {
            tracing::warn!(error = %err, "couldn't load feed before posting");
        }

        let action = self.client.action(CREATE_WORLD_POST, Value::Null, RequestOptions::new("create post"));
        let mutation_key = feed_key.clone();
        let config = FormConfig::new("create post", action)
            .initial("title", "")
            .initial("body", "")
            .validate("body", required)
            .transform_values(post_payload)
            .mutation(move |_payload| {
                MutationOptions::new("create post").affecting(mutation_key.clone()).populate(prepend_created)
            });
        let form = Form::new(self.posts.clone(), config);

        if let Some(title) = title {
            form.set_field_value("title", title);
        }
        form.set_field_value("body", body);

        match form.submit().await {
            SubmitOutcome::Submitted(created) => {
                settle(&self.posts, &feed_key, self.posts_fetcher()).await;
                Ok(created.post)
            }
            SubmitOutcome::Invalid(errors) => bail!("invalid post: {}", describe_errors(&errors)),
            SubmitOutcome::Failed(err) => {
                Err(anyhow::Error::new(err).context(format!("failed to create post: {}", describe_errors(&form.errors()))))
            }
            SubmitOutcome::Ignored => bail!("a post is already being submitted"),
        }
    }

    pub async fn react(&self, post: &str, emoji: &str) -> Result<Reactions> {
        let params = json!({ "post_id": post });
        let key = reactions_key(post)?;
        let fetcher = self.reactions_fetcher();
        if let Err(err) = self.reactions.coordinator().fetch(&key, Arc::clone(&fetcher)).await {
            tracing::warn!(error = %err, "couldn't load reactions before reacting");
        }

        let pending = PostReaction { id: format!("pending:{emoji}"), emoji: emoji.to_string(), reactor_id: None };
        let options = MutationOptions::new("react to post")
            .affecting(key.clone())
            .guard(format!("react:{post}:{emoji}"))
            .optimistic(move |current: Option<&Reactions>| current.cloned().unwrap_or_default().with(pending.clone()))
            .populate(|prior: Option<&Reactions>, created: &CreatedReaction| {
                prior.cloned().unwrap_or_default().with(created.reaction.clone())
            });
        let action = self.client.action(CREATE_POST_REACTION, params, RequestOptions::new("react to post"));
        let payload = json!({ "reaction": { "emoji": emoji } });

        self.reactions.execute(move || action(payload), options).await?;
        settle(&self.reactions, &key, fetcher).await;
        Ok(self.reactions.cache().data(&key).unwrap_or_default())
    }

    /// Remove one of your reactions from a post.
    pub async fn unreact(&self, post: &str, reaction: &str) -> Result<Reactions> {
        let key = reactions_key(post)?;
        let fetcher = self.reactions_fetcher();
        if let Err(err) = self.reactions.coordinator().fetch(&key, Arc::clone(&fetcher)).await {
            tracing::warn!(error = %err, "couldn't load reactions before removing one");
        }

        let removed = reaction.to_string();
        let options = MutationOptions::new("remove reaction")
            .affecting(key.clone())
            .guard(format!("unreact:{reaction}"))
            .optimistic(move |current: Option<&Reactions>| current.cloned().unwrap_or_default().without(&removed));
        let action = self.client.action::<DeletedReaction>(
            DELETE_POST_REACTION,
            json!({ "id": reaction }),
            RequestOptions::new("remove reaction"),
        );

        let deleted = self.reactions.execute(move || action(Value::Null), options).await?;
        tracing::debug!(post_id = %deleted.post_id, reaction, "removed reaction");
        settle(&self.reactions, &key, fetcher).await;
        Ok(self.reactions.cache().data(&key).unwrap_or_default())
    }
}

/// Wait for a background revalidation of `key` to land, if one is running.
async fn settle<T>(executor: &MutationExecutor<T>, key: &CacheKey, fetcher: Arc<dyn Fetcher<T>>)
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    let coordinator = executor.coordinator();
    if coordinator.is_fetching(key)
        && let Err(err) = coordinator.fetch(key, fetcher).await
    {
        tracing::warn!(key = %key, error = %err, "revalidation after mutation failed");
    }
}

fn world_params(world: &str) -> Value {
    json!({ "world_id": world })
}

fn first_page_key(world: &str) -> Result<CacheKey> {
    WORLD_POSTS.key(world_params(world))?.ok_or_else(|| anyhow!("missing world id"))
}

fn reactions_key(post: &str) -> Result<CacheKey> {
    POST_REACTIONS.key(json!({ "post_id": post }))?.ok_or_else(|| anyhow!("missing post id"))
}

fn required(value: &Value, _values: &FieldValues) -> Option<String> {
    (!is_filled_value(value)).then(|| "can't be blank".to_string())
}

fn post_payload(values: &FieldValues) -> Value {
    let title = values.get("title").filter(|v| is_filled_value(v)).cloned().unwrap_or(Value::Null);
    let body = values.get("body").cloned().unwrap_or(Value::Null);
    json!({ "post": { "title": title, "body_html": body } })
}

fn prepend_created(prior: Option<&PostsPage>, created: &CreatedPost) -> PostsPage {
    match prior {
        Some(page) => page.upsert(created.post.clone()),
        None => PostsPage { posts: vec![created.post.clone()], pagination: Default::default() },
    }
}

fn describe_errors(errors: &FieldErrors) -> String {
    errors.iter().map(|(field, message)| format!("{field} {message}")).collect::<Vec<_>>().join(", ")
}

fn print_posts(posts: &[Post]) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(posts)?);
    Ok(())
}
