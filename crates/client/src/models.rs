//! Response bodies of the post and reaction routes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallworld_core::CacheKey;

use crate::routes::Route;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Cursor to the next page; absent or null on the last page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub next: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostsPage {
    pub posts: Vec<Post>,
    #[serde(default)]
    pub pagination: Pagination,
}

impl PostsPage {
    pub fn next_page(&self) -> Option<&Value> {
        self.pagination.next.as_ref().filter(|next| !next.is_null())
    }

    /// Insert `post` at the front, replacing any post with the same id.
    pub fn upsert(&self, post: Post) -> Self {
        let mut posts: Vec<Post> = self.posts.iter().filter(|p| p.id != post.id).cloned().collect();
        posts.insert(0, post);
        Self { posts, pagination: self.pagination.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostReaction {
    pub id: String,
    pub emoji: String,
    #[serde(default)]
    pub reactor_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reactions {
    pub reactions: Vec<PostReaction>,
}

impl Reactions {
    /// Append `reaction` unless one with the same id is already listed.
    pub fn with(&self, reaction: PostReaction) -> Self {
        let mut reactions = self.reactions.clone();
        if !reactions.iter().any(|r| r.id == reaction.id) {
            reactions.push(reaction);
        }
        Self { reactions }
    }

    /// Drop the reaction with id `id`, if listed.
    pub fn without(&self, id: &str) -> Self {
        Self { reactions: self.reactions.iter().filter(|r| r.id != id).cloned().collect() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedPost {
    pub post: Post,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedReaction {
    pub reaction: PostReaction,
}

/// Response to removing a reaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedReaction {
    #[serde(rename = "postId")]
    pub post_id: String,
}

/// Key loader for a cursor-paginated posts route.
///
/// Page 0 uses `params` as is; later pages add `query.page` from the
/// previous page's cursor, and stop when it has none.
pub fn posts_page_key(route: Route, params: Value) -> impl Fn(usize, Option<&PostsPage>) -> Option<CacheKey> {
    move |_index, previous| {
        let mut params = params.clone();
        if let Some(previous) = previous {
            let next = previous.next_page()?.clone();
            let object = params.as_object_mut()?;
            let query = object.entry("query").or_insert_with(|| Value::Object(Default::default()));
            query.as_object_mut()?.insert("page".to_string(), next);
        }
        match route.key(params) {
            Ok(key) => key,
            Err(err) => {
                tracing::warn!(route = route.name, error = %err, "invalid page params");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::WORLD_POSTS;
    use serde_json::json;

    fn post(id: &str) -> Post {
        Post { id: id.to_string(), title: None, body_html: None, emoji: None, created_at: None }
    }

    #[test]
    fn test_page_deserializes_with_cursor() {
        let page: PostsPage = serde_json::from_value(json!({
            "posts": [{ "id": "p1", "body_html": "<p>hi</p>", "created_at": "2024-05-01T12:00:00Z" }],
            "pagination": { "next": 2 }
        }))
        .unwrap();
        assert_eq!(page.posts[0].id, "p1");
        assert_eq!(page.next_page(), Some(&json!(2)));
    }

    #[test]
    fn test_last_page_has_no_cursor() {
        let page: PostsPage = serde_json::from_value(json!({ "posts": [], "pagination": { "next": null } })).unwrap();
        assert_eq!(page.next_page(), None);
    }

    #[test]
    fn test_upsert_replaces_same_id() {
        let page = PostsPage { posts: vec![post("p2"), post("p1")], pagination: Pagination::default() };
        let mut edited = post("p1");
        edited.title = Some("edited".into());

        let page = page.upsert(edited.clone()).upsert(edited);
        assert_eq!(page.posts.iter().filter(|p| p.id == "p1").count(), 1);
        assert_eq!(page.posts[0].title.as_deref(), Some("edited"));
    }

    #[test]
    fn test_reactions_with_dedupes() {
        let reaction = PostReaction { id: "r1".into(), emoji: "🥺".into(), reactor_id: None };
        let reactions = Reactions::default().with(reaction.clone()).with(reaction);
        assert_eq!(reactions.reactions.len(), 1);
    }

    #[test]
    fn test_reactions_without() {
        let mine = PostReaction { id: "r1".into(), emoji: "👍".into(), reactor_id: Some("u1".into()) };
        let theirs = PostReaction { id: "r2".into(), emoji: "🎉".into(), reactor_id: Some("u2".into()) };
        let reactions = Reactions { reactions: vec![mine, theirs.clone()] };

        assert_eq!(reactions.without("r1").reactions, vec![theirs]);
        assert_eq!(reactions.without("missing"), reactions);
    }

    #[test]
    fn test_deleted_reaction_deserializes() {
        let deleted: DeletedReaction = serde_json::from_value(json!({ "postId": "p1" })).unwrap();
        assert_eq!(deleted.post_id, "p1");
    }

    #[test]
    fn test_posts_page_key_follows_cursor() {
        let get_key = posts_page_key(WORLD_POSTS, json!({ "world_id": "w1" }));
        let first = get_key(0, None).unwrap();
        assert_eq!(first.param("query"), None);

        let page = PostsPage { posts: vec![post("p1")], pagination: Pagination { next: Some(json!(2)) } };
        let second = get_key(1, Some(&page)).unwrap();
        assert_eq!(second.param("query"), Some(&json!({ "page": 2 })));

        let last = PostsPage { posts: vec![], pagination: Pagination::default() };
        assert!(get_key(2, Some(&last)).is_none());
    }
}
