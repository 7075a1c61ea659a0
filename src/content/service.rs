use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::infrastructure::document::{encode_fields, DocumentQuery, Fields, FieldFilter};
use crate::infrastructure::traits::{DocumentStore, ObjectStorage};
use crate::models::{fields, now_millis, Collection, Comment, NewPost, Post, UserProfile};

/// Post, comment and profile reads and owner-only content writes.
#[derive(Clone)]
pub struct ContentService {
    store: Arc<dyn DocumentStore>,
    objects: Arc<dyn ObjectStorage>,
}

impl ContentService {
    pub fn new(store: Arc<dyn DocumentStore>, objects: Arc<dyn ObjectStorage>) -> Self {
        Self { store, objects }
    }

    /// Upload the image (if any), snapshot the author's profile into the post and
    /// write the post document. The blob is removed again if the write fails.
    #[instrument(skip(self, new_post))]
    pub async fn create_post(&self, author_id: &str, new_post: NewPost) -> AppResult<Post> {
        let profile = self.get_profile(author_id).await?;

        let image_url = if new_post.image.is_empty() {
            None
        } else {
            let path = format!("posts/{}/{}.jpg", author_id, Uuid::new_v4());
            Some(self.objects.put(&path, new_post.image).await?)
        };

        let mut post = Post {
            id: String::new(),
            author_id: author_id.to_string(),
            author_username: profile.as_ref().map(|p| p.username.clone()).unwrap_or_default(),
            author_avatar_url: profile.and_then(|p| p.avatar_url),
            image_url,
            caption: new_post.caption,
            location: new_post.location,
            created_at: now_millis(),
            updated_at: None,
            likes: Default::default(),
            comment_count: 0,
            metadata: new_post.metadata,
        };

        let created = match self.store.create(Collection::Posts, encode_fields(&post)?).await {
            Ok(doc) => doc,
            Err(err) => {
                if let Some(url) = &post.image_url {
                    if let Err(cleanup) = self.objects.delete_by_url(url).await {
                        warn!(url = %url, error = %cleanup, "Could not remove image of unwritten post");
                    }
                }
                return Err(err);
            }
        };
        post.id = created.id;

        info!(post_id = %post.id, "Created post");
        Ok(post)
    }

    pub async fn get_post(&self, post_id: &str) -> AppResult<Post> {
        self.store
            .get(Collection::Posts, post_id)
            .await?
            .ok_or_else(|| AppError::EntityNotFound(format!("post {}", post_id)))?
            .decode()
    }

    /// Owner-only caption edit
    #[instrument(skip(self, caption))]
    pub async fn update_caption(&self, post_id: &str, requester_id: &str, caption: &str) -> AppResult<Post> {
        let mut post = self.get_post(post_id).await?;
        if post.author_id != requester_id {
            return Err(AppError::Forbidden(format!(
                "user {} does not own post {}",
                requester_id, post_id
            )));
        }

        let now = now_millis();
        let mut update = Fields::new();
        update.insert(fields::CAPTION.to_string(), json!(caption));
        update.insert(fields::UPDATED_AT.to_string(), json!(now.timestamp_millis()));
        self.store.set(Collection::Posts, post_id, update, true).await?;

        post.caption = caption.to_string();
        post.updated_at = Some(now);
        Ok(post)
    }

    pub async fn get_comment(&self, comment_id: &str) -> AppResult<Comment> {
        self.store
            .get(Collection::Comments, comment_id)
            .await?
            .ok_or_else(|| AppError::EntityNotFound(format!("comment {}", comment_id)))?
            .decode()
    }

    /// Comments of a post, oldest first
    pub async fn list_comments(&self, post_id: &str, limit: Option<usize>) -> AppResult<Vec<Comment>> {
        let mut query = DocumentQuery::new(Collection::Comments)
            .filter(FieldFilter::eq(fields::POST_ID, post_id))
            .order_by_asc(fields::CREATED_AT);
        if let Some(limit) = limit {
            query = query.limit(limit);
        }

        self.store
            .query(&query)
            .await?
            .iter()
            .map(|doc| doc.decode())
            .collect()
    }

    pub async fn get_profile(&self, user_id: &str) -> AppResult<Option<UserProfile>> {
        match self.store.get(Collection::Users, user_id).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// Create or replace a profile. Usernames are stored lowercased so that
    /// mentions resolve case-insensitively.
    #[instrument(skip(self, profile), fields(user_id = %profile.id))]
    pub async fn upsert_profile(&self, mut profile: UserProfile) -> AppResult<UserProfile> {
        let username = profile.username.trim().to_lowercase();
        if username.is_empty() {
            return Err(AppError::Validation("username must not be empty".to_string()));
        }
        profile.username = username;
        self.store
            .set(Collection::Users, &profile.id, encode_fields(&profile)?, false)
            .await?;
        Ok(profile)
    }

    /// Record `follower -> followee` on both profiles. The two writes are
    /// independent; a failure between them leaves the edge one-sided.
    #[instrument(skip(self))]
    pub async fn follow(&self, follower_id: &str, followee_id: &str) -> AppResult<()> {
        if follower_id == followee_id {
            return Err(AppError::Validation("users cannot follow themselves".to_string()));
        }
        self.store
            .array_add(Collection::Users, follower_id, fields::FOLLOWING, json!(followee_id))
            .await?;
        self.store
            .array_add(Collection::Users, followee_id, fields::FOLLOWERS, json!(follower_id))
            .await
    }

    #[instrument(skip(self))]
    pub async fn unfollow(&self, follower_id: &str, followee_id: &str) -> AppResult<()> {
        self.store
            .array_remove(Collection::Users, follower_id, fields::FOLLOWING, json!(followee_id))
            .await?;
        self.store
            .array_remove(Collection::Users, followee_id, fields::FOLLOWERS, json!(follower_id))
            .await
    }

    /// Resolve usernames to profiles, one bounded `In` query per slice of names.
    /// Unknown names are dropped.
    pub async fn resolve_usernames(&self, usernames: &[String]) -> AppResult<Vec<UserProfile>> {
        let mut profiles = Vec::new();
        for names in usernames.chunks(self.store.max_in_filter().max(1)) {
            let query = DocumentQuery::new(Collection::Users)
                .filter(FieldFilter::one_of(fields::USERNAME, names.iter().map(|n| Value::from(n.as_str()))));
            for doc in self.store.query(&query).await? {
                profiles.push(doc.decode()?);
            }
        }
        Ok(profiles)
    }
}
