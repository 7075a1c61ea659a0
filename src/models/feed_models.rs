use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use super::{CommentId, PostId, UserId};

/// A post as stored in the `posts` collection.
///
/// Author display fields are copied from the author's profile when the post is
/// created and are never refreshed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub author_id: UserId,
    #[serde(default)]
    pub author_username: String,
    #[serde(default)]
    pub author_avatar_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub likes: BTreeSet<UserId>,
    #[serde(default)]
    pub comment_count: u64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Post {
    pub fn is_liked_by(&self, user_id: &str) -> bool {
        self.likes.contains(user_id)
    }

    pub fn like_count(&self) -> usize {
        self.likes.len()
    }
}

/// A comment lives in its own collection and points back at its post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub author_id: UserId,
    #[serde(default)]
    pub author_username: String,
    #[serde(default)]
    pub author_avatar_url: Option<String>,
    pub text: String,
    #[serde(default)]
    pub likes: BTreeSet<UserId>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Profile record in the `users` collection. `following`/`followers` symmetry
/// is maintained by whoever writes the edges, not by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub following: Vec<UserId>,
    #[serde(default)]
    pub followers: Vec<UserId>,
}

/// Input for publishing a post
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPost {
    pub caption: String,
    #[serde(default)]
    pub location: Option<String>,
    /// Raw image bytes; uploaded to object storage before the post document is written
    #[serde(default)]
    pub image: Vec<u8>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Some chunk queries failed but the survivors still produced a feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialFeedFailure {
    pub failed_chunks: usize,
    pub total_chunks: usize,
}

/// Process-local, recency-ordered view of a user's feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSnapshot {
    pub principal_id: UserId,
    pub posts: Vec<Post>,
    pub partial_failure: Option<PartialFeedFailure>,
    /// True when the caller follows nobody and the global recency feed was used
    pub fallback: bool,
    pub assembled_at: DateTime<Utc>,
}

impl FeedSnapshot {
    pub fn empty(principal_id: impl Into<UserId>) -> Self {
        Self {
            principal_id: principal_id.into(),
            posts: Vec::new(),
            partial_failure: None,
            fallback: false,
            assembled_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn is_partial(&self) -> bool {
        self.partial_failure.is_some()
    }

    pub fn post(&self, post_id: &str) -> Option<&Post> {
        self.posts.iter().find(|p| p.id == post_id)
    }

    pub fn post_mut(&mut self, post_id: &str) -> Option<&mut Post> {
        self.posts.iter_mut().find(|p| p.id == post_id)
    }

    pub fn remove_post(&mut self, post_id: &str) -> Option<Post> {
        let index = self.posts.iter().position(|p| p.id == post_id)?;
        Some(self.posts.remove(index))
    }

    pub fn post_ids(&self) -> Vec<&str> {
        self.posts.iter().map(|p| p.id.as_str()).collect()
    }
}

/// Events handed to the notification dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationEvent {
    PostLiked {
        post_id: PostId,
        actor_id: UserId,
    },
    PostCommented {
        post_id: PostId,
        comment_id: CommentId,
        actor_id: UserId,
    },
    Mentioned {
        post_id: PostId,
        comment_id: CommentId,
        actor_id: UserId,
    },
}
