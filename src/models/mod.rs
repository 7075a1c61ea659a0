// Feed domain models - posts, comments, profiles and the caller-owned feed snapshot

pub mod feed_models;

pub use feed_models::{
    Comment, FeedSnapshot, NewPost, NotificationEvent, PartialFeedFailure, Post, UserProfile,
};

pub type UserId = String;
pub type PostId = String;
pub type CommentId = String;

/// Current time truncated to the millisecond precision documents store
pub fn now_millis() -> chrono::DateTime<chrono::Utc> {
    let now = chrono::Utc::now();
    chrono::DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Document-store collections used by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Collection {
    Posts,
    Comments,
    Users,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Posts => "posts",
            Collection::Comments => "comments",
            Collection::Users => "users",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field names shared between the models and the queries built against them
pub mod fields {
    pub const AUTHOR_ID: &str = "author_id";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
    pub const LIKES: &str = "likes";
    pub const COMMENT_COUNT: &str = "comment_count";
    pub const POST_ID: &str = "post_id";
    pub const CAPTION: &str = "caption";
    pub const USERNAME: &str = "username";
    pub const FOLLOWING: &str = "following";
    pub const FOLLOWERS: &str = "followers";
}
