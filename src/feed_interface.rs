// HTTP surface over the feed engine: feed reads, posting, likes and comments

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;

use crate::app_state::AppState;
use crate::engagement::EngagementStatsSnapshot;
use crate::error::AppResult;
use crate::infrastructure::Viewer;
use crate::models::{Comment, FeedSnapshot, NewPost, Post, UserId, UserProfile};

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    /// Comma separated author ids; the stored profile's list when absent
    pub following: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommentsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AddCommentRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCaptionRequest {
    pub caption: String,
}

#[derive(Debug, Deserialize)]
pub struct ProfileRequest {
    pub username: String,
    pub avatar_url: Option<String>,
}

fn parse_following(raw: &str) -> Vec<UserId> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

// HTTP Handlers

pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Assemble a fresh feed and fold it into the caller's session
#[instrument(skip(state, query), fields(user_id = %viewer.user_id))]
pub async fn get_feed_handler(
    State(state): State<AppState>,
    viewer: Viewer,
    Query(query): Query<FeedQuery>,
) -> AppResult<Json<FeedSnapshot>> {
    let following = match query.following {
        Some(raw) => parse_following(&raw),
        None => state
            .content
            .get_profile(&viewer.user_id)
            .await?
            .map(|profile| profile.following)
            .unwrap_or_default(),
    };

    let fresh = state.assembler.assemble_feed(&viewer.user_id, &following).await?;
    let session = state.session(&viewer.user_id).await;
    state.engagement.reconcile(&session, fresh).await;
    Ok(Json(session.snapshot().await))
}

pub async fn create_post_handler(
    State(state): State<AppState>,
    viewer: Viewer,
    Json(new_post): Json<NewPost>,
) -> AppResult<(StatusCode, Json<Post>)> {
    let post = state.content.create_post(&viewer.user_id, new_post).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn get_post_handler(
    State(state): State<AppState>,
    AxumPath(post_id): AxumPath<String>,
) -> AppResult<Json<Post>> {
    Ok(Json(state.content.get_post(&post_id).await?))
}

pub async fn update_post_handler(
    State(state): State<AppState>,
    viewer: Viewer,
    AxumPath(post_id): AxumPath<String>,
    Json(req): Json<UpdateCaptionRequest>,
) -> AppResult<Json<Post>> {
    let post = state
        .content
        .update_caption(&post_id, &viewer.user_id, &req.caption)
        .await?;
    Ok(Json(post))
}

pub async fn delete_post_handler(
    State(state): State<AppState>,
    viewer: Viewer,
    AxumPath(post_id): AxumPath<String>,
) -> AppResult<StatusCode> {
    let session = state.session(&viewer.user_id).await;
    state
        .engagement
        .delete_post(&session, &post_id, &viewer.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn like_response(state: &AppState, viewer: &Viewer, post_id: &str, liked: bool) -> Json<Value> {
    let session = state.session(&viewer.user_id).await;
    let like_count = session.snapshot().await.post(post_id).map(|p| p.like_count());
    Json(json!({
        "post_id": post_id,
        "liked": liked,
        "like_count": like_count,
    }))
}

pub async fn like_post_handler(
    State(state): State<AppState>,
    viewer: Viewer,
    AxumPath(post_id): AxumPath<String>,
) -> AppResult<Json<Value>> {
    let session = state.session(&viewer.user_id).await;
    state.engagement.like(&session, &post_id, &viewer.user_id).await?;
    Ok(like_response(&state, &viewer, &post_id, true).await)
}

pub async fn unlike_post_handler(
    State(state): State<AppState>,
    viewer: Viewer,
    AxumPath(post_id): AxumPath<String>,
) -> AppResult<Json<Value>> {
    let session = state.session(&viewer.user_id).await;
    state.engagement.unlike(&session, &post_id, &viewer.user_id).await?;
    Ok(like_response(&state, &viewer, &post_id, false).await)
}

pub async fn list_comments_handler(
    State(state): State<AppState>,
    AxumPath(post_id): AxumPath<String>,
    Query(query): Query<CommentsQuery>,
) -> AppResult<Json<Vec<Comment>>> {
    Ok(Json(state.content.list_comments(&post_id, query.limit).await?))
}

pub async fn add_comment_handler(
    State(state): State<AppState>,
    viewer: Viewer,
    AxumPath(post_id): AxumPath<String>,
    Json(req): Json<AddCommentRequest>,
) -> AppResult<(StatusCode, Json<Comment>)> {
    let session = state.session(&viewer.user_id).await;
    let comment = state
        .engagement
        .add_comment(&session, &post_id, &viewer.user_id, &req.text)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn like_comment_handler(
    State(state): State<AppState>,
    viewer: Viewer,
    AxumPath(comment_id): AxumPath<String>,
) -> AppResult<StatusCode> {
    state.engagement.like_comment(&comment_id, &viewer.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unlike_comment_handler(
    State(state): State<AppState>,
    viewer: Viewer,
    AxumPath(comment_id): AxumPath<String>,
) -> AppResult<StatusCode> {
    state.engagement.unlike_comment(&comment_id, &viewer.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Create or rename the caller's profile; follow edges are preserved
pub async fn put_profile_handler(
    State(state): State<AppState>,
    viewer: Viewer,
    Json(req): Json<ProfileRequest>,
) -> AppResult<Json<UserProfile>> {
    let existing = state.content.get_profile(&viewer.user_id).await?;
    let (following, followers) = existing
        .map(|p| (p.following, p.followers))
        .unwrap_or_default();
    let profile = state
        .content
        .upsert_profile(UserProfile {
            id: viewer.user_id.clone(),
            username: req.username,
            avatar_url: req.avatar_url,
            following,
            followers,
        })
        .await?;
    Ok(Json(profile))
}

pub async fn follow_handler(
    State(state): State<AppState>,
    viewer: Viewer,
    AxumPath(user_id): AxumPath<String>,
) -> AppResult<StatusCode> {
    state.content.follow(&viewer.user_id, &user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unfollow_handler(
    State(state): State<AppState>,
    viewer: Viewer,
    AxumPath(user_id): AxumPath<String>,
) -> AppResult<StatusCode> {
    state.content.unfollow(&viewer.user_id, &user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn stats_handler(State(state): State<AppState>) -> Json<EngagementStatsSnapshot> {
    Json(state.engagement.stats().snapshot())
}

pub fn create_feed_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))

        // Feed
        .route("/feed", get(get_feed_handler))

        // Posts
        .route("/posts", post(create_post_handler))
        .route(
            "/posts/{id}",
            get(get_post_handler).patch(update_post_handler).delete(delete_post_handler),
        )
        .route("/posts/{id}/like", post(like_post_handler).delete(unlike_post_handler))

        // Comments
        .route(
            "/posts/{id}/comments",
            get(list_comments_handler).post(add_comment_handler),
        )
        .route(
            "/comments/{id}/like",
            post(like_comment_handler).delete(unlike_comment_handler),
        )

        // Profiles and follow edges
        .route("/profile", put(put_profile_handler))
        .route("/users/{id}/follow", post(follow_handler).delete(unfollow_handler))

        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_following_skips_blanks() {
        assert_eq!(parse_following("a, b,,c ,"), vec!["a", "b", "c"]);
        assert!(parse_following("").is_empty());
    }
}
