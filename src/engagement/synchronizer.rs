use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::FeedConfig;
use crate::content::{extract_mentions, ContentService};
use crate::engagement::session::FeedSession;
use crate::engagement::sync_state::SyncState;
use crate::error::{AppError, AppResult};
use crate::infrastructure::document::{encode_fields, DocumentQuery, Fields, FieldFilter, WriteOp};
use crate::infrastructure::traits::{DocumentStore, NotificationDispatcher, ObjectStorage};
use crate::models::{
    fields, now_millis, Collection, Comment, FeedSnapshot, NotificationEvent, Post, UserId,
};

/// Counters for engagement writes
#[derive(Debug, Default)]
pub struct EngagementStats {
    writes_issued: AtomicU64,
    writes_coalesced: AtomicU64,
    reverts: AtomicU64,
    comment_count_drift: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngagementStatsSnapshot {
    pub writes_issued: u64,
    pub writes_coalesced: u64,
    pub reverts: u64,
    pub comment_count_drift: u64,
}

impl EngagementStats {
    /// Comments whose post counter increment failed and was never applied
    pub fn comment_count_drift(&self) -> u64 {
        self.comment_count_drift.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> EngagementStatsSnapshot {
        EngagementStatsSnapshot {
            writes_issued: self.writes_issued.load(Ordering::Relaxed),
            writes_coalesced: self.writes_coalesced.load(Ordering::Relaxed),
            reverts: self.reverts.load(Ordering::Relaxed),
            comment_count_drift: self.comment_count_drift(),
        }
    }
}

/// Optimistic engagement against a caller-owned [`FeedSession`].
///
/// The session lock is taken around local mutations only, never across a store
/// call, so concurrent operations on one session interleave freely and are
/// ordered by the per-relation generation.
#[derive(Clone)]
pub struct EngagementSynchronizer {
    store: Arc<dyn DocumentStore>,
    objects: Arc<dyn ObjectStorage>,
    notifier: Arc<dyn NotificationDispatcher>,
    content: ContentService,
    config: FeedConfig,
    stats: Arc<EngagementStats>,
}

impl EngagementSynchronizer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        objects: Arc<dyn ObjectStorage>,
        notifier: Arc<dyn NotificationDispatcher>,
        config: FeedConfig,
    ) -> Self {
        let content = ContentService::new(store.clone(), objects.clone());
        Self {
            store,
            objects,
            notifier,
            content,
            config,
            stats: Arc::new(EngagementStats::default()),
        }
    }

    pub fn stats(&self) -> &EngagementStats {
        &self.stats
    }

    async fn timed<T, F>(&self, operation: &str, write: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        match tokio::time::timeout(self.config.write_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(AppError::TransportFailure(format!(
                "{} timed out after {:?}",
                operation, self.config.write_timeout
            ))),
        }
    }

    #[instrument(skip(self, session))]
    pub async fn like(&self, session: &FeedSession, post_id: &str, user_id: &str) -> AppResult<()> {
        self.set_like(session, post_id, user_id, true).await
    }

    #[instrument(skip(self, session))]
    pub async fn unlike(&self, session: &FeedSession, post_id: &str, user_id: &str) -> AppResult<()> {
        self.set_like(session, post_id, user_id, false).await
    }

    async fn set_like(&self, session: &FeedSession, post_id: &str, user_id: &str, liked: bool) -> AppResult<()> {
        let key = (post_id.to_string(), user_id.to_string());

        let (generation, author_id) = {
            let mut guard = session.lock().await;
            let state = &mut *guard;
            let local = state.snapshot.post(post_id);
            let locally_liked = local.map(|p| p.is_liked_by(user_id));
            let author_id = local.map(|p| p.author_id.clone());

            let pending = state.likes.get(&key).and_then(|r| r.pending_target());
            if pending.is_none() && locally_liked == Some(liked) {
                debug!("Like relation already in requested state");
                return Ok(());
            }
            let relation = state.likes.entry(key.clone()).or_default();
            let Some(generation) = relation.begin(liked, locally_liked.unwrap_or(!liked)) else {
                self.stats.writes_coalesced.fetch_add(1, Ordering::Relaxed);
                debug!("Coalesced into in-flight like write");
                return Ok(());
            };
            if let Some(post) = state.snapshot.post_mut(post_id) {
                apply_like(post, user_id, liked);
            }
            (generation, author_id)
        };

        self.stats.writes_issued.fetch_add(1, Ordering::Relaxed);
        let value = json!(user_id);
        let result = if liked {
            self.timed("like", self.store.array_add(Collection::Posts, post_id, fields::LIKES, value))
                .await
        } else {
            self.timed("unlike", self.store.array_remove(Collection::Posts, post_id, fields::LIKES, value))
                .await
        };

        let latest = {
            let mut guard = session.lock().await;
            let state = &mut *guard;
            let accepted = result.as_ref().ok().map(|_| liked);
            let Some(relation) = state.likes.get_mut(&key) else {
                return finish_like(result, post_id, user_id, liked);
            };
            let latest = relation.settle(generation, accepted);
            let confirmed = relation.confirmed();
            if latest {
                state.likes.remove(&key);
                if result.is_err() {
                    if let Some(post) = state.snapshot.post_mut(post_id) {
                        apply_like(post, user_id, confirmed);
                    }
                }
            }
            latest
        };

        match result {
            Ok(()) => {
                if liked && latest {
                    self.notify_author(post_id, author_id, user_id, NotificationEvent::PostLiked {
                        post_id: post_id.to_string(),
                        actor_id: user_id.to_string(),
                    });
                }
                Ok(())
            }
            Err(err) => {
                if latest {
                    self.stats.reverts.fetch_add(1, Ordering::Relaxed);
                }
                warn!(error = %err, reverted = latest, "Like write failed");
                finish_like(Err(err), post_id, user_id, liked)
            }
        }
    }

    /// Comment likes are not part of the feed snapshot; the set write is idempotent.
    #[instrument(skip(self))]
    pub async fn like_comment(&self, comment_id: &str, user_id: &str) -> AppResult<()> {
        self.timed(
            "like_comment",
            self.store
                .array_add(Collection::Comments, comment_id, fields::LIKES, json!(user_id)),
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn unlike_comment(&self, comment_id: &str, user_id: &str) -> AppResult<()> {
        self.timed(
            "unlike_comment",
            self.store
                .array_remove(Collection::Comments, comment_id, fields::LIKES, json!(user_id)),
        )
        .await
    }

    /// Create the comment, then bump the post's counter. A failed increment
    /// leaves the comment in place and the stored count one short.
    #[instrument(skip(self, session, text))]
    pub async fn add_comment(
        &self,
        session: &FeedSession,
        post_id: &str,
        author_id: &str,
        text: &str,
    ) -> AppResult<Comment> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::Validation("comment text must not be empty".to_string()));
        }

        let post = self.content.get_post(post_id).await?;
        let profile = match self.content.get_profile(author_id).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!(error = %err, "Could not load commenter profile, leaving author fields empty");
                None
            }
        };

        let mut comment = Comment {
            id: String::new(),
            post_id: post_id.to_string(),
            author_id: author_id.to_string(),
            author_username: profile.as_ref().map(|p| p.username.clone()).unwrap_or_default(),
            author_avatar_url: profile.and_then(|p| p.avatar_url),
            text: text.to_string(),
            likes: Default::default(),
            created_at: now_millis(),
            updated_at: None,
        };
        let created = self
            .timed("create_comment", self.store.create(Collection::Comments, encode_fields(&comment)?))
            .await?;
        comment.id = created.id;

        {
            let mut guard = session.lock().await;
            let state = &mut *guard;
            state.comment_counts.entry(post_id.to_string()).or_default().begin();
            if let Some(local) = state.snapshot.post_mut(post_id) {
                local.comment_count += 1;
            }
        }

        let increment = self
            .timed(
                "increment_comment_count",
                self.store.increment(Collection::Posts, post_id, fields::COMMENT_COUNT, 1),
            )
            .await;

        {
            let mut guard = session.lock().await;
            let state = &mut *guard;
            if let Some(count) = state.comment_counts.get_mut(post_id) {
                count.finish();
                if count.state() == SyncState::Synced {
                    state.comment_counts.remove(post_id);
                }
            }
            if increment.is_err() {
                if let Some(local) = state.snapshot.post_mut(post_id) {
                    local.comment_count = local.comment_count.saturating_sub(1);
                }
            }
        }

        if let Err(err) = increment {
            self.stats.comment_count_drift.fetch_add(1, Ordering::Relaxed);
            warn!(
                comment_id = %comment.id,
                error = %err,
                "Comment created but comment_count increment failed; stored count is one short"
            );
        }

        self.notify_author(post_id, Some(post.author_id.clone()), author_id, NotificationEvent::PostCommented {
            post_id: post_id.to_string(),
            comment_id: comment.id.clone(),
            actor_id: author_id.to_string(),
        });
        self.notify_mentions(&comment);

        info!(comment_id = %comment.id, "Added comment");
        Ok(comment)
    }

    /// Recount a post's comments and overwrite `comment_count`
    #[instrument(skip(self))]
    pub async fn repair_comment_count(&self, post_id: &str) -> AppResult<u64> {
        self.content.get_post(post_id).await?;
        let comments = self.store.query(&comments_of(post_id)).await?;
        let count = comments.len() as u64;

        let mut update = Fields::new();
        update.insert(fields::COMMENT_COUNT.to_string(), json!(count));
        self.timed("repair_comment_count", self.store.set(Collection::Posts, post_id, update, true))
            .await?;

        info!(count, "Repaired comment count");
        Ok(count)
    }

    /// Owner-only cascading delete: comments, then the post, then its image.
    #[instrument(skip(self, session))]
    pub async fn delete_post(&self, session: &FeedSession, post_id: &str, requester_id: &str) -> AppResult<()> {
        let post = self.content.get_post(post_id).await?;
        if post.author_id != requester_id {
            return Err(AppError::Forbidden(format!(
                "user {} does not own post {}",
                requester_id, post_id
            )));
        }

        let comment_deletes: Vec<WriteOp> = self
            .store
            .query(&comments_of(post_id))
            .await?
            .into_iter()
            .map(|doc| WriteOp::Delete {
                collection: Collection::Comments,
                id: doc.id,
            })
            .collect();
        let comments = comment_deletes.len();
        if !comment_deletes.is_empty() {
            self.timed("delete_comments", self.store.batch(comment_deletes)).await?;
        }

        self.timed("delete_post", self.store.delete(Collection::Posts, post_id))
            .await?;

        if let Some(url) = &post.image_url {
            if let Err(err) = self.objects.delete_by_url(url).await {
                warn!(url = %url, error = %err, "Image delete failed, blob left orphaned");
            }
        }

        {
            let mut guard = session.lock().await;
            let state = &mut *guard;
            state.snapshot.remove_post(post_id);
            state.likes.retain(|(post, _), _| post != post_id);
            state.comment_counts.remove(post_id);
        }

        info!(comments, "Deleted post");
        Ok(())
    }

    /// Adopt a server-delivered feed, keeping pending optimistic values.
    pub async fn reconcile(&self, session: &FeedSession, server_feed: FeedSnapshot) {
        session.reconcile(server_feed).await;
    }

    fn notify_author(&self, post_id: &str, author_id: Option<UserId>, actor_id: &str, event: NotificationEvent) {
        match author_id {
            Some(author_id) => {
                if author_id != actor_id {
                    self.notifier.dispatch(&author_id, event);
                }
            }
            None => {
                // Post not in the session snapshot; look the author up off the call path.
                let content = self.content.clone();
                let notifier = self.notifier.clone();
                let post_id = post_id.to_string();
                let actor_id = actor_id.to_string();
                tokio::spawn(async move {
                    match content.get_post(&post_id).await {
                        Ok(post) if post.author_id != actor_id => notifier.dispatch(&post.author_id, event),
                        Ok(_) => {}
                        Err(err) => debug!(error = %err, "Skipping notification for unreadable post"),
                    }
                });
            }
        }
    }

    fn notify_mentions(&self, comment: &Comment) {
        let mentions = extract_mentions(&comment.text);
        if mentions.is_empty() {
            return;
        }

        let content = self.content.clone();
        let notifier = self.notifier.clone();
        let comment = comment.clone();
        tokio::spawn(async move {
            let profiles = match content.resolve_usernames(&mentions).await {
                Ok(profiles) => profiles,
                Err(err) => {
                    warn!(error = %err, "Could not resolve mentions");
                    return;
                }
            };
            for profile in profiles.into_iter().filter(|p| p.id != comment.author_id) {
                notifier.dispatch(&profile.id, NotificationEvent::Mentioned {
                    post_id: comment.post_id.clone(),
                    comment_id: comment.id.clone(),
                    actor_id: comment.author_id.clone(),
                });
            }
        });
    }
}

fn finish_like(result: AppResult<()>, post_id: &str, user_id: &str, liked: bool) -> AppResult<()> {
    result.map_err(|err| match err {
        AppError::EntityNotFound(msg) => AppError::EntityNotFound(msg),
        other => AppError::OptimisticWriteFailed(format!(
            "{} of post {} by {} failed: {}",
            if liked { "like" } else { "unlike" },
            post_id,
            user_id,
            other
        )),
    })
}

fn apply_like(post: &mut Post, user_id: &str, liked: bool) {
    if liked {
        post.likes.insert(user_id.to_string());
    } else {
        post.likes.remove(user_id);
    }
}

fn comments_of(post_id: &str) -> DocumentQuery {
    DocumentQuery::new(Collection::Comments).filter(FieldFilter::eq(fields::POST_ID, post_id))
}
