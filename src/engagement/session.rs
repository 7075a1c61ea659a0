use std::collections::HashMap;
use tokio::sync::{Mutex, MutexGuard};

use crate::engagement::sync_state::{CountSync, RelationSync, SyncState};
use crate::models::{FeedSnapshot, PostId, UserId};

pub(crate) struct SessionState {
    pub(crate) snapshot: FeedSnapshot,
    pub(crate) likes: HashMap<(PostId, UserId), RelationSync>,
    pub(crate) comment_counts: HashMap<PostId, CountSync>,
}

impl SessionState {
    /// Adopt a server-side feed while keeping in-flight optimistic changes visible.
    fn reconcile(&mut self, mut server: FeedSnapshot) {
        for ((post_id, user_id), relation) in &self.likes {
            let (Some(liked), Some(post)) = (relation.pending_target(), server.post_mut(post_id)) else {
                continue;
            };
            if liked {
                post.likes.insert(user_id.clone());
            } else {
                post.likes.remove(user_id);
            }
        }
        for (post_id, count) in &self.comment_counts {
            if let Some(post) = server.post_mut(post_id) {
                post.comment_count += count.pending();
            }
        }
        self.snapshot = server;
    }
}

/// A caller's feed snapshot plus the sync state of every relation it touched.
///
/// Sessions are owned by the caller and passed explicitly to the synchronizer;
/// nothing in the engine keeps a "current feed".
pub struct FeedSession {
    principal_id: UserId,
    state: Mutex<SessionState>,
}

impl FeedSession {
    pub fn new(snapshot: FeedSnapshot) -> Self {
        Self {
            principal_id: snapshot.principal_id.clone(),
            state: Mutex::new(SessionState {
                snapshot,
                likes: HashMap::new(),
                comment_counts: HashMap::new(),
            }),
        }
    }

    pub fn empty(principal_id: impl Into<UserId>) -> Self {
        Self::new(FeedSnapshot::empty(principal_id))
    }

    pub fn principal_id(&self) -> &str {
        &self.principal_id
    }

    pub async fn snapshot(&self) -> FeedSnapshot {
        self.state.lock().await.snapshot.clone()
    }

    /// Replace the snapshot with a freshly assembled or live-delivered feed
    pub async fn reconcile(&self, server: FeedSnapshot) {
        self.state.lock().await.reconcile(server);
    }

    pub async fn like_state(&self, post_id: &str, user_id: &str) -> SyncState {
        let state = self.state.lock().await;
        state
            .likes
            .get(&(post_id.to_string(), user_id.to_string()))
            .map(|r| r.state())
            .unwrap_or_default()
    }

    pub async fn comment_count_state(&self, post_id: &str) -> SyncState {
        let state = self.state.lock().await;
        state
            .comment_counts
            .get(post_id)
            .map(|c| c.state())
            .unwrap_or_default()
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }
}
