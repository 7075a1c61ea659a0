use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::config::FeedConfig;
use crate::error::AppResult;
use crate::feed::chunker::chunk_authors;
use crate::feed::fan_out::FanOutExecutor;
use crate::feed::merger::merge_feeds;
use crate::infrastructure::traits::DocumentStore;
use crate::models::{FeedSnapshot, UserId};

/// Chunker → fan-out → merger.
#[derive(Clone)]
pub struct FeedAssembler {
    store: Arc<dyn DocumentStore>,
    executor: FanOutExecutor,
    config: FeedConfig,
}

impl FeedAssembler {
    pub fn new(store: Arc<dyn DocumentStore>, config: FeedConfig) -> Self {
        let executor = FanOutExecutor::new(store.clone(), config.clone());
        Self {
            store,
            executor,
            config,
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn executor(&self) -> &FanOutExecutor {
        &self.executor
    }

    /// Chunk size actually used: the configured size, capped by the store's limit
    pub fn max_chunk(&self) -> usize {
        self.config.max_chunk.min(self.store.max_in_filter()).max(1)
    }

    pub fn plan(&self, principal_id: &str, following: &[UserId]) -> Vec<Vec<UserId>> {
        chunk_authors(principal_id, following, self.max_chunk())
    }

    /// Build a fresh feed for `principal_id`. Returns `FeedUnavailable` only when
    /// every backend query failed; partial failures are flagged on the snapshot.
    #[instrument(skip(self, following), fields(following = following.len()))]
    pub async fn assemble_feed(&self, principal_id: &str, following: &[UserId]) -> AppResult<FeedSnapshot> {
        let chunks = self.plan(principal_id, following);
        let outcome = self.executor.execute(&chunks).await?;
        let partial_failure = outcome.partial_failure();
        let posts = merge_feeds(outcome.chunk_results, self.config.feed_cap);

        info!(
            posts = posts.len(),
            chunks = outcome.total_chunks,
            failed_chunks = outcome.failed_chunks,
            fallback = outcome.fallback,
            "Assembled feed"
        );

        Ok(FeedSnapshot {
            principal_id: principal_id.to_string(),
            posts,
            partial_failure,
            fallback: outcome.fallback,
            assembled_at: Utc::now(),
        })
    }
}
