use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::config::FeedConfig;
use crate::error::{AppError, AppResult};
use crate::infrastructure::document::{Document, DocumentQuery, FieldFilter};
use crate::infrastructure::traits::DocumentStore;
use crate::models::{fields, Collection, PartialFeedFailure, Post, UserId};

/// Per-chunk results collected by one fan-out
#[derive(Debug, Clone, Default)]
pub struct FanOutOutcome {
    pub chunk_results: Vec<Vec<Post>>,
    pub failed_chunks: usize,
    pub total_chunks: usize,
    pub fallback: bool,
}

impl FanOutOutcome {
    pub fn partial_failure(&self) -> Option<PartialFeedFailure> {
        (self.failed_chunks > 0).then_some(PartialFeedFailure {
            failed_chunks: self.failed_chunks,
            total_chunks: self.total_chunks,
        })
    }
}

/// Decode post documents, skipping any that do not match the post shape
pub fn decode_posts(docs: Vec<Document>) -> Vec<Post> {
    docs.into_iter()
        .filter_map(|doc| match doc.decode::<Post>() {
            Ok(post) => Some(post),
            Err(err) => {
                warn!("Skipping undecodable post document {}: {}", doc.id, err);
                None
            }
        })
        .collect()
}

/// Issues one bounded query per author chunk and waits for all of them.
#[derive(Clone)]
pub struct FanOutExecutor {
    store: Arc<dyn DocumentStore>,
    config: FeedConfig,
}

impl FanOutExecutor {
    pub fn new(store: Arc<dyn DocumentStore>, config: FeedConfig) -> Self {
        Self { store, config }
    }

    pub fn chunk_query(&self, chunk: &[UserId]) -> DocumentQuery {
        DocumentQuery::new(Collection::Posts)
            .filter(FieldFilter::one_of(fields::AUTHOR_ID, chunk.iter().cloned()))
            .order_by_desc(fields::CREATED_AT)
            .limit(self.config.per_chunk_cap)
    }

    pub fn fallback_query(&self) -> DocumentQuery {
        DocumentQuery::new(Collection::Posts)
            .order_by_desc(fields::CREATED_AT)
            .limit(self.config.global_fallback_cap)
    }

    async fn run_query(&self, query: DocumentQuery) -> AppResult<Vec<Post>> {
        match tokio::time::timeout(self.config.query_timeout, self.store.query(&query)).await {
            Ok(result) => Ok(decode_posts(result?)),
            Err(_) => Err(AppError::TransportFailure(format!(
                "query timed out after {:?}",
                self.config.query_timeout
            ))),
        }
    }

    /// Run every chunk query concurrently. Individual failures are absorbed;
    /// only a total failure is an error. No chunks means the global fallback.
    #[instrument(skip(self, chunks), fields(chunks = chunks.len()))]
    pub async fn execute(&self, chunks: &[Vec<UserId>]) -> AppResult<FanOutOutcome> {
        if chunks.is_empty() {
            debug!("No followed authors, using global fallback feed");
            let posts = self
                .run_query(self.fallback_query())
                .await
                .map_err(|err| AppError::FeedUnavailable(format!("fallback query failed: {}", err)))?;
            return Ok(FanOutOutcome {
                chunk_results: vec![posts],
                failed_chunks: 0,
                total_chunks: 1,
                fallback: true,
            });
        }

        let queries = chunks.iter().map(|chunk| self.run_query(self.chunk_query(chunk)));
        let results = join_all(queries).await;

        let total_chunks = results.len();
        let mut outcome = FanOutOutcome {
            total_chunks,
            ..Default::default()
        };
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(posts) => outcome.chunk_results.push(posts),
                Err(err) => {
                    warn!(chunk = index, error = %err, "Chunk query failed, continuing with the rest");
                    outcome.failed_chunks += 1;
                }
            }
        }

        if outcome.failed_chunks == total_chunks {
            return Err(AppError::FeedUnavailable(format!(
                "all {} chunk queries failed",
                total_chunks
            )));
        }
        Ok(outcome)
    }
}
