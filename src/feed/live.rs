// Live feed: one standing subscription per author chunk, re-merged on change.

use chrono::Utc;
use futures::{stream::select_all, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::feed::assembler::FeedAssembler;
use crate::feed::fan_out::decode_posts;
use crate::feed::merger::merge_feeds;
use crate::infrastructure::traits::DocumentStore;
use crate::models::{FeedSnapshot, PartialFeedFailure, Post, UserId};

/// Stream of merged feed snapshots.
///
/// Dropping or closing the subscription aborts the background task, which
/// releases every per-chunk store subscription. Nothing is yielded after
/// `close`, including snapshots that were already buffered.
pub struct FeedSubscription {
    receiver: mpsc::Receiver<FeedSnapshot>,
    task: Option<JoinHandle<()>>,
    closed: bool,
}

impl FeedSubscription {
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.receiver.close();
        debug!("Feed subscription closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Stream for FeedSubscription {
    type Item = FeedSnapshot;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(None);
        }
        this.receiver.poll_recv(cx)
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Clone)]
pub struct LiveFeedSubscriber {
    store: Arc<dyn DocumentStore>,
    assembler: FeedAssembler,
}

impl LiveFeedSubscriber {
    pub fn new(store: Arc<dyn DocumentStore>, assembler: FeedAssembler) -> Self {
        Self { store, assembler }
    }

    /// Open one live query per chunk (or the global fallback query) and emit a
    /// merged feed whenever any of them changes.
    #[instrument(skip(self, following), fields(following = following.len()))]
    pub async fn subscribe_feed(&self, principal_id: &str, following: &[UserId]) -> AppResult<FeedSubscription> {
        let chunks = self.assembler.plan(principal_id, following);
        let executor = self.assembler.executor();
        let fallback = chunks.is_empty();
        let queries = if fallback {
            vec![executor.fallback_query()]
        } else {
            chunks.iter().map(|chunk| executor.chunk_query(chunk)).collect()
        };

        let total = queries.len();
        let mut streams = Vec::with_capacity(total);
        let mut failed_to_open = vec![false; total];
        for (index, query) in queries.into_iter().enumerate() {
            match self.store.subscribe(query).await {
                Ok(stream) => streams.push(stream.map(move |item| (index, item)).boxed()),
                Err(err) => {
                    warn!(chunk = index, error = %err, "Could not open chunk subscription");
                    failed_to_open[index] = true;
                }
            }
        }
        if streams.is_empty() {
            return Err(AppError::FeedUnavailable(format!(
                "all {} chunk subscriptions failed",
                total
            )));
        }

        let (sender, receiver) = mpsc::channel(16);
        let feed_cap = self.assembler.config().feed_cap;
        let principal_id = principal_id.to_string();

        let task = tokio::spawn(async move {
            let mut merged_streams = select_all(streams);
            let mut latest: Vec<Option<Vec<Post>>> = vec![None; total];
            let mut failing = failed_to_open;

            while let Some((index, item)) = merged_streams.next().await {
                match item {
                    Ok(docs) => {
                        latest[index] = Some(decode_posts(docs));
                        failing[index] = false;
                    }
                    Err(err) => {
                        warn!(chunk = index, error = %err, "Chunk subscription delivered an error");
                        failing[index] = true;
                    }
                }

                // Hold the first emission until every chunk has reported once.
                let waiting = (0..total).any(|i| latest[i].is_none() && !failing[i]);
                if waiting || latest.iter().all(Option::is_none) {
                    continue;
                }

                let failed_chunks = failing.iter().filter(|f| **f).count();
                let lists: Vec<Vec<Post>> = latest.iter().flatten().cloned().collect();
                let snapshot = FeedSnapshot {
                    principal_id: principal_id.clone(),
                    posts: merge_feeds(lists, feed_cap),
                    partial_failure: (failed_chunks > 0).then_some(PartialFeedFailure {
                        failed_chunks,
                        total_chunks: total,
                    }),
                    fallback,
                    assembled_at: Utc::now(),
                };

                if sender.send(snapshot).await.is_err() {
                    break;
                }
            }
            debug!("Live feed task finished");
        });

        info!(chunks = total, fallback, "Opened live feed subscription");
        Ok(FeedSubscription {
            receiver,
            task: Some(task),
            closed: false,
        })
    }
}
