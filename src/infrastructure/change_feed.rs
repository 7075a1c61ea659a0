// Change notifications shared by the document stores.
// Writers publish the collection they touched; live queries re-run on every
// publish for their collection and only emit when the result set differs.

use futures::{stream, StreamExt};
use std::future::Future;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use crate::error::AppResult;
use crate::infrastructure::document::{Document, DocumentQuery};
use crate::infrastructure::traits::DocumentStream;
use crate::models::Collection;

#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<Collection>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, collection: Collection) {
        // No receivers simply means nobody is subscribed.
        let _ = self.sender.send(collection);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Collection> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(1024)
    }
}

struct LiveQueryState<F> {
    receiver: broadcast::Receiver<Collection>,
    query: DocumentQuery,
    run: F,
    started: bool,
    last: Option<Vec<Document>>,
}

/// Turn a one-shot query runner into a live query over `receiver`.
///
/// The receiver must be taken before the initial query runs so no change
/// published in between is missed.
pub fn live_query<F, Fut>(
    receiver: broadcast::Receiver<Collection>,
    query: DocumentQuery,
    run: F,
) -> DocumentStream
where
    F: Fn(DocumentQuery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<Vec<Document>>> + Send + 'static,
{
    let state = LiveQueryState {
        receiver,
        query,
        run,
        started: false,
        last: None,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.started {
                match state.receiver.recv().await {
                    Ok(collection) if collection != state.query.collection => continue,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Live query lagged by {} changes, re-running", skipped);
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
            state.started = true;

            match (state.run)(state.query.clone()).await {
                Ok(docs) => {
                    if state.last.as_ref() == Some(&docs) {
                        continue;
                    }
                    state.last = Some(docs.clone());
                    return Some((Ok(docs), state));
                }
                Err(err) => return Some((Err(err), state)),
            }
        }
    })
    .boxed()
}
