// Fault-injecting DocumentStore decorator.
// Wraps any store, counts calls, records the write sequence and fails or delays
// selected operations. Used to exercise partial-failure and revert paths.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::infrastructure::document::{Document, DocumentQuery, Fields, WriteOp};
use crate::infrastructure::traits::{DocumentStore, DocumentStream};
use crate::models::Collection;

#[derive(Debug)]
pub struct FaultInjectingStore<S> {
    inner: S,
    queries: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail_all_queries: AtomicBool,
    fail_creates: AtomicBool,
    failing_authors: Mutex<HashSet<String>>,
    failing_writes: Mutex<HashSet<&'static str>>,
    query_delay: Mutex<Option<Duration>>,
    write_delay: Mutex<Option<Duration>>,
    write_log: Mutex<Vec<String>>,
}

struct InFlightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<S: DocumentStore> FaultInjectingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            queries: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            fail_all_queries: AtomicBool::new(false),
            fail_creates: AtomicBool::new(false),
            failing_authors: Mutex::new(HashSet::new()),
            failing_writes: Mutex::new(HashSet::new()),
            query_delay: Mutex::new(None),
            write_delay: Mutex::new(None),
            write_log: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Fail any query whose filters mention `author_id`
    pub async fn fail_queries_for_author(&self, author_id: &str) {
        self.failing_authors.lock().await.insert(author_id.to_string());
    }

    pub fn fail_all_queries(&self, fail: bool) {
        self.fail_all_queries.store(fail, Ordering::SeqCst);
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Fail writes of the given kind (`WriteOp::operation_type`, or `"batch"`)
    pub async fn fail_writes(&self, operation_type: &'static str) {
        self.failing_writes.lock().await.insert(operation_type);
    }

    pub async fn heal_writes(&self) {
        self.failing_writes.lock().await.clear();
    }

    pub async fn set_query_delay(&self, delay: Option<Duration>) {
        *self.query_delay.lock().await = delay;
    }

    pub async fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.lock().await = delay;
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Highest number of queries observed running at the same time
    pub fn max_concurrent_queries(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Successful and failed writes in issue order, e.g. `delete:posts/p1`
    pub async fn write_log(&self) -> Vec<String> {
        self.write_log.lock().await.clone()
    }

    async fn should_fail_query(&self, query: &DocumentQuery) -> bool {
        if self.fail_all_queries.load(Ordering::SeqCst) {
            return true;
        }
        let authors = self.failing_authors.lock().await;
        query.filters.iter().any(|filter| {
            authors
                .iter()
                .any(|author| filter.contains_value(&Value::String(author.clone())))
        })
    }

    async fn check_write(&self, kind: &'static str, label: String) -> AppResult<()> {
        let delay = *self.write_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self.failing_writes.lock().await.contains(kind);
        self.write_log
            .lock()
            .await
            .push(if failing { format!("{} (failed)", label) } else { label });
        if failing {
            debug!("Injected failure for {} write", kind);
            return Err(AppError::TransportFailure(format!("injected {} failure", kind)));
        }
        Ok(())
    }
}

fn describe(op: &WriteOp) -> String {
    format!("{}:{}/{}", op.operation_type(), op.collection(), op.id())
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for FaultInjectingStore<S> {
    fn max_in_filter(&self) -> usize {
        self.inner.max_in_filter()
    }

    async fn query(&self, query: &DocumentQuery) -> AppResult<Vec<Document>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard {
            counter: &self.in_flight,
        };

        let delay = *self.query_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail_query(query).await {
            return Err(AppError::TransportFailure(format!(
                "injected query failure on {}",
                query.collection
            )));
        }
        self.inner.query(query).await
    }

    async fn subscribe(&self, query: DocumentQuery) -> AppResult<DocumentStream> {
        if self.should_fail_query(&query).await {
            return Err(AppError::TransportFailure("injected subscribe failure".to_string()));
        }
        self.inner.subscribe(query).await
    }

    async fn get(&self, collection: Collection, id: &str) -> AppResult<Option<Document>> {
        self.inner.get(collection, id).await
    }

    async fn create(&self, collection: Collection, fields: Fields) -> AppResult<Document> {
        if self.fail_creates.load(Ordering::SeqCst) {
            self.write_log
                .lock()
                .await
                .push(format!("create:{} (failed)", collection));
            return Err(AppError::TransportFailure("injected create failure".to_string()));
        }
        let doc = self.inner.create(collection, fields).await?;
        self.write_log
            .lock()
            .await
            .push(format!("create:{}/{}", collection, doc.id));
        Ok(doc)
    }

    async fn write(&self, op: WriteOp) -> AppResult<()> {
        self.check_write(op.operation_type(), describe(&op)).await?;
        self.inner.write(op).await
    }

    async fn batch(&self, ops: Vec<WriteOp>) -> AppResult<()> {
        let label = format!(
            "batch[{}]",
            ops.iter().map(describe).collect::<Vec<_>>().join(",")
        );
        self.check_write("batch", label).await?;
        self.inner.batch(ops).await
    }
}
