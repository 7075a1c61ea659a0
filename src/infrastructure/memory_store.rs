// In-process document store. Backs the default server configuration and the
// test suite; semantics match the SQLite store.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::AppResult;
use crate::infrastructure::change_feed::{live_query, ChangeFeed};
use crate::infrastructure::document::{apply_write, Document, DocumentQuery, Fields, WriteOp};
use crate::infrastructure::traits::{DocumentStore, DocumentStream};
use crate::models::Collection;

type Tables = HashMap<Collection, BTreeMap<String, Fields>>;

#[derive(Debug)]
struct Inner {
    tables: RwLock<Tables>,
    max_in_filter: usize,
}

impl Inner {
    async fn run_query(&self, query: &DocumentQuery) -> Vec<Document> {
        let tables = self.tables.read().await;
        match tables.get(&query.collection) {
            Some(table) => {
                let docs: Vec<Document> = table
                    .iter()
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect();
                query.evaluate(&docs)
            }
            None => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryDocumentStore {
    inner: Arc<Inner>,
    changes: ChangeFeed,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::with_in_filter_limit(10)
    }

    pub fn with_in_filter_limit(max_in_filter: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(HashMap::new()),
                max_in_filter,
            }),
            changes: ChangeFeed::default(),
        }
    }

    /// Insert a document under a caller-chosen id, replacing any previous one
    pub async fn insert(&self, collection: Collection, id: &str, fields: Fields) {
        {
            let mut tables = self.inner.tables.write().await;
            tables
                .entry(collection)
                .or_default()
                .insert(id.to_string(), fields);
        }
        self.changes.publish(collection);
    }

    pub async fn count(&self, collection: Collection) -> usize {
        let tables = self.inner.tables.read().await;
        tables.get(&collection).map(|t| t.len()).unwrap_or(0)
    }

    /// Number of live queries currently attached to this store
    pub fn live_subscribers(&self) -> usize {
        self.changes.subscriber_count()
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn max_in_filter(&self) -> usize {
        self.inner.max_in_filter
    }

    #[instrument(skip(self), fields(collection = %query.collection))]
    async fn query(&self, query: &DocumentQuery) -> AppResult<Vec<Document>> {
        query.validate(self.inner.max_in_filter)?;
        Ok(self.inner.run_query(query).await)
    }

    async fn subscribe(&self, query: DocumentQuery) -> AppResult<DocumentStream> {
        query.validate(self.inner.max_in_filter)?;
        let receiver = self.changes.subscribe();
        let inner = self.inner.clone();
        Ok(live_query(receiver, query, move |q| {
            let inner = inner.clone();
            async move { Ok(inner.run_query(&q).await) }
        }))
    }

    async fn get(&self, collection: Collection, id: &str) -> AppResult<Option<Document>> {
        let tables = self.inner.tables.read().await;
        Ok(tables
            .get(&collection)
            .and_then(|t| t.get(id))
            .map(|fields| Document::new(id, fields.clone())))
    }

    async fn create(&self, collection: Collection, fields: Fields) -> AppResult<Document> {
        let id = Uuid::new_v4().to_string();
        self.insert(collection, &id, fields.clone()).await;
        debug!("Created {}/{}", collection, id);
        Ok(Document::new(id, fields))
    }

    async fn write(&self, op: WriteOp) -> AppResult<()> {
        self.batch(vec![op]).await
    }

    async fn batch(&self, ops: Vec<WriteOp>) -> AppResult<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut touched = Vec::new();
        {
            let mut tables = self.inner.tables.write().await;

            // Stage every op against a copy of the affected rows, then commit.
            let mut staged: HashMap<(Collection, String), Option<Fields>> = HashMap::new();
            for op in &ops {
                let key = (op.collection(), op.id().to_string());
                let current = match staged.get(&key) {
                    Some(state) => state.clone(),
                    None => tables.get(&key.0).and_then(|t| t.get(&key.1)).cloned(),
                };
                let next = apply_write(op, current.as_ref())?;
                staged.insert(key, next);
            }

            for ((collection, id), state) in staged {
                let table = tables.entry(collection).or_default();
                match state {
                    Some(fields) => {
                        table.insert(id, fields);
                    }
                    None => {
                        table.remove(&id);
                    }
                }
                if !touched.contains(&collection) {
                    touched.push(collection);
                }
            }
        }

        for collection in touched {
            self.changes.publish(collection);
        }
        Ok(())
    }
}
