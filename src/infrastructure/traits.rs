use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::AppResult;
use crate::infrastructure::document::{Document, DocumentQuery, Fields, WriteOp};
use crate::models::{Collection, NotificationEvent};

/// Live query results: the initial result set, then one item per change.
pub type DocumentStream = BoxStream<'static, AppResult<Vec<Document>>>;

/// Document backend with bounded set filters and live queries.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Declared maximum number of values in a single `In` filter
    fn max_in_filter(&self) -> usize;

    async fn query(&self, query: &DocumentQuery) -> AppResult<Vec<Document>>;
    async fn subscribe(&self, query: DocumentQuery) -> AppResult<DocumentStream>;
    async fn get(&self, collection: Collection, id: &str) -> AppResult<Option<Document>>;
    /// Insert a document under a store-assigned id
    async fn create(&self, collection: Collection, fields: Fields) -> AppResult<Document>;
    async fn write(&self, op: WriteOp) -> AppResult<()>;
    /// All-or-nothing execution of several writes
    async fn batch(&self, ops: Vec<WriteOp>) -> AppResult<()>;

    async fn set(&self, collection: Collection, id: &str, fields: Fields, merge: bool) -> AppResult<()> {
        self.write(WriteOp::Set {
            collection,
            id: id.to_string(),
            fields,
            merge,
        })
        .await
    }

    async fn array_add(&self, collection: Collection, id: &str, field: &str, value: Value) -> AppResult<()> {
        self.write(WriteOp::ArrayAdd {
            collection,
            id: id.to_string(),
            field: field.to_string(),
            value,
        })
        .await
    }

    async fn array_remove(&self, collection: Collection, id: &str, field: &str, value: Value) -> AppResult<()> {
        self.write(WriteOp::ArrayRemove {
            collection,
            id: id.to_string(),
            field: field.to_string(),
            value,
        })
        .await
    }

    async fn increment(&self, collection: Collection, id: &str, field: &str, delta: i64) -> AppResult<()> {
        self.write(WriteOp::Increment {
            collection,
            id: id.to_string(),
            field: field.to_string(),
            delta,
        })
        .await
    }

    async fn delete(&self, collection: Collection, id: &str) -> AppResult<()> {
        self.write(WriteOp::Delete {
            collection,
            id: id.to_string(),
        })
        .await
    }
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store a blob and return the URL it can be fetched from
    async fn put(&self, path: &str, bytes: Vec<u8>) -> AppResult<String>;
    async fn delete_by_url(&self, url: &str) -> AppResult<()>;
}

/// Fire-and-forget delivery of user notifications
pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, target_user: &str, event: NotificationEvent);
}
