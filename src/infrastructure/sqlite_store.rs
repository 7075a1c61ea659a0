use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    sqlite::{Sqlite, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions},
    QueryBuilder, Row,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::infrastructure::change_feed::{live_query, ChangeFeed};
use crate::infrastructure::document::{
    apply_write, Document, DocumentQuery, FieldFilter, Fields, SortDirection, WriteOp,
};
use crate::infrastructure::traits::{DocumentStore, DocumentStream};
use crate::models::Collection;

/// SQLite implementation of the document store. Documents are JSON bodies in a
/// single table; filters and ordering go through `json_extract`.
#[derive(Debug, Clone)]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
    changes: ChangeFeed,
    max_in_filter: usize,
}

impl SqliteDocumentStore {
    pub async fn connect(url: &str) -> AppResult<Self> {
        let in_memory = url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(url)
            .map_err(|e| AppError::Configuration(format!("invalid sqlite url {}: {}", url, e)))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to :memory: is its own database, so keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .min_connections(if in_memory { 1 } else { 0 })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| AppError::TransportFailure(format!("failed to open {}: {}", url, e)))?;

        let store = Self {
            pool,
            changes: ChangeFeed::default(),
            max_in_filter: 10,
        };
        store.initialize().await?;
        info!("SQLite document store ready at {}", url);
        Ok(store)
    }

    pub async fn new_in_memory() -> AppResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    pub async fn initialize(&self) -> AppResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create documents table")?;
        Ok(())
    }

    /// Apply `ops` in one write transaction on its own task, so a caller that
    /// times out cannot drop the connection between BEGIN and COMMIT.
    async fn apply_batch(&self, ops: Vec<WriteOp>) -> AppResult<Vec<Collection>> {
        let pool = self.pool.clone();
        tokio::spawn(async move { write_transaction(&pool, &ops).await })
            .await
            .map_err(|e| AppError::Internal(format!("write task failed: {}", e)))?
    }
}

/// `BEGIN IMMEDIATE` takes the write lock up front, so concurrent writers wait
/// on the busy timeout instead of failing when a read lock is upgraded.
async fn write_transaction(pool: &SqlitePool, ops: &[WriteOp]) -> AppResult<Vec<Collection>> {
    let mut conn = pool.acquire().await?;
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

    let outcome = match apply_ops(&mut conn, ops).await {
        Ok(touched) => sqlx::query("COMMIT")
            .execute(&mut *conn)
            .await
            .map(|_| touched)
            .map_err(AppError::from),
        Err(err) => Err(err),
    };

    if outcome.is_err() {
        if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
            warn!(error = %rollback, "Rollback failed, dropping connection");
            drop(conn.detach());
        }
    }
    outcome
}

async fn apply_ops(conn: &mut SqliteConnection, ops: &[WriteOp]) -> AppResult<Vec<Collection>> {
    let mut touched: Vec<Collection> = Vec::new();

    for op in ops {
        let collection = op.collection();
        let row = sqlx::query("SELECT body FROM documents WHERE collection = ? AND id = ?")
            .bind(collection.as_str())
            .bind(op.id())
            .fetch_optional(&mut *conn)
            .await?;
        let current = match row {
            Some(row) => {
                let body: String = row.try_get("body")?;
                Some(parse_body(op.id(), &body)?)
            }
            None => None,
        };

        match apply_write(op, current.as_ref())? {
            Some(fields) => {
                sqlx::query(
                    r#"
                    INSERT INTO documents (collection, id, body) VALUES (?, ?, ?)
                    ON CONFLICT(collection, id) DO UPDATE SET body = excluded.body
                    "#,
                )
                .bind(collection.as_str())
                .bind(op.id())
                .bind(serde_json::to_string(&fields)?)
                .execute(&mut *conn)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
                    .bind(collection.as_str())
                    .bind(op.id())
                    .execute(&mut *conn)
                    .await?;
            }
        }

        if !touched.contains(&collection) {
            touched.push(collection);
        }
    }

    Ok(touched)
}

fn json_path(field: &str) -> String {
    format!("$.{}", field)
}

fn push_value(builder: &mut QueryBuilder<'_, Sqlite>, value: &Value) -> AppResult<()> {
    match value {
        Value::String(s) => {
            builder.push_bind(s.clone());
        }
        Value::Bool(b) => {
            builder.push_bind(i64::from(*b));
        }
        Value::Number(n) => match n.as_i64() {
            Some(i) => {
                builder.push_bind(i);
            }
            None => {
                builder.push_bind(n.as_f64().unwrap_or_default());
            }
        },
        other => {
            return Err(AppError::InvalidQuery(format!(
                "unsupported filter value: {}",
                other
            )))
        }
    }
    Ok(())
}

fn parse_body(id: &str, body: &str) -> AppResult<Fields> {
    serde_json::from_str(body)
        .map_err(|e| AppError::Serialization(format!("corrupt document {}: {}", id, e)))
}

async fn run_query(pool: &SqlitePool, query: &DocumentQuery) -> AppResult<Vec<Document>> {
    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT id, body FROM documents WHERE collection = ");
    builder.push_bind(query.collection.as_str());

    for filter in &query.filters {
        builder.push(" AND json_extract(body, ");
        builder.push_bind(json_path(filter.field()));
        match filter {
            FieldFilter::Eq { value, .. } => {
                builder.push(") = ");
                push_value(&mut builder, value)?;
            }
            FieldFilter::In { values, .. } => {
                builder.push(") IN (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        builder.push(", ");
                    }
                    push_value(&mut builder, value)?;
                }
                builder.push(")");
            }
        }
    }

    match &query.order_by {
        Some(order) => {
            let direction = match order.direction {
                SortDirection::Ascending => "ASC",
                SortDirection::Descending => "DESC",
            };
            builder.push(" ORDER BY json_extract(body, ");
            builder.push_bind(json_path(&order.field));
            builder.push(format!(") {}, id {}", direction, direction));
        }
        None => {
            builder.push(" ORDER BY id ASC");
        }
    }

    if let Some(limit) = query.limit {
        builder.push(" LIMIT ");
        builder.push_bind(limit as i64);
    }

    let rows = builder.build().fetch_all(pool).await?;
    rows.into_iter()
        .map(|row| -> AppResult<Document> {
            let id: String = row.try_get("id").context("document row without id")?;
            let body: String = row.try_get("body").context("document row without body")?;
            let fields = parse_body(&id, &body)?;
            Ok(Document::new(id, fields))
        })
        .collect()
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    fn max_in_filter(&self) -> usize {
        self.max_in_filter
    }

    #[instrument(skip(self), fields(collection = %query.collection))]
    async fn query(&self, query: &DocumentQuery) -> AppResult<Vec<Document>> {
        query.validate(self.max_in_filter)?;
        run_query(&self.pool, query).await
    }

    async fn subscribe(&self, query: DocumentQuery) -> AppResult<DocumentStream> {
        query.validate(self.max_in_filter)?;
        let receiver = self.changes.subscribe();
        let pool = self.pool.clone();
        Ok(live_query(receiver, query, move |q| {
            let pool = pool.clone();
            async move { run_query(&pool, &q).await }
        }))
    }

    async fn get(&self, collection: Collection, id: &str) -> AppResult<Option<Document>> {
        let row = sqlx::query("SELECT body FROM documents WHERE collection = ? AND id = ?")
            .bind(collection.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let body: String = row.try_get("body")?;
                Ok(Some(Document::new(id, parse_body(id, &body)?)))
            }
            None => Ok(None),
        }
    }

    async fn create(&self, collection: Collection, fields: Fields) -> AppResult<Document> {
        let id = Uuid::new_v4().to_string();
        let body = serde_json::to_string(&fields)?;
        sqlx::query("INSERT INTO documents (collection, id, body) VALUES (?, ?, ?)")
            .bind(collection.as_str())
            .bind(&id)
            .bind(body)
            .execute(&self.pool)
            .await?;
        self.changes.publish(collection);
        Ok(Document::new(id, fields))
    }

    async fn write(&self, op: WriteOp) -> AppResult<()> {
        self.batch(vec![op]).await
    }

    async fn batch(&self, ops: Vec<WriteOp>) -> AppResult<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let touched = self.apply_batch(ops).await?;
        for collection in touched {
            self.changes.publish(collection);
        }
        Ok(())
    }
}
