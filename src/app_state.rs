use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::Config;
use crate::content::ContentService;
use crate::engagement::{EngagementSynchronizer, FeedSession};
use crate::error::AppResult;
use crate::feed::{FeedAssembler, LiveFeedSubscriber};
use crate::infrastructure::{
    Cache, DocumentStore, MemoryDocumentStore, MemoryObjectStorage, NotificationDispatcher, ObjectStorage,
    SqliteDocumentStore,
};
use crate::models::UserId;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub assembler: FeedAssembler,
    pub live: LiveFeedSubscriber,
    pub engagement: EngagementSynchronizer,
    pub content: ContentService,
    /// One feed session per principal, least recently used evicted first
    pub sessions: Arc<Mutex<Cache<UserId, Arc<FeedSession>>>>,
    pub config: Config,
}

impl AppState {
    /// Open the configured store and wire every service on top of it
    pub async fn new(config: Config, notifier: Arc<dyn NotificationDispatcher>) -> AppResult<Self> {
        config.feed.validate()?;
        let store: Arc<dyn DocumentStore> = if config.database.url == "memory" {
            info!("Using in-memory document store");
            Arc::new(MemoryDocumentStore::new())
        } else {
            info!(url = %config.database.url, "Using SQLite document store");
            Arc::new(SqliteDocumentStore::connect(&config.database.url).await?)
        };
        let objects: Arc<dyn ObjectStorage> = Arc::new(MemoryObjectStorage::default());
        Ok(Self::from_parts(config, store, objects, notifier))
    }

    pub fn from_parts(
        config: Config,
        store: Arc<dyn DocumentStore>,
        objects: Arc<dyn ObjectStorage>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let assembler = FeedAssembler::new(store.clone(), config.feed.clone());
        let live = LiveFeedSubscriber::new(store.clone(), assembler.clone());
        let engagement = EngagementSynchronizer::new(store.clone(), objects.clone(), notifier, config.feed.clone());
        let content = ContentService::new(store.clone(), objects);
        let sessions = Arc::new(Mutex::new(Cache::new(config.cache.session_capacity)));

        Self {
            store,
            assembler,
            live,
            engagement,
            content,
            sessions,
            config,
        }
    }

    /// The principal's session, created empty on first use
    pub async fn session(&self, principal_id: &str) -> Arc<FeedSession> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .get_or_insert_with(principal_id.to_string(), || Arc::new(FeedSession::empty(principal_id)))
            .clone()
    }
}
