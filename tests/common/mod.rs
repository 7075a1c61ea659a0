#![allow(dead_code)]

use chrono::DateTime;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

use tao_feed::config::FeedConfig;
use tao_feed::content::ContentService;
use tao_feed::engagement::EngagementSynchronizer;
use tao_feed::feed::{FeedAssembler, LiveFeedSubscriber};
use tao_feed::infrastructure::document::encode_fields;
use tao_feed::infrastructure::{
    ChannelNotificationDispatcher, Delivery, FaultInjectingStore, MemoryDocumentStore, MemoryObjectStorage,
};
use tao_feed::models::{Collection, Post};

pub struct Harness {
    pub store: Arc<FaultInjectingStore<MemoryDocumentStore>>,
    pub objects: Arc<MemoryObjectStorage>,
    pub assembler: FeedAssembler,
    pub live: LiveFeedSubscriber,
    pub content: ContentService,
    pub engagement: EngagementSynchronizer,
    pub deliveries: UnboundedReceiver<Delivery>,
}

pub fn harness() -> Harness {
    harness_with(FeedConfig::default())
}

pub fn harness_with(config: FeedConfig) -> Harness {
    let store = Arc::new(FaultInjectingStore::new(MemoryDocumentStore::new()));
    let objects = Arc::new(MemoryObjectStorage::default());
    let (notifier, deliveries) = ChannelNotificationDispatcher::new();

    let assembler = FeedAssembler::new(store.clone(), config.clone());
    let live = LiveFeedSubscriber::new(store.clone(), assembler.clone());
    let content = ContentService::new(store.clone(), objects.clone());
    let engagement = EngagementSynchronizer::new(store.clone(), objects.clone(), Arc::new(notifier), config);

    Harness {
        store,
        objects,
        assembler,
        live,
        content,
        engagement,
        deliveries,
    }
}

pub fn post(id: &str, author_id: &str, created_at_ms: i64) -> Post {
    Post {
        id: id.to_string(),
        author_id: author_id.to_string(),
        author_username: author_id.to_string(),
        author_avatar_url: None,
        image_url: None,
        caption: format!("{} by {}", id, author_id),
        location: None,
        created_at: DateTime::from_timestamp_millis(created_at_ms).unwrap(),
        updated_at: None,
        likes: Default::default(),
        comment_count: 0,
        metadata: Default::default(),
    }
}

/// Write a post document directly, bypassing the content service
pub async fn seed_post(store: &MemoryDocumentStore, id: &str, author_id: &str, created_at_ms: i64) -> Post {
    let post = post(id, author_id, created_at_ms);
    store
        .insert(Collection::Posts, id, encode_fields(&post).unwrap())
        .await;
    post
}

pub fn ids(posts: &[Post]) -> Vec<&str> {
    posts.iter().map(|p| p.id.as_str()).collect()
}
