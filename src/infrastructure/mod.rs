// Storage, blob, notification and request plumbing behind the feed engine
pub mod document;        // Documents, filtered queries and write operations
pub mod traits;          // DocumentStore / ObjectStorage / NotificationDispatcher
pub mod change_feed;     // Collection change broadcast and live queries
pub mod memory_store;    // In-process document store
pub mod sqlite_store;    // sqlx SQLite document store
pub mod fault_injection; // Failure and latency injecting store decorator
pub mod object_storage;  // In-memory blob storage
pub mod notifications;   // Channel-backed notification dispatcher
pub mod cache;           // Bounded LRU
pub mod viewer;          // Principal extractor

pub use cache::Cache;
pub use change_feed::ChangeFeed;
pub use document::{Document, DocumentQuery, FieldFilter, Fields, OrderBy, SortDirection, WriteOp};
pub use fault_injection::FaultInjectingStore;
pub use memory_store::MemoryDocumentStore;
pub use notifications::{ChannelNotificationDispatcher, Delivery};
pub use object_storage::MemoryObjectStorage;
pub use sqlite_store::SqliteDocumentStore;
pub use traits::{DocumentStore, DocumentStream, NotificationDispatcher, ObjectStorage};
pub use viewer::Viewer;
