// TAO Feed - fan-out feed assembly and optimistic engagement over a document store

// Storage adapters, blob storage, notifications and request plumbing
pub mod infrastructure;

// Chunked fan-out, merge and live feed subscriptions
pub mod feed;

// Optimistic likes/comments and the caller-owned session
pub mod engagement;

// Posts, comments, profiles and mentions
pub mod content;

// Domain models
pub mod models;

// HTTP surface
pub mod app_state;
pub mod feed_interface;

// Common utilities
pub mod config;
pub mod error;

// Re-exports for convenience
pub use error::{AppError, AppResult};
