use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::infrastructure::traits::ObjectStorage;

/// Blob store kept in process memory. URLs are `<base_url>/<path>`.
#[derive(Debug)]
pub struct MemoryObjectStorage {
    base_url: String,
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    fail_deletes: AtomicBool,
}

impl MemoryObjectStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            blobs: RwLock::new(HashMap::new()),
            fail_deletes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `delete_by_url` fail with a transport error
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub async fn contains(&self, url: &str) -> bool {
        self.blobs.read().await.contains_key(url)
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }
}

impl Default for MemoryObjectStorage {
    fn default() -> Self {
        Self::new("memory://blobs")
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> AppResult<String> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        debug!("Storing {} bytes at {}", bytes.len(), url);
        self.blobs.write().await.insert(url.clone(), bytes);
        Ok(url)
    }

    async fn delete_by_url(&self, url: &str) -> AppResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(AppError::TransportFailure(format!(
                "object storage unreachable while deleting {}",
                url
            )));
        }
        match self.blobs.write().await.remove(url) {
            Some(_) => Ok(()),
            None => Err(AppError::EntityNotFound(format!("blob {}", url))),
        }
    }
}
