//! Binary blob storage for profile avatars.

use dashmap::DashMap;

use crate::sync::core::errors::{SyncError, SyncResult};
use crate::sync::store::StoreFuture;

/// Blob storage abstraction.
///
/// Implementations store the bytes under `key` and return a publicly
/// resolvable URL for later display.
pub trait BlobStorage: Send + Sync {
    /// Store `bytes` under `key`, overwriting any previous blob.
    ///
    /// # Errors
    /// Returns a validation error for an empty key or payload, and a
    /// transport error if the backend is unreachable.
    fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> StoreFuture<'_, SyncResult<String>>;
}

/// Stored blob payload.
#[derive(Clone, Debug)]
struct Blob {
    bytes: Vec<u8>,
    content_type: String,
}

/// In-process blob store.
///
/// Returned URLs use the `memory:` scheme and resolve only inside this
/// process, which is enough for local deployments and tests.
#[derive(Default)]
pub struct MemoryBlobStorage {
    blobs: DashMap<String, Blob>,
}

impl MemoryBlobStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a stored blob's bytes by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.get(key).map(|blob| blob.bytes.clone())
    }

    /// Fetch a stored blob's content type by key.
    #[must_use]
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.blobs.get(key).map(|blob| blob.content_type.clone())
    }
}

impl BlobStorage for MemoryBlobStorage {
    fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> StoreFuture<'_, SyncResult<String>> {
        let key = key.to_string();
        let content_type = content_type.to_string();
        Box::pin(async move {
            if key.is_empty() {
                return Err(SyncError::Validation("blob key is empty".to_string()));
            }
            if bytes.is_empty() {
                return Err(SyncError::Validation("blob payload is empty".to_string()));
            }

            self.blobs.insert(
                key.clone(),
                Blob {
                    bytes,
                    content_type,
                },
            );
            Ok(format!("memory://{key}"))
        })
    }
}
