//! Result Cache Module
//!
//! Fast read path in front of the ledger (cache-aside). Entries are created lazily by reads
//! and only ever deleted by the pipeline, never updated in place, so the next read after a
//! mutation rebuilds the entry from the ledger.
//!
//! ## Submodules
//! - **`types`**: The cached response shape and cache errors.
//! - **`memory`**: In-process TTL cache storing serialized payloads.

pub mod memory;
pub mod types;


use crate::ledger::types::ImageId;

use async_trait::async_trait;
use std::time::Duration;
use types::{CacheError, ImageResponse};

/// Cache key of an image's response: `image:<id>`.
pub fn cache_key(id: ImageId) -> String {
    format!("image:{}", id)
}

#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Returns the cached response, or `None` on miss or expiry.
    async fn lookup(&self, id: ImageId) -> Result<Option<ImageResponse>, CacheError>;

    /// Stores `response` for `ttl`. Any download link on it is not stored.
    async fn store(&self, id: ImageId, response: &ImageResponse, ttl: Duration) -> Result<(), CacheError>;

    /// Deletes the entry. Deleting a missing entry is not an error.
    async fn invalidate(&self, id: ImageId) -> Result<(), CacheError>;
}
