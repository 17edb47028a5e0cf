use super::types::*;
use super::{ResultCache, cache_key};
use crate::ledger::types::ImageId;

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default entry ceiling of [`MemoryCache::new`].
pub const DEFAULT_MAX_ENTRIES: u64 = 100_000;

#[derive(Clone)]
struct CachedPayload {
    /// Serialized JSON, as a string store such as Redis would hold it.
    payload: Arc<str>,
    ttl: Duration,
}

/// Each entry lives for the ttl it was stored with; a store over an existing key restarts it.
struct StoredTtl;

impl Expiry<String, CachedPayload> for StoredTtl {
    fn expire_after_create(&self, _key: &String, value: &CachedPayload, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedPayload,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process TTL cache keyed by `image:<id>`, on top of `moka`.
pub struct MemoryCache {
    entries: Cache<String, CachedPayload>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max_entries)
                .expire_after(StoredTtl)
                .build(),
        }
    }

    /// Raw stored payload, for inspection.
    pub async fn raw(&self, id: ImageId) -> Option<String> {
        self.entries
            .get(&cache_key(id))
            .await
            .map(|entry| entry.payload.to_string())
    }

    #[cfg(test)]
    pub(crate) async fn put_raw(&self, id: ImageId, payload: &str, ttl: Duration) {
        self.entries
            .insert(
                cache_key(id),
                CachedPayload {
                    payload: payload.into(),
                    ttl,
                },
            )
            .await;
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn lookup(&self, id: ImageId) -> Result<Option<ImageResponse>, CacheError> {
        let key = cache_key(id);
        let Some(entry) = self.entries.get(&key).await else {
            return Ok(None);
        };

        match serde_json::from_str::<ImageResponse>(&entry.payload) {
            Ok(response) => Ok(Some(response.without_link())),
            Err(e) => {
                self.entries.invalidate(&key).await;
                Err(CacheError::Serialization(e))
            }
        }
    }

    async fn store(&self, id: ImageId, response: &ImageResponse, ttl: Duration) -> Result<(), CacheError> {
        let payload = serde_json::to_string(&response.without_link())?;

        self.entries
            .insert(
                cache_key(id),
                CachedPayload {
                    payload: payload.into(),
                    ttl,
                },
            )
            .await;

        Ok(())
    }

    async fn invalidate(&self, id: ImageId) -> Result<(), CacheError> {
        if self.entries.remove(&cache_key(id)).await.is_some() {
            tracing::debug!("Invalidated cache entry for {}", id);
        }
        Ok(())
    }
}
