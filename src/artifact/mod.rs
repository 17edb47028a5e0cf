//! Artifact Store Module
//!
//! Holds the binary payloads: raw uploads and processed PNGs. Objects are addressed by
//! `(container, object name)` where the object name is derived from the image id, so the
//! same id always maps to the same objects.
//!
//! ## Submodules
//! - **`store`**: `object_store`-backed implementation (local FS, memory, S3/MinIO buckets).
//! - **`link`**: Presigned, time-bounded download links.

pub mod link;
pub mod store;


use async_trait::async_trait;
use store::ArtifactError;

/// Blob storage contract.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(
        &self,
        container: &str,
        object: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ArtifactError>;

    async fn get(&self, container: &str, object: &str) -> Result<Vec<u8>, ArtifactError>;
}
