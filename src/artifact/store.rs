//! Blob storage on top of `object_store`.
//!
//! Local and in-memory backends hold every container as a top-level prefix of one store
//! (`raw-images/<id>.jpg`). On S3/MinIO each container is its own bucket and objects sit at
//! the bucket root (`<id>.jpg` in `raw-images`), the layout other clients of those buckets
//! expect.

use super::ArtifactStore;
use crate::config::S3Config;

use async_trait::async_trait;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::{
    Attribute, Attributes, BackoffConfig, ClientOptions, ObjectStore, PutOptions, PutPayload,
    RetryConfig,
};
use reqwest::{Method, StatusCode};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("object {container}/{object} not found")]
    NotFound { container: String, object: String },

    #[error("unknown container {0}")]
    UnknownContainer(String),

    #[error("object store error: {0}")]
    Store(#[from] object_store::Error),
}

impl ArtifactError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ArtifactError::NotFound { .. } | ArtifactError::UnknownContainer(_))
    }
}

enum Backend {
    /// One store; containers are top-level prefixes.
    Prefixed(Arc<dyn ObjectStore>),
    /// One S3 bucket per container.
    Buckets(BTreeMap<String, Arc<AmazonS3>>),
}

/// [`ArtifactStore`] backed by `object_store`.
pub struct ObjectArtifactStore {
    backend: Backend,
    /// Whether the backend accepts object attributes (content type) on put.
    content_type_attributes: bool,
}

impl ObjectArtifactStore {
    pub fn new(store: Arc<dyn ObjectStore>, content_type_attributes: bool) -> Self {
        Self {
            backend: Backend::Prefixed(store),
            content_type_attributes,
        }
    }

    /// Volatile store, used by tests and single-process demos.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), true)
    }

    /// Store rooted at a local directory, created if missing.
    ///
    /// The local filesystem backend has no object attributes, so content types are not
    /// recorded; readers derive them from the object name.
    pub fn local(root: &std::path::Path) -> anyhow::Result<Self> {
        if !root.exists() {
            std::fs::create_dir_all(root)?;
        }
        tracing::info!("Creating LocalFileSystem artifact store at: {}", root.display());
        Ok(Self::new(Arc::new(LocalFileSystem::new_with_prefix(root)?), false))
    }

    /// Store on an S3-compatible service (AWS or MinIO), one bucket per container.
    ///
    /// Nothing is contacted here; call [`ObjectArtifactStore::provision`] to create the buckets.
    pub fn s3(settings: &S3Config, containers: &[&str]) -> anyhow::Result<Self> {
        tracing::info!(
            "Creating S3 artifact store for buckets {:?} at {}",
            containers,
            settings.endpoint.as_deref().unwrap_or("<aws>")
        );

        let mut buckets = BTreeMap::new();
        for container in containers {
            let bucket = s3_builder(settings).with_bucket_name(*container).build()?;
            buckets.insert(container.to_string(), Arc::new(bucket));
        }

        Ok(Self {
            backend: Backend::Buckets(buckets),
            content_type_attributes: true,
        })
    }

    /// Creates every container bucket that does not exist yet. A no-op for prefix backends,
    /// whose containers appear on first write.
    pub async fn provision(&self) -> anyhow::Result<()> {
        let Backend::Buckets(buckets) = &self.backend else {
            return Ok(());
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        for (name, bucket) in buckets {
            let url = create_bucket_url(bucket).await?;
            let response = client.put(url).send().await?;

            match response.status() {
                status if status.is_success() => tracing::info!("Created bucket {}", name),
                // BucketAlreadyOwnedByYou / BucketAlreadyExists
                StatusCode::CONFLICT => tracing::debug!("Bucket {} already exists", name),
                status => {
                    let body = response.text().await.unwrap_or_default();
                    anyhow::bail!("Failed to create bucket {}: {} {}", name, status, body);
                }
            }
        }

        Ok(())
    }

    /// The store holding `container` and the object's path inside it.
    pub(crate) fn locate(&self, container: &str, object: &str) -> Result<(&dyn ObjectStore, Path), ArtifactError> {
        match &self.backend {
            Backend::Prefixed(store) => {
                Ok((store.as_ref(), Path::from(format!("{}/{}", container, object))))
            }
            Backend::Buckets(buckets) => buckets
                .get(container)
                .map(|bucket| (bucket.as_ref() as &dyn ObjectStore, Path::from(object)))
                .ok_or_else(|| ArtifactError::UnknownContainer(container.to_string())),
        }
    }

    fn map_error(err: object_store::Error, container: &str, object: &str) -> ArtifactError {
        match err {
            object_store::Error::NotFound { .. } => ArtifactError::NotFound {
                container: container.to_string(),
                object: object.to_string(),
            },
            other => ArtifactError::Store(other),
        }
    }
}

#[async_trait]
impl ArtifactStore for ObjectArtifactStore {
    async fn put(
        &self,
        container: &str,
        object: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ArtifactError> {
        let (store, path) = self.locate(container, object)?;
        let size = bytes.len();
        let mut options = PutOptions::default();
        if self.content_type_attributes {
            let mut attributes = Attributes::new();
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
            options.attributes = attributes;
        }

        store
            .put_opts(&path, PutPayload::from(bytes), options)
            .await
            .map_err(|e| Self::map_error(e, container, object))?;

        tracing::debug!("Stored {}/{} ({} bytes, {})", container, object, size, content_type);
        Ok(())
    }

    async fn get(&self, container: &str, object: &str) -> Result<Vec<u8>, ArtifactError> {
        let (store, path) = self.locate(container, object)?;
        let result = store
            .get(&path)
            .await
            .map_err(|e| Self::map_error(e, container, object))?;

        let bytes = result
            .bytes()
            .await
            .map_err(|e| Self::map_error(e, container, object))?;

        Ok(bytes.to_vec())
    }
}

pub(crate) fn s3_builder(settings: &S3Config) -> AmazonS3Builder {
    let mut builder = AmazonS3Builder::from_env()
        .with_region(&settings.region)
        .with_client_options(create_client_options())
        .with_retry(create_retry_config());

    if let Some(endpoint) = &settings.endpoint {
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(endpoint.starts_with("http://"))
            .with_virtual_hosted_style_request(false);
    }
    if let (Some(key), Some(secret)) = (&settings.access_key_id, &settings.secret_access_key) {
        builder = builder
            .with_access_key_id(key)
            .with_secret_access_key(secret);
    }

    builder
}

/// Presigned `PUT /<bucket>/`, which S3 and MinIO treat as CreateBucket.
pub(crate) async fn create_bucket_url(bucket: &AmazonS3) -> Result<String, object_store::Error> {
    let url = bucket
        .signed_url(Method::PUT, &Path::from(""), Duration::from_secs(60))
        .await?;
    Ok(url.to_string())
}

/// Client options for the S3 backend.
fn create_client_options() -> ClientOptions {
    ClientOptions::new()
        .with_connect_timeout(Duration::from_secs(5))
        // Upper bound for a single request; the pipeline applies its own deadlines on top.
        .with_timeout(Duration::from_secs(60))
        .with_pool_idle_timeout(Duration::from_secs(90))
}

/// Retries for transient S3 failures (429 and 5xx).
fn create_retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        backoff: BackoffConfig {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            base: 2.0,
        },
        retry_timeout: Duration::from_secs(60),
    }
}

/// Content type for an object name, from its extension.
pub fn content_type_for(object: &str) -> &'static str {
    let lower = object.to_ascii_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else {
        "application/octet-stream"
    }
}
