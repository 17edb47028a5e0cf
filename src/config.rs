//! Configuration for the image pipeline service.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration. Every field has a default, so an empty JSON object is a valid file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub workers: WorkerConfig,

    #[serde(default)]
    pub deadlines: DeadlineConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub links: LinkConfig,

    #[serde(default)]
    pub transform: TransformConfig,
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Listen address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Base URL clients reach this service on; presigned links start with it
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Upload size ceiling in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_base_url: default_public_base_url(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// Artifact storage configuration.
///
/// With neither `local_path` nor `s3` set, artifacts are kept in memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Local directory for artifacts. Mutually exclusive with `s3`.
    #[serde(default)]
    pub local_path: Option<PathBuf>,

    /// S3 / MinIO service for artifacts; every container is a bucket of the same name.
    #[serde(default)]
    pub s3: Option<S3Config>,

    #[serde(default = "default_raw_container")]
    pub raw_container: String,

    #[serde(default = "default_processed_container")]
    pub processed_container: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_path: None,
            s3: None,
            raw_container: default_raw_container(),
            processed_container: default_processed_container(),
        }
    }
}

/// S3-compatible endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Custom endpoint (MinIO). AWS when unset.
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_region")]
    pub region: String,

    /// Static credentials. Falls back to the AWS environment when unset.
    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default)]
    pub secret_access_key: Option<String>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: default_region(),
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum unacknowledged deliveries per consumer
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,

    /// Append-only journal; the queue is volatile when unset
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            prefetch: default_prefetch(),
            journal_path: None,
        }
    }
}

/// Status ledger storage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// SQLite database file; records are kept in memory and lost on restart when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of workers, also the dispatch channel capacity
    #[serde(default = "default_worker_count")]
    pub count: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
        }
    }
}

/// Time budgets for each path, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineConfig {
    #[serde(default = "default_ingest_secs")]
    pub ingest_secs: u64,

    #[serde(default = "default_process_secs")]
    pub process_secs: u64,

    /// Fresh budget for the FAILED write after a step failed or timed out
    #[serde(default = "default_failure_write_secs")]
    pub failure_write_secs: u64,

    #[serde(default = "default_read_secs")]
    pub read_secs: u64,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            ingest_secs: default_ingest_secs(),
            process_secs: default_process_secs(),
            failure_write_secs: default_failure_write_secs(),
            read_secs: default_read_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// Entry ceiling; least recently used entries are evicted beyond it
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            max_entries: default_cache_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default = "default_link_ttl_secs")]
    pub ttl_secs: u64,

    /// 32-byte signing key as hex. A random key is generated per process when unset.
    #[serde(default)]
    pub secret_hex: Option<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_link_ttl_secs(),
            secret_hex: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Output width; height follows the aspect ratio
    #[serde(default = "default_target_width")]
    pub target_width: u32,

    /// Ceiling on output width x height; larger results fail the item
    #[serde(default = "default_max_output_pixels")]
    pub max_output_pixels: u64,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            target_width: default_target_width(),
            max_output_pixels: default_max_output_pixels(),
        }
    }
}

impl DeadlineConfig {
    pub fn ingest(&self) -> Duration {
        Duration::from_secs(self.ingest_secs)
    }

    pub fn process(&self) -> Duration {
        Duration::from_secs(self.process_secs)
    }

    pub fn failure_write(&self) -> Duration {
        Duration::from_secs(self.failure_write_secs)
    }

    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage.local_path.is_some() && self.storage.s3.is_some() {
            anyhow::bail!("Cannot specify both storage.local_path and storage.s3");
        }
        if self.storage.raw_container.is_empty() || self.storage.processed_container.is_empty() {
            anyhow::bail!("Container names must not be empty");
        }
        if self.storage.raw_container == self.storage.processed_container {
            anyhow::bail!("Raw and processed containers must differ");
        }

        if self.http.max_upload_bytes == 0 {
            anyhow::bail!("http.max_upload_bytes must be > 0");
        }
        if self.queue.prefetch == 0 {
            anyhow::bail!("queue.prefetch must be > 0");
        }
        if self.workers.count == 0 {
            anyhow::bail!("workers.count must be > 0");
        }

        let d = &self.deadlines;
        if d.ingest_secs == 0 || d.process_secs == 0 || d.failure_write_secs == 0 || d.read_secs == 0 {
            anyhow::bail!("Deadlines must be > 0 seconds");
        }
        if self.cache.ttl_secs == 0 || self.cache.max_entries == 0 {
            anyhow::bail!("cache.ttl_secs and cache.max_entries must be > 0");
        }
        if self.links.ttl_secs == 0 {
            anyhow::bail!("links.ttl_secs must be > 0");
        }
        if let Some(secret) = &self.links.secret_hex {
            let bytes = hex::decode(secret.trim())
                .map_err(|e| anyhow::anyhow!("links.secret_hex is not valid hex: {}", e))?;
            if bytes.len() != 32 {
                anyhow::bail!("links.secret_hex must encode 32 bytes, got {}", bytes.len());
            }
        }
        if self.transform.target_width == 0 || self.transform.max_output_pixels == 0 {
            anyhow::bail!("transform.target_width and transform.max_output_pixels must be > 0");
        }

        Ok(())
    }
}

// Default value functions for serde
fn default_bind() -> String { "0.0.0.0:8081".to_string() }
fn default_public_base_url() -> String { "http://localhost:8081".to_string() }
fn default_max_upload_bytes() -> usize { 10 * 1024 * 1024 }
fn default_raw_container() -> String { "raw-images".to_string() }
fn default_processed_container() -> String { "processed-images".to_string() }
fn default_region() -> String { "us-east-1".to_string() }
fn default_prefetch() -> usize { 5 }
fn default_worker_count() -> usize { 5 }
fn default_ingest_secs() -> u64 { 30 }
fn default_process_secs() -> u64 { 300 }
fn default_failure_write_secs() -> u64 { 5 }
fn default_read_secs() -> u64 { 10 }
fn default_cache_ttl_secs() -> u64 { 600 }
fn default_cache_max_entries() -> u64 { 100_000 }
fn default_link_ttl_secs() -> u64 { 900 }
fn default_target_width() -> u32 { 800 }
fn default_max_output_pixels() -> u64 { crate::transform::DEFAULT_MAX_OUTPUT_PIXELS }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = Config::from_json("{}").unwrap();

        assert_eq!(config.http.bind, "0.0.0.0:8081");
        assert_eq!(config.http.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.storage.raw_container, "raw-images");
        assert_eq!(config.storage.processed_container, "processed-images");
        assert_eq!(config.queue.prefetch, 5);
        assert_eq!(config.workers.count, 5);
        assert_eq!(config.deadlines.process(), Duration::from_secs(300));
        assert_eq!(config.cache.ttl_secs, 600);
        assert_eq!(config.links.ttl_secs, 900);
        assert_eq!(config.transform.target_width, 800);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = Config::from_json(r#"{"workers": {"count": 12}, "cache": {"ttl_secs": 5}}"#).unwrap();

        assert_eq!(config.workers.count, 12);
        assert_eq!(config.cache.ttl_secs, 5);
        assert_eq!(config.cache.max_entries, 100_000);
        assert!(config.ledger.path.is_none());
    }

    #[test]
    fn test_generated_config_round_trips() {
        let json = Config::default().to_json().unwrap();
        let parsed = Config::from_json(&json).unwrap();

        assert_eq!(parsed.http.public_base_url, "http://localhost:8081");
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_local_and_s3() {
        let mut config = Config::default();
        config.storage.local_path = Some(PathBuf::from("/tmp/blobs"));
        config.storage.s3 = Some(S3Config {
            endpoint: Some("http://localhost:9000".to_string()),
            ..S3Config::default()
        });

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = Config::default();
        config.workers.count = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.queue.prefetch = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.deadlines.failure_write_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.links.ttl_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transform.max_output_pixels = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ledger_path_from_json() {
        let config = Config::from_json(r#"{"ledger": {"path": "/var/lib/pipeline/ledger.db"}}"#).unwrap();

        assert_eq!(config.ledger.path, Some(PathBuf::from("/var/lib/pipeline/ledger.db")));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_checks_secret_hex() {
        let mut config = Config::default();

        config.links.secret_hex = Some("ab".repeat(32));
        assert!(config.validate().is_ok());

        config.links.secret_hex = Some("abcd".to_string());
        assert!(config.validate().is_err());

        config.links.secret_hex = Some("zz".repeat(32));
        assert!(config.validate().is_err());
    }
}
