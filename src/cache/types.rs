use crate::ledger::types::{ImageId, ImageRecord, ImageStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Client-facing view of an image record.
///
/// `download_url` is only ever set on the way out to a client. Cached copies never carry
/// one; it is minted fresh on every read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageResponse {
    pub id: ImageId,
    pub filename: String,
    pub status: ImageStatus,
    pub bucket_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageResponse {
    pub fn without_link(&self) -> Self {
        Self {
            download_url: None,
            ..self.clone()
        }
    }
}

impl From<&ImageRecord> for ImageResponse {
    fn from(record: &ImageRecord) -> Self {
        Self {
            id: record.id,
            filename: record.filename.clone(),
            status: record.status,
            bucket_name: record.bucket_name.clone(),
            download_url: None,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cached payload could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}
