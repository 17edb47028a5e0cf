use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an uploaded image.
///
/// Wrapper around a UUID v4. The id names every artifact derived from the upload:
/// the raw object, the processed object and the cache entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ImageId(pub Uuid);

impl ImageId {
    /// Generates a new random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Object name of the raw upload: `<id><extension>`.
    ///
    /// The extension is taken verbatim (including its leading dot).
    pub fn raw_object_name(&self, extension: &str) -> String {
        format!("{}{}", self.0, extension)
    }

    /// Object name of the processed artifact: `<id>.png`.
    pub fn derived_object_name(&self) -> String {
        format!("{}.png", self.0)
    }
}

impl Default for ImageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ImageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle state of an image.
///
/// `Pending -> Processing -> {Completed, Failed}`. `Pending -> Failed` is also allowed so
/// that a failed claim still ends in a terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    /// Uploaded and queued, no worker has picked it up yet.
    Pending,
    /// A worker is transforming the image.
    Processing,
    /// Processed artifact is available.
    Completed,
    /// Processing failed at some step. Not retried automatically.
    Failed,
}

impl ImageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageStatus::Pending => "pending",
            ImageStatus::Processing => "processing",
            ImageStatus::Completed => "completed",
            ImageStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ImageStatus::Completed | ImageStatus::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ImageStatus) -> bool {
        matches!(
            (self, next),
            (ImageStatus::Pending, ImageStatus::Processing)
                | (ImageStatus::Pending, ImageStatus::Failed)
                | (ImageStatus::Processing, ImageStatus::Completed)
                | (ImageStatus::Processing, ImageStatus::Failed)
        )
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ImageStatus::Pending),
            "processing" => Ok(ImageStatus::Processing),
            "completed" => Ok(ImageStatus::Completed),
            "failed" => Ok(ImageStatus::Failed),
            other => Err(format!("unknown image status: {}", other)),
        }
    }
}

/// The authoritative record of one upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageRecord {
    pub id: ImageId,
    /// Filename as declared by the uploader.
    pub filename: String,
    pub status: ImageStatus,
    /// Container holding the raw upload.
    pub bucket_name: String,
    pub created_at: DateTime<Utc>,
    /// Strictly increases on every mutation.
    pub updated_at: DateTime<Utc>,
}

impl ImageRecord {
    /// A freshly ingested record in `Pending` state.
    pub fn pending(id: ImageId, filename: impl Into<String>, bucket_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            filename: filename.into(),
            status: ImageStatus::Pending,
            bucket_name: bucket_name.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-status record counts, used by the stats reporter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("image {0} not found in ledger")]
    NotFound(ImageId),

    #[error("image {0} already exists in ledger")]
    AlreadyExists(ImageId),

    #[error("image {id}: transition {from} -> {to} is not allowed")]
    InvalidTransition {
        id: ImageId,
        from: ImageStatus,
        to: ImageStatus,
    },

    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("ledger storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("corrupt ledger row: {0}")]
    Corrupt(String),
}

/// Returns a timestamp strictly after `previous`, normally the current time.
pub fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + chrono::Duration::microseconds(1)
    }
}
