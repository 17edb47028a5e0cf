use crate::artifact::store::ArtifactError;
use crate::cache::types::CacheError;
use crate::ledger::types::{ImageId, LedgerError};
use crate::queue::types::QueueError;
use crate::transform::TransformError;

use std::time::Duration;

/// Everything that can go wrong in the pipeline's ingest, process and describe paths.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("image {0} not found")]
    NotFound(ImageId),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("{step} exceeded its deadline of {after:?}")]
    DeadlineExceeded { step: &'static str, after: Duration },

    #[error("malformed task envelope: {0}")]
    MalformedEnvelope(#[source] serde_json::Error),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl PipelineError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PipelineError::NotFound(_) | PipelineError::Ledger(LedgerError::NotFound(_))
        )
    }

    pub fn is_deadline(&self) -> bool {
        matches!(self, PipelineError::DeadlineExceeded { .. })
    }
}
