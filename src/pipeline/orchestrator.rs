//! Pipeline Orchestrator
//!
//! Ties the collaborators together for the three operations of the service:
//! - **ingest**: raw blob -> `pending` record -> envelope, strictly in that order.
//! - **process**: claim -> download -> transform -> upload -> `completed` -> invalidate cache.
//!   Any failure after the claim ends in `failed`.
//! - **describe**: cache-aside read with a freshly minted download link.

use super::deadline::Deadline;
use super::types::*;
use crate::artifact::ArtifactStore;
use crate::artifact::link::LinkSigner;
use crate::cache::ResultCache;
use crate::cache::types::ImageResponse;
use crate::error::PipelineError;
use crate::ledger::StatusLedger;
use crate::ledger::types::{ImageId, ImageRecord, ImageStatus, LedgerError};
use crate::queue::TaskQueue;
use crate::queue::types::TaskEnvelope;
use crate::transform::{self, Transform};

use chrono::Utc;
use std::sync::Arc;

/// Outcome of a claim attempt.
enum Claim {
    Proceed,
    Skip(SkipReason),
    /// The record could not be read; nothing was written.
    Defer,
}

pub struct Pipeline {
    ledger: Arc<dyn StatusLedger>,
    artifacts: Arc<dyn ArtifactStore>,
    queue: Arc<dyn TaskQueue>,
    cache: Arc<dyn ResultCache>,
    transform: Arc<dyn Transform>,
    links: LinkSigner,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        ledger: Arc<dyn StatusLedger>,
        artifacts: Arc<dyn ArtifactStore>,
        queue: Arc<dyn TaskQueue>,
        cache: Arc<dyn ResultCache>,
        transform: Arc<dyn Transform>,
        links: LinkSigner,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            ledger,
            artifacts,
            queue,
            cache,
            transform,
            links,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn links(&self) -> &LinkSigner {
        &self.links
    }

    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    // --- Ingestion ---

    /// Accepts a validated upload and schedules it for processing.
    ///
    /// `extension` includes the leading dot. The envelope is published only after the
    /// `pending` record is written; a failure before that leaves at most an orphaned blob.
    pub async fn ingest(
        &self,
        payload: Vec<u8>,
        filename: &str,
        extension: &str,
        media_type: &str,
    ) -> Result<ImageRecord, PipelineError> {
        let deadline = Deadline::after(self.settings.ingest_deadline);
        let id = ImageId::new();
        let object_name = id.raw_object_name(extension);
        let size = payload.len();

        deadline
            .run(
                "upload raw",
                self.artifacts
                    .put(&self.settings.raw_container, &object_name, payload, media_type),
            )
            .await?;
        tracing::debug!("Stored raw upload {}/{} ({} bytes)", self.settings.raw_container, object_name, size);

        let record = ImageRecord::pending(id, filename, &self.settings.raw_container);
        deadline
            .run("insert record", self.ledger.insert(record.clone()))
            .await?;

        let envelope = TaskEnvelope {
            image_id: id,
            bucket_name: self.settings.raw_container.clone(),
            object_name,
        };
        let body = envelope.encode()?;
        deadline.run("publish task", self.queue.publish(body)).await?;

        tracing::info!("Ingested image {} ({}), task queued", id, filename);
        Ok(record)
    }

    // --- Processing ---

    /// Handles one delivered envelope.
    ///
    /// `redelivered` comes from the queue and allows resuming an item a previous delivery left
    /// in `processing`. Returns `Ok` for completed, skipped and deferred items; on `Err` the
    /// item has been marked `failed` (best effort, within its own short deadline).
    pub async fn process(
        &self,
        envelope: &TaskEnvelope,
        redelivered: bool,
    ) -> Result<ProcessOutcome, PipelineError> {
        let id = envelope.image_id;
        let deadline = Deadline::after(self.settings.process_deadline);

        match self.claim(id, redelivered, &deadline).await? {
            Claim::Proceed => {}
            Claim::Skip(reason) => {
                tracing::warn!("Skipping task for image {}: {}", id, reason);
                return Ok(ProcessOutcome::Skipped(reason));
            }
            Claim::Defer => return Ok(ProcessOutcome::Deferred),
        }

        if let Err(e) = self.run_steps(envelope, &deadline).await {
            self.mark_failed(id, &e).await;
            return Err(e);
        }

        // Only a completed item invalidates; a stale pending entry is tolerated.
        let invalidation = Deadline::after(self.settings.failure_write_deadline);
        if let Err(e) = invalidation
            .run("invalidate cache", self.cache.invalidate(id))
            .await
        {
            tracing::warn!("Failed to invalidate cache for image {}: {}", id, e);
        }

        tracing::info!("Image {} processed", id);
        Ok(ProcessOutcome::Completed)
    }

    /// Takes ownership of the item. Only a failed `pending -> processing` write marks it
    /// `failed`; when the record cannot even be read its status is unknown and left alone.
    async fn claim(
        &self,
        id: ImageId,
        redelivered: bool,
        deadline: &Deadline,
    ) -> Result<Claim, PipelineError> {
        let record = match deadline.run("read record", self.ledger.get(id)).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::error!("Dropping task for image {}: no ledger record", id);
                return Ok(Claim::Skip(SkipReason::UnknownImage));
            }
            Err(e) => {
                tracing::warn!("Cannot read record of image {}, deferring task: {}", id, e);
                return Ok(Claim::Defer);
            }
        };

        match record.status {
            ImageStatus::Pending => {
                let claimed = deadline
                    .run("mark processing", self.ledger.update_status(id, ImageStatus::Processing))
                    .await;
                match claimed {
                    Ok(_) => Ok(Claim::Proceed),
                    // Lost the race against another delivery of the same envelope.
                    Err(PipelineError::Ledger(LedgerError::InvalidTransition { .. })) => {
                        Ok(Claim::Skip(SkipReason::InFlight))
                    }
                    Err(e) => {
                        self.mark_failed(id, &e).await;
                        Err(e)
                    }
                }
            }
            ImageStatus::Processing if redelivered => {
                tracing::info!("Resuming image {} left in processing by an earlier delivery", id);
                Ok(Claim::Proceed)
            }
            ImageStatus::Processing => Ok(Claim::Skip(SkipReason::InFlight)),
            status => Ok(Claim::Skip(SkipReason::AlreadyTerminal(status))),
        }
    }

    async fn run_steps(&self, envelope: &TaskEnvelope, deadline: &Deadline) -> Result<(), PipelineError> {
        let id = envelope.image_id;

        let raw = deadline
            .run(
                "download raw",
                self.artifacts.get(&envelope.bucket_name, &envelope.object_name),
            )
            .await?;
        tracing::debug!("Downloaded {}/{} ({} bytes)", envelope.bucket_name, envelope.object_name, raw.len());

        let transformer = self.transform.clone();
        let png = deadline
            .run("transform", async move {
                let png = tokio::task::spawn_blocking(move || transform::run(transformer.as_ref(), &raw)).await??;
                Ok::<_, PipelineError>(png)
            })
            .await?;

        let derived = id.derived_object_name();
        deadline
            .run(
                "upload derived",
                self.artifacts
                    .put(&self.settings.processed_container, &derived, png, "image/png"),
            )
            .await?;
        tracing::debug!("Uploaded {}/{}", self.settings.processed_container, derived);

        deadline
            .run("mark completed", self.ledger.update_status(id, ImageStatus::Completed))
            .await?;

        Ok(())
    }

    /// Writes `failed` under a fresh deadline so a stuck step cannot also block the report.
    async fn mark_failed(&self, id: ImageId, cause: &PipelineError) {
        let deadline = Deadline::after(self.settings.failure_write_deadline);

        match deadline
            .run("mark failed", self.ledger.update_status(id, ImageStatus::Failed))
            .await
        {
            Ok(_) => tracing::error!("Image {} failed: {}", id, cause),
            Err(e) => tracing::error!(
                "Image {} failed ({}) and could not be marked failed: {}",
                id,
                cause,
                e
            ),
        }
    }

    // --- Read path ---

    /// Current view of an image. Completed images carry a download link minted for this call.
    pub async fn describe(&self, id: ImageId) -> Result<ImageResponse, PipelineError> {
        let deadline = Deadline::after(self.settings.read_deadline);

        match deadline.run("cache lookup", self.cache.lookup(id)).await {
            Ok(Some(cached)) => {
                tracing::trace!("Cache hit for image {}", id);
                return Ok(self.with_link(cached));
            }
            Ok(None) => tracing::trace!("Cache miss for image {}", id),
            Err(e) => tracing::warn!("Cache lookup for image {} failed, reading ledger: {}", id, e),
        }

        let record = deadline
            .run("read record", self.ledger.get(id))
            .await?
            .ok_or(PipelineError::NotFound(id))?;

        let response = ImageResponse::from(&record);
        match deadline
            .run("cache store", self.cache.store(id, &response, self.settings.cache_ttl))
            .await
        {
            Ok(()) if !record.status.is_terminal() => self.drop_if_superseded(&record, &deadline).await,
            Ok(()) => {}
            Err(e) => tracing::warn!("Failed to cache response for image {}: {}", id, e),
        }

        Ok(self.with_link(response))
    }

    /// A status write between our ledger read and cache store has already run its
    /// invalidation, leaving the entry just stored stale. Re-read and drop it in that case.
    async fn drop_if_superseded(&self, stored: &ImageRecord, deadline: &Deadline) {
        let superseded = match deadline.run("re-read record", self.ledger.get(stored.id)).await {
            Ok(Some(current)) => current.updated_at != stored.updated_at,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("Cannot re-read image {} after caching it: {}", stored.id, e);
                true
            }
        };

        if superseded {
            tracing::debug!("Cached view of image {} was superseded, dropping it", stored.id);
            if let Err(e) = deadline
                .run("cache invalidate", self.cache.invalidate(stored.id))
                .await
            {
                tracing::warn!("Failed to drop superseded cache entry for image {}: {}", stored.id, e);
            }
        }
    }

    fn with_link(&self, mut response: ImageResponse) -> ImageResponse {
        response.download_url = None;
        if response.status == ImageStatus::Completed {
            let link = self.links.presign(
                &self.settings.processed_container,
                &response.id.derived_object_name(),
                self.settings.link_ttl,
                Utc::now(),
            );
            response.download_url = Some(link.url);
        }
        response
    }
}
