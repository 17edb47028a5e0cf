//! Worker Pool Implementation
//!
//! One dispatch loop drains the queue and forwards envelopes into a bounded channel of
//! capacity N; N workers pull from that channel and run [`Pipeline::process`].
//!
//! ## Responsibilities
//! - **Dispatch**: Decoding envelopes. Malformed bodies are rejected without requeue and logged
//!   as data loss.
//! - **Execution**: Each worker handles one item at a time and acknowledges it afterwards,
//!   whether it completed, failed or was skipped. A deferred item is handed back to the queue
//!   after a short pause.
//! - **Shutdown**: Stop consuming, let the workers drain what was already dispatched, join.

use super::orchestrator::Pipeline;
use super::types::*;
use crate::error::PipelineError;
use crate::queue::TaskQueue;
use crate::queue::types::{Delivery, DeliveryStream, QueueError, TaskEnvelope};

use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

/// A decoded envelope together with the delivery it must be acknowledged on.
struct Job {
    envelope: TaskEnvelope,
    delivery: Delivery,
}

/// The engine that drives item processing.
pub struct WorkerPool {
    pipeline: Arc<Pipeline>,
    /// Number of workers, also the dispatch channel capacity.
    worker_count: usize,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    pub fn new(pipeline: Arc<Pipeline>, worker_count: usize) -> Self {
        Self {
            pipeline,
            worker_count: worker_count.max(1),
            counters: Arc::new(PoolCounters::default()),
        }
    }

    /// Subscribes to `queue`, spawns the dispatcher and the workers, and returns immediately.
    pub async fn start(self, queue: &dyn TaskQueue) -> Result<PoolHandle, QueueError> {
        let stream = queue.consume().await?;
        let (job_tx, job_rx) = mpsc::channel::<Job>(self.worker_count);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tracing::info!("Starting {} pipeline workers", self.worker_count);

        let workers = (0..self.worker_count)
            .map(|worker_id| {
                let pipeline = self.pipeline.clone();
                let jobs = job_rx.clone();
                let counters = self.counters.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, pipeline, jobs, counters).await;
                })
            })
            .collect();

        let counters = self.counters.clone();
        let dispatcher = tokio::spawn(async move {
            dispatch_loop(stream, job_tx, shutdown_rx, counters).await;
        });

        tracing::info!("Worker pool started with {} workers", self.worker_count);

        Ok(PoolHandle {
            shutdown: shutdown_tx,
            dispatcher,
            workers,
            counters: self.counters,
        })
    }
}

/// Handle to a running pool. Dropping it stops dispatching, like [`PoolHandle::shutdown`]
/// without the wait.
pub struct PoolHandle {
    shutdown: watch::Sender<bool>,
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<PoolCounters>,
}

impl PoolHandle {
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    /// Shared counters, for reporters that outlive a borrow of the handle.
    pub fn counters(&self) -> Arc<PoolCounters> {
        self.counters.clone()
    }

    /// Stops consuming and waits for every dispatched item to finish.
    ///
    /// Deliveries received but not yet dispatched are dropped, which returns them to the queue.
    pub async fn shutdown(self) -> PoolStats {
        tracing::info!("Shutting down worker pool");
        let _ = self.shutdown.send(true);

        if let Err(e) = self.dispatcher.await {
            tracing::error!("Dispatcher task ended abnormally: {}", e);
        }
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!("Worker task ended abnormally: {}", e);
            }
        }

        let stats = self.counters.snapshot();
        tracing::info!("Worker pool stopped. {}", stats);
        stats
    }
}

async fn dispatch_loop(
    mut stream: Box<dyn DeliveryStream>,
    jobs: mpsc::Sender<Job>,
    mut shutdown: watch::Receiver<bool>,
    counters: Arc<PoolCounters>,
) {
    tracing::info!("Dispatcher started");

    loop {
        let delivery = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = stream.next() => match next {
                Some(delivery) => delivery,
                None => {
                    tracing::info!("Queue closed, dispatcher stopping");
                    break;
                }
            },
        };

        let envelope = match TaskEnvelope::decode(&delivery.body).map_err(PipelineError::MalformedEnvelope) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(
                    "Discarding delivery {}, message lost: {}",
                    delivery.tag,
                    e
                );
                counters.record_discarded();
                if let Err(e) = delivery.reject(false).await {
                    tracing::warn!("Failed to reject malformed delivery: {}", e);
                }
                continue;
            }
        };

        tracing::trace!("Dispatching task for image {}", envelope.image_id);

        // Blocks while all N workers are busy and the channel is full.
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            sent = jobs.send(Job { envelope, delivery }) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    tracing::info!("Dispatcher stopped");
}

async fn worker_loop(
    worker_id: usize,
    pipeline: Arc<Pipeline>,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    counters: Arc<PoolCounters>,
) {
    tracing::info!("Worker {} started", worker_id);

    loop {
        let job = jobs.lock().await.recv().await;
        let Some(Job { envelope, delivery }) = job else {
            break;
        };

        tracing::info!(
            "Worker {} received task for image {}{}",
            worker_id,
            envelope.image_id,
            if delivery.redelivered { " (redelivered)" } else { "" }
        );

        match pipeline.process(&envelope, delivery.redelivered).await {
            Ok(ProcessOutcome::Completed) => counters.record_processed(),
            Ok(ProcessOutcome::Skipped(_)) => counters.record_skipped(),
            Ok(ProcessOutcome::Deferred) => {
                counters.record_deferred();
                tokio::time::sleep(pipeline.settings().requeue_delay).await;
                if let Err(e) = delivery.reject(true).await {
                    tracing::warn!("Failed to requeue delivery for image {}: {}", envelope.image_id, e);
                }
                continue;
            }
            Err(e) => {
                tracing::error!("Worker {} failed image {}: {}", worker_id, envelope.image_id, e);
                counters.record_failed();
            }
        }

        // The outcome is recorded in the ledger; the message is done either way.
        if let Err(e) = delivery.ack().await {
            tracing::warn!("Failed to ack delivery for image {}: {}", envelope.image_id, e);
        }
    }

    tracing::info!("Worker {} stopped", worker_id);
}
