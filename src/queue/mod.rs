//! Durable Queue Module
//!
//! Decouples ingestion from processing. Producers publish serialized `TaskEnvelope`s; a
//! single consumer loop pulls deliveries and hands them to the worker pool.
//!
//! ## Delivery Semantics
//! - **At-least-once**: a delivered message stays in the queue's unacknowledged set until it
//!   is explicitly acknowledged. Rejecting with requeue, or dropping the delivery, makes it
//!   eligible for redelivery (flagged `redelivered`).
//! - **Prefetch**: a consumer never holds more than `prefetch` unacknowledged deliveries;
//!   `next()` waits until one is settled. This is the backpressure bound.
//! - **Poison messages**: bodies that do not decode are rejected without requeue by the
//!   consumer, so they are never redelivered.
//!
//! ## Submodules
//! - **`types`**: Envelope, delivery and acknowledgement types.
//! - **`local`**: In-process queue with an optional append-only journal.

pub mod local;
pub mod types;


use async_trait::async_trait;
use types::{DeliveryStream, QueueError};

/// Producer/consumer contract for the task queue.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Durably enqueues a message body.
    async fn publish(&self, body: Vec<u8>) -> Result<(), QueueError>;

    /// Opens a consumer. Each consumer has its own prefetch window.
    async fn consume(&self) -> Result<Box<dyn DeliveryStream>, QueueError>;
}
