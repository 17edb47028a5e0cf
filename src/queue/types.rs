use crate::ledger::types::ImageId;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The unit of work carried by the queue.
///
/// Only references travel through the queue: the worker fetches the raw bytes from the
/// artifact store using `bucket_name`/`object_name`. The JSON field names are part of the
/// wire format shared with other producers and must not change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskEnvelope {
    pub image_id: ImageId,
    pub bucket_name: String,
    pub object_name: String,
}

impl TaskEnvelope {
    pub fn encode(&self) -> Result<Vec<u8>, QueueError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,

    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("queue journal I/O failed: {0}")]
    Journal(#[from] std::io::Error),

    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// Backend side of a delivery's acknowledgement.
#[async_trait]
pub trait Settle: Send {
    /// Removes the message from the queue for good.
    async fn ack(self: Box<Self>) -> Result<(), QueueError>;

    /// Negative acknowledgement. With `requeue` the message becomes eligible for redelivery,
    /// without it the message is discarded.
    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), QueueError>;

    /// Called when a delivery is dropped without being settled (consumer crashed or was
    /// shut down). The message must become eligible for redelivery.
    fn abandon(self: Box<Self>);
}

/// A message handed to a consumer together with its acknowledgement handle.
///
/// The message stays in the queue's unacknowledged set until `ack` or `reject` is called.
/// Dropping an unsettled delivery requeues it.
pub struct Delivery {
    pub tag: u64,
    pub body: Vec<u8>,
    /// True when the message was handed out before and not acknowledged.
    pub redelivered: bool,
    settle: Option<Box<dyn Settle>>,
}

impl Delivery {
    pub fn new(tag: u64, body: Vec<u8>, redelivered: bool, settle: Box<dyn Settle>) -> Self {
        Self {
            tag,
            body,
            redelivered,
            settle: Some(settle),
        }
    }

    pub async fn ack(mut self) -> Result<(), QueueError> {
        match self.settle.take() {
            Some(settle) => settle.ack().await,
            None => Ok(()),
        }
    }

    pub async fn reject(mut self, requeue: bool) -> Result<(), QueueError> {
        match self.settle.take() {
            Some(settle) => settle.reject(requeue).await,
            None => Ok(()),
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if let Some(settle) = self.settle.take() {
            tracing::debug!("Delivery {} dropped unsettled, requeueing", self.tag);
            settle.abandon();
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("tag", &self.tag)
            .field("body_len", &self.body.len())
            .field("redelivered", &self.redelivered)
            .field("settled", &self.settle.is_none())
            .finish()
    }
}

/// Infinite sequence of deliveries for one consumer.
#[async_trait]
pub trait DeliveryStream: Send {
    /// Waits for the next delivery. Returns `None` once the queue is closed.
    ///
    /// Blocks while the consumer already holds `prefetch` unacknowledged deliveries.
    async fn next(&mut self) -> Option<Delivery>;
}
