//! Asynchronous Image Pipeline Library
//!
//! Uploads are stored, recorded as `pending` and handed to a worker pool through a durable
//! queue. Workers resize and grayscale the image, store the result and move the record to a
//! terminal state. Clients poll a cache-fronted read path and get a time-bounded download
//! link once processing completes. The binary (`main.rs`) wires the modules into one process.
//!
//! ## Architecture Modules
//! - **`queue`**: Task envelopes and the at-least-once queue with explicit acknowledgement.
//! - **`ledger`**: The authoritative per-image record and its status state machine.
//! - **`artifact`**: Blob storage for raw and processed images, plus presigned links.
//! - **`cache`**: Cache-aside read path keyed by image id.
//! - **`transform`**: Decode, resize + grayscale, PNG encode.
//! - **`pipeline`**: The orchestrator (ingest / process / describe) and the worker pool.
//! - **`api`**: HTTP handlers.
//! - **`config`** / **`error`**: Service configuration and the error taxonomy.

pub mod api;
pub mod artifact;
pub mod cache;
pub mod config;
pub mod error;
pub mod ledger;
pub mod pipeline;
pub mod queue;
pub mod transform;

pub use config::Config;
pub use error::PipelineError;
pub use pipeline::orchestrator::Pipeline;
pub use pipeline::worker::WorkerPool;
