//! Status Ledger Module
//!
//! The authoritative store of image records and their lifecycle status.
//!
//! ## State Machine
//! `pending -> processing -> {completed, failed}`, plus `pending -> failed` for items whose
//! claim could not be written. Terminal states never change again.
//!
//! Every status write is a compare-and-set against the state machine: the ledger rejects a
//! transition that does not follow from the current status. This is what turns a duplicate
//! delivery into a detectable conflict instead of a silent double write.
//!
//! ## Submodules
//! - **`types`**: Ids, status, records and ledger errors.
//! - **`memory`**: In-process `DashMap` ledger, lost on restart.
//! - **`sqlite`**: SQLite-backed ledger that survives restarts.

pub mod memory;
pub mod sqlite;
pub mod types;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use types::{ImageId, ImageRecord, ImageStatus, LedgerError, StatusCounts};

/// Storage contract for image records.
#[async_trait]
pub trait StatusLedger: Send + Sync {
    /// Inserts a new record. Fails if the id already exists.
    async fn insert(&self, record: ImageRecord) -> Result<(), LedgerError>;

    /// Moves the record to `status` if the state machine allows it and bumps `updated_at`.
    ///
    /// Returns the record as written.
    async fn update_status(&self, id: ImageId, status: ImageStatus) -> Result<ImageRecord, LedgerError>;

    /// Reads a record. `Ok(None)` when the id is unknown.
    async fn get(&self, id: ImageId) -> Result<Option<ImageRecord>, LedgerError>;

    /// Number of records in each status.
    async fn status_counts(&self) -> Result<StatusCounts, LedgerError>;
}
