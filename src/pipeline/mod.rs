//! Image Pipeline Module
//!
//! The asynchronous core of the service.
//!
//! ## Flow
//! ingest -> store raw blob -> write `pending` -> publish envelope -> [async] dispatch ->
//! `processing` -> transform -> store derived blob -> `completed` / `failed` -> invalidate cache.
//!
//! Reads go cache first, then the ledger, repopulating the cache on a miss.
//!
//! ## Submodules
//! - **`orchestrator`**: `Pipeline` with the ingest, process and describe operations.
//! - **`worker`**: Dispatch loop and bounded worker pool.
//! - **`deadline`**: Per-path time budgets.
//! - **`types`**: Settings, outcomes and pool counters.

pub mod deadline;
pub mod orchestrator;
pub mod types;
pub mod worker;
