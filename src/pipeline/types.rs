use crate::config::Config;
use crate::ledger::types::ImageStatus;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const DEFAULT_REQUEUE_DELAY: Duration = Duration::from_secs(1);

/// Knobs the orchestrator needs, resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub raw_container: String,
    pub processed_container: String,
    pub cache_ttl: Duration,
    pub link_ttl: Duration,
    pub ingest_deadline: Duration,
    pub process_deadline: Duration,
    pub failure_write_deadline: Duration,
    pub read_deadline: Duration,
    /// Pause before a deferred delivery is handed back to the queue.
    pub requeue_delay: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            raw_container: config.storage.raw_container.clone(),
            processed_container: config.storage.processed_container.clone(),
            cache_ttl: Duration::from_secs(config.cache.ttl_secs),
            link_ttl: Duration::from_secs(config.links.ttl_secs),
            ingest_deadline: config.deadlines.ingest(),
            process_deadline: config.deadlines.process(),
            failure_write_deadline: config.deadlines.failure_write(),
            read_deadline: config.deadlines.read(),
            requeue_delay: DEFAULT_REQUEUE_DELAY,
        }
    }
}

/// What happened to a delivered envelope that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed,
    Skipped(SkipReason),
    /// The ledger could not be read. The item is untouched and the delivery goes back to the
    /// queue.
    Deferred,
}

/// Why an envelope was acknowledged without doing any work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No ledger row exists for the id.
    UnknownImage,
    /// Another delivery of the same envelope holds the item.
    InFlight,
    /// The item already reached a terminal state.
    AlreadyTerminal(ImageStatus),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnknownImage => write!(f, "no ledger record"),
            SkipReason::InFlight => write!(f, "already processing"),
            SkipReason::AlreadyTerminal(status) => write!(f, "already {}", status),
        }
    }
}

/// Live counters shared by the dispatcher and the workers.
#[derive(Debug, Default)]
pub struct PoolCounters {
    processed: AtomicUsize,
    failed: AtomicUsize,
    discarded: AtomicUsize,
    skipped: AtomicUsize,
    deferred: AtomicUsize,
}

impl PoolCounters {
    pub(crate) fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deferred(&self) {
        self.deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the worker pool's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Items that reached `completed`
    pub processed: usize,

    /// Items that ended `failed`
    pub failed: usize,

    /// Malformed envelopes dropped at the queue boundary
    pub discarded: usize,

    /// Duplicate or stale deliveries acknowledged without work
    pub skipped: usize,

    /// Deliveries requeued because the ledger was unreadable
    pub deferred: usize,
}

impl PoolStats {
    /// Deliveries settled for good; deferred ones come back and are not counted.
    pub fn total(&self) -> usize {
        self.processed + self.failed + self.discarded + self.skipped
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Processed: {}, Failed: {}, Skipped: {}, Discarded: {}, Deferred: {}, Total: {}",
            self.processed,
            self.failed,
            self.skipped,
            self.discarded,
            self.deferred,
            self.total()
        )
    }
}
