use super::StatusLedger;
use super::types::*;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// In-process ledger backed by a `DashMap`.
///
/// Each status update runs under the entry's shard lock, so the check against the current
/// status and the write happen atomically.
#[derive(Default)]
pub struct MemoryLedger {
    records: DashMap<ImageId, ImageRecord>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();

        for entry in self.records.iter() {
            match entry.status {
                ImageStatus::Pending => counts.pending += 1,
                ImageStatus::Processing => counts.processing += 1,
                ImageStatus::Completed => counts.completed += 1,
                ImageStatus::Failed => counts.failed += 1,
            }
        }

        counts
    }
}

#[async_trait]
impl StatusLedger for MemoryLedger {
    async fn insert(&self, record: ImageRecord) -> Result<(), LedgerError> {
        match self.records.entry(record.id) {
            Entry::Occupied(_) => Err(LedgerError::AlreadyExists(record.id)),
            Entry::Vacant(slot) => {
                tracing::debug!("Ledger insert {} ({})", record.id, record.status);
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn update_status(&self, id: ImageId, status: ImageStatus) -> Result<ImageRecord, LedgerError> {
        let mut entry = self
            .records
            .get_mut(&id)
            .ok_or(LedgerError::NotFound(id))?;

        if !entry.status.can_transition_to(status) {
            return Err(LedgerError::InvalidTransition {
                id,
                from: entry.status,
                to: status,
            });
        }

        let from = entry.status;
        entry.status = status;
        entry.updated_at = next_timestamp(entry.updated_at);

        tracing::info!("Updated image {} status: {} -> {}", id, from, status);

        Ok(entry.clone())
    }

    async fn get(&self, id: ImageId) -> Result<Option<ImageRecord>, LedgerError> {
        Ok(self.records.get(&id).map(|record| record.clone()))
    }

    async fn status_counts(&self) -> Result<StatusCounts, LedgerError> {
        Ok(MemoryLedger::status_counts(self))
    }
}
