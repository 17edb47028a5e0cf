//! Ledger Module Tests
//!
//! ## Test Scopes
//! - **State machine**: Allowed and rejected transitions, terminal states.
//! - **MemoryLedger**: Insert/get/update semantics and timestamp monotonicity.
//! - **SqliteLedger**: The same contract on a database file, and records surviving a reopen.
//! - **Wire format**: Status and id serialization used by the cache and the envelope.

#[cfg(test)]
mod tests {
    use crate::ledger::StatusLedger;
    use crate::ledger::memory::MemoryLedger;
    use crate::ledger::sqlite::SqliteLedger;
    use crate::ledger::types::*;
    use std::sync::Arc;

    fn pending_record() -> ImageRecord {
        ImageRecord::pending(ImageId::new(), "cat.jpg", "raw-images")
    }

    // ============================================================
    // TEST 1: State machine
    // ============================================================

    #[test]
    fn test_allowed_transitions() {
        use ImageStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
    }

    #[test]
    fn test_terminal_states_never_transition() {
        use ImageStatus::*;

        for terminal in [Completed, Failed] {
            assert!(terminal.is_terminal());
            for next in [Pending, Processing, Completed, Failed] {
                assert!(
                    !terminal.can_transition_to(next),
                    "{} -> {} must be rejected",
                    terminal,
                    next
                );
            }
        }
    }

    #[test]
    fn test_no_backwards_transitions() {
        use ImageStatus::*;

        assert!(!Processing.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Processing));
    }

    // ============================================================
    // TEST 2: MemoryLedger
    // ============================================================

    #[tokio::test]
    async fn test_insert_then_get() {
        let ledger = MemoryLedger::new();
        let record = pending_record();

        ledger.insert(record.clone()).await.unwrap();

        let stored = ledger.get(record.id).await.unwrap().expect("record missing");
        assert_eq!(stored, record);
        assert_eq!(stored.status, ImageStatus::Pending);
    }

    #[tokio::test]
    async fn test_insert_duplicate_is_rejected() {
        let ledger = MemoryLedger::new();
        let record = pending_record();

        ledger.insert(record.clone()).await.unwrap();
        let result = ledger.insert(record.clone()).await;

        assert!(matches!(result, Err(LedgerError::AlreadyExists(id)) if id == record.id));
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_get_unknown_returns_none() {
        let ledger = MemoryLedger::new();
        assert!(ledger.get(ImageId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_unknown_is_not_found() {
        let ledger = MemoryLedger::new();
        let id = ImageId::new();

        let result = ledger.update_status(id, ImageStatus::Processing).await;
        assert!(matches!(result, Err(LedgerError::NotFound(missing)) if missing == id));
    }

    #[tokio::test]
    async fn test_full_lifecycle_bumps_updated_at() {
        let ledger = MemoryLedger::new();
        let record = pending_record();
        let id = record.id;
        ledger.insert(record.clone()).await.unwrap();

        let processing = ledger.update_status(id, ImageStatus::Processing).await.unwrap();
        let completed = ledger.update_status(id, ImageStatus::Completed).await.unwrap();

        assert!(processing.updated_at > record.updated_at);
        assert!(completed.updated_at > processing.updated_at);
        assert_eq!(completed.created_at, record.created_at);
        assert_eq!(completed.status, ImageStatus::Completed);
    }

    #[tokio::test]
    async fn test_update_rejects_leaving_terminal_state() {
        let ledger = MemoryLedger::new();
        let record = pending_record();
        let id = record.id;
        ledger.insert(record).await.unwrap();
        ledger.update_status(id, ImageStatus::Failed).await.unwrap();

        let result = ledger.update_status(id, ImageStatus::Processing).await;

        match result {
            Err(LedgerError::InvalidTransition { from, to, .. }) => {
                assert_eq!(from, ImageStatus::Failed);
                assert_eq!(to, ImageStatus::Processing);
            }
            other => panic!("expected InvalidTransition, got {:?}", other),
        }
        let stored = ledger.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, ImageStatus::Failed);
    }

    #[tokio::test]
    async fn test_concurrent_claims_only_one_wins() {
        // Many tasks race to claim the same item; the compare-and-set admits exactly one.
        let ledger = Arc::new(MemoryLedger::new());
        let record = pending_record();
        let id = record.id;
        ledger.insert(record).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.update_status(id, ImageStatus::Processing).await.is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_status_counts() {
        let ledger = MemoryLedger::new();
        let a = pending_record();
        let b = pending_record();
        let c = pending_record();
        ledger.insert(a.clone()).await.unwrap();
        ledger.insert(b.clone()).await.unwrap();
        ledger.insert(c.clone()).await.unwrap();

        ledger.update_status(b.id, ImageStatus::Processing).await.unwrap();
        ledger.update_status(c.id, ImageStatus::Processing).await.unwrap();
        ledger.update_status(c.id, ImageStatus::Completed).await.unwrap();

        let counts = ledger.status_counts();
        assert_eq!(
            counts,
            StatusCounts {
                pending: 1,
                processing: 1,
                completed: 1,
                failed: 0
            }
        );
    }

    // ============================================================
    // TEST 3: Wire format
    // ============================================================

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&ImageStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");

        let parsed: ImageStatus = "processing".parse().unwrap();
        assert_eq!(parsed, ImageStatus::Processing);
        assert!("PROCESSING".parse::<ImageStatus>().is_err());
    }

    #[test]
    fn test_object_names() {
        let id: ImageId = "6f1c2a8e-3b4d-4e5f-8a9b-0c1d2e3f4a5b".parse().unwrap();

        assert_eq!(
            id.raw_object_name(".jpg"),
            "6f1c2a8e-3b4d-4e5f-8a9b-0c1d2e3f4a5b.jpg"
        );
        assert_eq!(
            id.derived_object_name(),
            "6f1c2a8e-3b4d-4e5f-8a9b-0c1d2e3f4a5b.png"
        );
        assert_eq!(
            serde_json::to_string(&id).unwrap(),
            "\"6f1c2a8e-3b4d-4e5f-8a9b-0c1d2e3f4a5b\""
        );
    }

    #[test]
    fn test_next_timestamp_is_strictly_increasing() {
        let future = chrono::Utc::now() + chrono::Duration::seconds(60);
        let next = next_timestamp(future);
        assert!(next > future);
    }

    // ============================================================
    // TEST 4: SqliteLedger
    // ============================================================

    #[tokio::test]
    async fn test_sqlite_insert_then_get() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let record = pending_record();

        ledger.insert(record.clone()).await.unwrap();

        let stored = ledger.get(record.id).await.unwrap().expect("record missing");
        assert_eq!(stored, record);
        assert!(ledger.get(ImageId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_duplicate_and_unknown() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let record = pending_record();
        ledger.insert(record.clone()).await.unwrap();

        let duplicate = ledger.insert(record.clone()).await;
        let missing = ImageId::new();
        let unknown = ledger.update_status(missing, ImageStatus::Processing).await;

        assert!(matches!(duplicate, Err(LedgerError::AlreadyExists(id)) if id == record.id));
        assert!(matches!(unknown, Err(LedgerError::NotFound(id)) if id == missing));
    }

    #[tokio::test]
    async fn test_sqlite_lifecycle_and_terminal_states() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let record = pending_record();
        let id = record.id;
        ledger.insert(record.clone()).await.unwrap();

        let processing = ledger.update_status(id, ImageStatus::Processing).await.unwrap();
        let completed = ledger.update_status(id, ImageStatus::Completed).await.unwrap();
        let late_failure = ledger.update_status(id, ImageStatus::Failed).await;

        assert!(processing.updated_at > record.updated_at);
        assert!(completed.updated_at > processing.updated_at);
        assert!(matches!(
            late_failure,
            Err(LedgerError::InvalidTransition {
                from: ImageStatus::Completed,
                to: ImageStatus::Failed,
                ..
            })
        ));
        let stored = ledger.get(id).await.unwrap().unwrap();
        assert_eq!(stored, completed);
    }

    #[tokio::test]
    async fn test_sqlite_concurrent_claims_only_one_wins() {
        let ledger = Arc::new(SqliteLedger::open_in_memory().unwrap());
        let record = pending_record();
        let id = record.id;
        ledger.insert(record).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.update_status(id, ImageStatus::Processing).await.is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_sqlite_status_counts() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let a = pending_record();
        let b = pending_record();
        ledger.insert(a.clone()).await.unwrap();
        ledger.insert(b.clone()).await.unwrap();
        ledger.update_status(b.id, ImageStatus::Failed).await.unwrap();

        let counts = ledger.status_counts().await.unwrap();

        assert_eq!(
            counts,
            StatusCounts {
                pending: 1,
                processing: 0,
                completed: 0,
                failed: 1
            }
        );
    }

    #[tokio::test]
    async fn test_sqlite_records_survive_reopen() {
        // ARRANGE
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("ledger.db");
        let record = pending_record();
        {
            let ledger = SqliteLedger::open(&path).unwrap();
            ledger.insert(record.clone()).await.unwrap();
            ledger.update_status(record.id, ImageStatus::Processing).await.unwrap();
        }

        // ACT
        let reopened = SqliteLedger::open(&path).unwrap();

        // ASSERT
        let stored = reopened.get(record.id).await.unwrap().expect("record survives");
        assert_eq!(stored.status, ImageStatus::Processing);
        assert_eq!(stored.filename, "cat.jpg");
        assert_eq!(stored.created_at, record.created_at);
        let completed = reopened.update_status(record.id, ImageStatus::Completed).await.unwrap();
        assert_eq!(completed.status, ImageStatus::Completed);
    }
}
