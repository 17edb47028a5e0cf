use super::StatusLedger;
use super::types::*;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS images (
        id          TEXT PRIMARY KEY,
        filename    TEXT NOT NULL,
        status      TEXT NOT NULL,
        bucket_name TEXT NOT NULL,
        created_at  TEXT NOT NULL,
        updated_at  TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_images_status ON images(status);
";

const SELECT_RECORD: &str =
    "SELECT id, filename, status, bucket_name, created_at, updated_at FROM images WHERE id = ?1";

/// Durable ledger in a SQLite database file.
///
/// Status writes are compare-and-set statements (`... WHERE id = ? AND status = ?`) inside an
/// immediate transaction, so two processes sharing the file cannot both claim an item.
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                LedgerError::Unavailable(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::info!("Ledger database at {} (journal mode {})", path.display(), mode);

        Self::init(conn)
    }

    /// A private database that disappears with the value.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, LedgerError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` on the connection off the async runtime.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut Connection) -> Result<T, LedgerError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| LedgerError::Unavailable("ledger connection poisoned".into()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| LedgerError::Unavailable(format!("ledger task failed: {}", e)))?
    }
}

#[async_trait]
impl StatusLedger for SqliteLedger {
    async fn insert(&self, record: ImageRecord) -> Result<(), LedgerError> {
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO images (id, filename, status, bucket_name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id.to_string(),
                    record.filename,
                    record.status.as_str(),
                    record.bucket_name,
                    format_timestamp(record.created_at),
                    format_timestamp(record.updated_at),
                ],
            )?;

            if inserted == 0 {
                return Err(LedgerError::AlreadyExists(record.id));
            }
            tracing::debug!("Ledger insert {} ({})", record.id, record.status);
            Ok(())
        })
        .await
    }

    async fn update_status(&self, id: ImageId, status: ImageStatus) -> Result<ImageRecord, LedgerError> {
        self.with_conn(move |conn| {
            let key = id.to_string();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let current = tx
                .query_row(SELECT_RECORD, params![key], RawRecord::from_row)
                .optional()?
                .ok_or(LedgerError::NotFound(id))?
                .into_record()?;

            if !current.status.can_transition_to(status) {
                return Err(LedgerError::InvalidTransition {
                    id,
                    from: current.status,
                    to: status,
                });
            }

            let updated_at = next_timestamp(current.updated_at);
            let changed = tx.execute(
                "UPDATE images SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![
                    status.as_str(),
                    format_timestamp(updated_at),
                    key,
                    current.status.as_str()
                ],
            )?;
            if changed != 1 {
                return Err(LedgerError::InvalidTransition {
                    id,
                    from: current.status,
                    to: status,
                });
            }
            tx.commit()?;

            tracing::info!("Updated image {} status: {} -> {}", id, current.status, status);

            Ok(ImageRecord {
                status,
                updated_at,
                ..current
            })
        })
        .await
    }

    async fn get(&self, id: ImageId) -> Result<Option<ImageRecord>, LedgerError> {
        self.with_conn(move |conn| {
            conn.query_row(SELECT_RECORD, params![id.to_string()], RawRecord::from_row)
                .optional()?
                .map(RawRecord::into_record)
                .transpose()
        })
        .await
    }

    async fn status_counts(&self) -> Result<StatusCounts, LedgerError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM images GROUP BY status")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

            let mut counts = StatusCounts::default();
            for row in rows {
                let (status, count) = row?;
                let count = count as usize;
                match parse_status(&status)? {
                    ImageStatus::Pending => counts.pending = count,
                    ImageStatus::Processing => counts.processing = count,
                    ImageStatus::Completed => counts.completed = count,
                    ImageStatus::Failed => counts.failed = count,
                }
            }
            Ok(counts)
        })
        .await
    }
}

/// Column values as stored, before parsing.
struct RawRecord {
    id: String,
    filename: String,
    status: String,
    bucket_name: String,
    created_at: String,
    updated_at: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            filename: row.get(1)?,
            status: row.get(2)?,
            bucket_name: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn into_record(self) -> Result<ImageRecord, LedgerError> {
        Ok(ImageRecord {
            id: self
                .id
                .parse()
                .map_err(|e| LedgerError::Corrupt(format!("bad id {}: {}", self.id, e)))?,
            filename: self.filename,
            status: parse_status(&self.status)?,
            bucket_name: self.bucket_name,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn parse_status(value: &str) -> Result<ImageStatus, LedgerError> {
    value.parse().map_err(LedgerError::Corrupt)
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| LedgerError::Corrupt(format!("bad timestamp {}: {}", value, e)))
}
