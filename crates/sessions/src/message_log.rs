//! Append-only log of send attempts.
//!
//! [`SqliteMessageLog`] persists to the `messages` table and is what the
//! gateway runs with; [`MemoryMessageLog`] keeps records in a `Vec` for
//! tests and throwaway deployments.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use rg_domain::message::local_timestamp;
use rg_domain::{HistoryQuery, MessageRecord, NewMessageRecord};

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("message log task failed: {0}")]
    Task(String),
    #[error("inserted record {0} could not be read back")]
    Missing(i64),
}

pub type LogResult<T> = Result<T, LogError>;

#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Append one record and return it with its assigned `id` and `date`.
    async fn append(&self, record: NewMessageRecord) -> LogResult<MessageRecord>;

    /// Records matching `query`, oldest first.
    async fn query(&self, query: HistoryQuery) -> LogResult<Vec<MessageRecord>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SQLite
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    instanceId TEXT,
    name TEXT,
    phone TEXT,
    message TEXT,
    success BOOLEAN,
    date TEXT DEFAULT (datetime('now','localtime'))
);
CREATE INDEX IF NOT EXISTS idx_messages_instance ON messages(instanceId);
"#;

const SELECT_COLUMNS: &str = "SELECT id, instanceId, name, phone, message, success, date FROM messages";

/// Message log backed by a SQLite file.  Each call opens its own connection
/// on the blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteMessageLog {
    db_path: PathBuf,
}

impl SqliteMessageLog {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub fn open(path: impl AsRef<Path>) -> LogResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let log = Self { db_path };
        let conn = log.connect()?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!(path = %log.db_path.display(), "message log opened");
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> LogResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;
        Ok(conn)
    }

    async fn blocking<T, F>(&self, f: F) -> LogResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> LogResult<T> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            let conn = this.connect()?;
            f(&conn)
        })
        .await
        .map_err(|e| LogError::Task(e.to_string()))?
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        id: row.get(0)?,
        instance_id: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        phone: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        message: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        success: row.get::<_, Option<bool>>(5)?.unwrap_or(false),
        date: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
    })
}

#[async_trait]
impl MessageLog for SqliteMessageLog {
    async fn append(&self, record: NewMessageRecord) -> LogResult<MessageRecord> {
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO messages (instanceId, name, phone, message, success) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.instance_id.to_string(),
                    record.name,
                    record.phone,
                    record.message,
                    record.success,
                ],
            )?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                row_to_record,
            )
            .optional()?
            .ok_or(LogError::Missing(id))
        })
        .await
    }

    async fn query(&self, query: HistoryQuery) -> LogResult<Vec<MessageRecord>> {
        self.blocking(move |conn| {
            // SQLite treats a negative LIMIT as "no limit".  Values past
            // i64::MAX saturate so they keep their meaning.
            let limit = query
                .limit
                .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
                .unwrap_or(-1);
            let offset = i64::try_from(query.offset).unwrap_or(i64::MAX);
            let records = match query.instance_id {
                Some(id) => {
                    let mut stmt = conn.prepare(&format!(
                        "{SELECT_COLUMNS} WHERE instanceId = ?1 ORDER BY id LIMIT ?2 OFFSET ?3"
                    ))?;
                    let rows = stmt.query_map(params![id.to_string(), limit, offset], row_to_record)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                }
                None => {
                    let mut stmt =
                        conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id LIMIT ?1 OFFSET ?2"))?;
                    let rows = stmt.query_map(params![limit, offset], row_to_record)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                }
            };
            Ok(records)
        })
        .await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
pub struct MemoryMessageLog {
    records: Mutex<Vec<MessageRecord>>,
}

impl MemoryMessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record, oldest first.
    pub fn records(&self) -> Vec<MessageRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl MessageLog for MemoryMessageLog {
    async fn append(&self, record: NewMessageRecord) -> LogResult<MessageRecord> {
        let mut records = self.records.lock();
        let stored = MessageRecord {
            id: records.len() as i64 + 1,
            instance_id: record.instance_id.to_string(),
            name: record.name,
            phone: record.phone,
            message: record.message,
            success: record.success,
            date: local_timestamp(),
        };
        records.push(stored.clone());
        Ok(stored)
    }

    async fn query(&self, query: HistoryQuery) -> LogResult<Vec<MessageRecord>> {
        let wanted = query.instance_id.map(|id| id.to_string());
        let records = self.records.lock();
        Ok(records
            .iter()
            .filter(|r| wanted.as_deref().map_or(true, |id| r.instance_id == id))
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}
