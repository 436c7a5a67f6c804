use super::types::{AuditEntry, LockRecord, StateRecord};
use super::StateBackend;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{OptionalExtension, TransactionBehavior};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio_rusqlite::Connection;
use tracing::{debug, info, warn};

const SCHEMA_VERSION: i32 = 1;

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Outcome of the check/purge/insert sequence inside `acquire_lock`.
enum AcquireOutcome {
    Acquired { purged: Option<LockRecord> },
    Conflict(LockRecord),
}

/// SQLite-backed deployment state: one state blob per stack, a TTL lock per
/// stack, and an append-only audit log.
///
/// File-backed databases run in WAL mode with a busy timeout so a crashed
/// writer never leaves a half-written row behind.
pub struct SqliteStateBackend {
    db_path: PathBuf,
    conn: Connection,
}

impl SqliteStateBackend {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path).await?;

        conn.call(|conn: &mut rusqlite::Connection| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "busy_timeout", 5000)?;
            Ok(())
        })
        .await?;

        let backend = Self { db_path, conn };
        backend.initialize().await?;
        Ok(backend)
    }

    /// Create an ephemeral in-memory backend.
    ///
    /// Nothing touches disk. Intended for tests and dry runs.
    pub async fn new_ephemeral() -> Result<Self> {
        let conn = Connection::open(":memory:").await?;

        let backend = Self {
            db_path: PathBuf::from(":memory:"),
            conn,
        };
        backend.initialize().await?;
        Ok(backend)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn initialize(&self) -> Result<()> {
        self.conn
            .call(|conn: &mut rusqlite::Connection| -> tokio_rusqlite::Result<()> {
                conn.execute_batch(
                    r#"
                    CREATE TABLE IF NOT EXISTS schema_version (
                        version INTEGER PRIMARY KEY,
                        applied_at TEXT NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS state (
                        stackName TEXT PRIMARY KEY,
                        stateData TEXT NOT NULL,
                        updatedAt INTEGER NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS locks (
                        stackName TEXT PRIMARY KEY,
                        holder TEXT NOT NULL,
                        acquiredAt INTEGER NOT NULL,
                        ttl INTEGER NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS auditLog (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        stackName TEXT NOT NULL,
                        entryData TEXT NOT NULL,
                        createdAt INTEGER NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_audit_stack ON auditLog(stackName, id);
                    "#,
                )?;

                // Can't use placeholders in execute_batch
                conn.execute(
                    "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
                    rusqlite::params![SCHEMA_VERSION],
                )?;
                Ok(())
            })
            .await?;

        debug!("State schema ready at {:?}", self.db_path);
        Ok(())
    }

    /// Audit entries for a stack, oldest first. `limit` keeps the newest N.
    pub async fn get_audit_log(
        &self,
        stack_name: &str,
        limit: Option<usize>,
    ) -> Result<Vec<AuditEntry>> {
        let stack = stack_name.to_string();
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let rows: Vec<(i64, String, String, i64)> = self
            .conn
            .call(move |conn: &mut rusqlite::Connection| {
                let mut stmt = conn.prepare(
                    "SELECT id, stackName, entryData, createdAt FROM (
                        SELECT id, stackName, entryData, createdAt FROM auditLog
                        WHERE stackName = ?1 ORDER BY id DESC LIMIT ?2
                    ) ORDER BY id ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![stack, limit], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        Ok(rows
            .into_iter()
            .map(|(id, stack_name, data, created_at)| {
                let entry = serde_json::from_str(&data).unwrap_or_else(|e| {
                    warn!("Audit entry {} of '{}' is not valid JSON: {}", id, stack_name, e);
                    Value::String(data)
                });
                AuditEntry {
                    id,
                    stack_name,
                    entry,
                    created_at,
                }
            })
            .collect())
    }

    /// Saved state of a stack together with its `updatedAt` timestamp.
    pub async fn get_state_record(&self, stack_name: &str) -> Result<Option<StateRecord>> {
        let stack = stack_name.to_string();
        let row: Option<(String, i64)> = self
            .conn
            .call(move |conn: &mut rusqlite::Connection| {
                Ok(conn
                    .query_row(
                        "SELECT stateData, updatedAt FROM state WHERE stackName = ?1",
                        rusqlite::params![stack],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?)
            })
            .await?;

        Ok(row.and_then(|(data, updated_at)| match serde_json::from_str(&data) {
            Ok(state) => Some(StateRecord {
                stack_name: stack_name.to_string(),
                state,
                updated_at,
            }),
            Err(e) => {
                warn!(
                    "Discarding undecodable state for stack '{}': {}",
                    stack_name, e
                );
                None
            }
        }))
    }

    /// Names of all stacks with saved state.
    pub async fn list_stacks(&self) -> Result<Vec<String>> {
        let names = self
            .conn
            .call(|conn: &mut rusqlite::Connection| {
                let mut stmt = conn.prepare("SELECT stackName FROM state ORDER BY stackName")?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                Ok(names)
            })
            .await?;
        Ok(names)
    }
}

#[async_trait]
impl StateBackend for SqliteStateBackend {
    #[tracing::instrument(skip(self))]
    async fn get_state(&self, stack_name: &str) -> Result<Option<Value>> {
        let stack = stack_name.to_string();
        let raw: Option<String> = self
            .conn
            .call(move |conn: &mut rusqlite::Connection| {
                Ok(conn
                    .query_row(
                        "SELECT stateData FROM state WHERE stackName = ?1",
                        rusqlite::params![stack],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(
                    "Discarding undecodable state for stack '{}': {}",
                    stack_name, e
                );
                Ok(None)
            }
        }
    }

    #[tracing::instrument(skip(self, state))]
    async fn save_state(&self, stack_name: &str, state: &Value) -> Result<()> {
        let stack = stack_name.to_string();
        let data = serde_json::to_string(state)?;
        let updated_at = now_ms();

        self.conn
            .call(move |conn: &mut rusqlite::Connection| {
                conn.execute(
                    "INSERT INTO state (stackName, stateData, updatedAt) VALUES (?1, ?2, ?3)
                     ON CONFLICT(stackName) DO UPDATE SET
                        stateData = excluded.stateData,
                        updatedAt = excluded.updatedAt",
                    rusqlite::params![stack, data, updated_at],
                )?;
                Ok(())
            })
            .await?;

        debug!("Saved state for stack '{}'", stack_name);
        Ok(())
    }

    /// Check, purge-if-expired and insert run in one IMMEDIATE transaction,
    /// so two writers on the same database file cannot both win.
    #[tracing::instrument(skip(self))]
    async fn acquire_lock(&self, stack_name: &str, holder: &str, ttl_seconds: i64) -> Result<()> {
        let stack = stack_name.to_string();
        let new_holder = holder.to_string();
        let now = now_ms();

        let outcome = self
            .conn
            .call(move |conn: &mut rusqlite::Connection| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                let existing = tx
                    .query_row(
                        "SELECT stackName, holder, acquiredAt, ttl FROM locks WHERE stackName = ?1",
                        rusqlite::params![stack],
                        |row| {
                            Ok(LockRecord {
                                stack_name: row.get(0)?,
                                holder: row.get(1)?,
                                acquired_at: row.get(2)?,
                                ttl: row.get(3)?,
                            })
                        },
                    )
                    .optional()?;

                let mut purged = None;
                if let Some(lock) = existing {
                    if lock.is_held_at(now) {
                        return Ok(AcquireOutcome::Conflict(lock));
                    }
                    tx.execute(
                        "DELETE FROM locks WHERE stackName = ?1",
                        rusqlite::params![stack],
                    )?;
                    purged = Some(lock);
                }

                tx.execute(
                    "INSERT INTO locks (stackName, holder, acquiredAt, ttl) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![stack, new_holder, now, ttl_seconds],
                )?;
                tx.commit()?;
                Ok(AcquireOutcome::Acquired { purged })
            })
            .await?;

        match outcome {
            AcquireOutcome::Acquired { purged } => {
                if let Some(old) = purged {
                    info!(
                        "Purged expired lock on '{}' held by '{}' ({}ms old, ttl {}s)",
                        stack_name,
                        old.holder,
                        old.age_ms(now),
                        old.ttl
                    );
                }
                debug!("Lock on '{}' acquired by '{}'", stack_name, holder);
                Ok(())
            }
            AcquireOutcome::Conflict(lock) => Err(Error::LockConflict {
                stack: stack_name.to_string(),
                age_ms: lock.age_ms(now),
                holder: lock.holder,
            }),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn release_lock(&self, stack_name: &str) -> Result<()> {
        let stack = stack_name.to_string();
        let removed = self
            .conn
            .call(move |conn: &mut rusqlite::Connection| {
                Ok(conn.execute(
                    "DELETE FROM locks WHERE stackName = ?1",
                    rusqlite::params![stack],
                )?)
            })
            .await?;

        if removed == 0 {
            debug!("No lock to release on '{}'", stack_name);
        }
        Ok(())
    }

    async fn check_lock(&self, stack_name: &str) -> Result<Option<LockRecord>> {
        let stack = stack_name.to_string();
        let lock = self
            .conn
            .call(move |conn: &mut rusqlite::Connection| {
                Ok(conn
                    .query_row(
                        "SELECT stackName, holder, acquiredAt, ttl FROM locks WHERE stackName = ?1",
                        rusqlite::params![stack],
                        |row| {
                            Ok(LockRecord {
                                stack_name: row.get(0)?,
                                holder: row.get(1)?,
                                acquired_at: row.get(2)?,
                                ttl: row.get(3)?,
                            })
                        },
                    )
                    .optional()?)
            })
            .await?;
        Ok(lock)
    }

    #[tracing::instrument(skip(self, entry))]
    async fn append_audit_log(&self, stack_name: &str, entry: &Value) -> Result<()> {
        let stack = stack_name.to_string();
        let data = serde_json::to_string(entry)?;
        let now = now_ms();

        self.conn
            .call(move |conn: &mut rusqlite::Connection| {
                // Clamp to the newest row so createdAt never decreases if the wall clock steps back.
                conn.execute(
                    "INSERT INTO auditLog (stackName, entryData, createdAt)
                     VALUES (?1, ?2, MAX(?3, COALESCE((SELECT MAX(createdAt) FROM auditLog WHERE stackName = ?1), 0)))",
                    rusqlite::params![stack, data, now],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}
