//! Durable deployment state: per-stack state blobs, TTL locks and an
//! append-only audit trail.
//!
//! The [`StateBackend`] trait is the contract the orchestrator depends on;
//! [`SqliteStateBackend`] is the shipped implementation.

mod sqlite;
mod types;

pub use sqlite::SqliteStateBackend;
pub use types::{AuditEntry, LockRecord, StateRecord};

pub(crate) use sqlite::now_ms;

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Storage contract for deployment state.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Saved state of a stack. Missing or undecodable rows are `None`.
    async fn get_state(&self, stack_name: &str) -> Result<Option<Value>>;

    /// Upsert the state of a stack; the last write wins.
    async fn save_state(&self, stack_name: &str, state: &Value) -> Result<()>;

    /// Take the stack's lock for `ttl_seconds`.
    ///
    /// Fails with [`Error::LockConflict`](crate::Error::LockConflict) while a
    /// non-expired lock exists. An expired lock is purged first.
    async fn acquire_lock(&self, stack_name: &str, holder: &str, ttl_seconds: i64) -> Result<()>;

    /// Delete the stack's lock. Releasing a missing lock is not an error.
    async fn release_lock(&self, stack_name: &str) -> Result<()>;

    /// Current lock row, expired or not. Never purges.
    async fn check_lock(&self, stack_name: &str) -> Result<Option<LockRecord>>;

    /// Append an entry to the stack's audit trail.
    async fn append_audit_log(&self, stack_name: &str, entry: &Value) -> Result<()>;
}
