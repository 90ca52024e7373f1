use async_trait::async_trait;
use thiserror::Error;

use crate::config::WatchConfig;
use crate::models::{CheckCommit, FailureRecord, Snapshot, Watch, WatchId, WatchState};

mod sqlite;
pub use sqlite::SqliteStorage;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage lock poisoned")]
    Poisoned,
    #[error("watch {0} not found")]
    NotFound(WatchId),
    #[error("corrupt record for watch {0}: {1}")]
    Corrupt(WatchId, String),
}

/// Durable home of watches and their snapshot history.
///
/// `commit` and `record_failure` are atomic: either every field they carry is
/// written or none is. Both fail with `NotFound` once the watch is deleted.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn migrate(&self) -> Result<(), StoreError>;
    async fn insert_watch(&self, watch: &Watch) -> Result<(), StoreError>;
    async fn update_config(&self, id: &WatchId, config: &WatchConfig) -> Result<(), StoreError>;
    async fn load_watches(&self) -> Result<Vec<Watch>, StoreError>;
    async fn load_last(&self, id: &WatchId) -> Result<Option<Snapshot>, StoreError>;
    async fn commit(&self, id: &WatchId, commit: &CheckCommit) -> Result<(), StoreError>;
    async fn record_failure(&self, id: &WatchId, record: &FailureRecord) -> Result<(), StoreError>;
    async fn set_state(&self, id: &WatchId, state: WatchState) -> Result<(), StoreError>;
    async fn delete(&self, id: &WatchId) -> Result<(), StoreError>;
    async fn delete_all(&self) -> Result<usize, StoreError>;
}
