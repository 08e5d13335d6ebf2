//! The log store contract and backend selection.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use super::memory::RingBufferStore;
use super::models::{LogEntry, LogQuery};
use super::sqlite::SqliteStore;

/// Database error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("schema migration failed: {0}")]
    Migration(String),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("store is closed")]
    Closed,
}

/// Append-and-query storage for probe history.
pub trait LogStore: Send + Sync {
    /// Store an entry and return the id assigned to it.
    fn append(&self, entry: LogEntry) -> Result<i64, StoreError>;

    /// Matching entries, newest first.
    fn query(&self, query: &LogQuery) -> Result<Vec<LogEntry>, StoreError>;

    /// Full retained history, oldest first.
    fn all_entries(&self) -> Result<Vec<LogEntry>, StoreError>;

    /// Number of retained entries.
    fn len(&self) -> Result<usize, StoreError>;

    fn close(&self) -> Result<(), StoreError>;
}

/// Which backend a process runs with.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageBackend {
    Sqlite { path: PathBuf },
    Memory { capacity: usize },
}

/// Open the configured backend.
pub fn open_store(backend: &StorageBackend) -> Result<Arc<dyn LogStore>, StoreError> {
    match backend {
        StorageBackend::Sqlite { path } => {
            let store = SqliteStore::new(path)?;
            tracing::info!("Log store: SQLite at {}", path.display());
            Ok(Arc::new(store))
        }
        StorageBackend::Memory { capacity } => {
            let store = RingBufferStore::new(*capacity);
            tracing::info!("Log store: in-memory ring buffer ({} entries)", store.capacity());
            Ok(Arc::new(store))
        }
    }
}
