//! Bounded in-memory log store.

use std::collections::VecDeque;
use std::sync::RwLock;

use super::models::{LogEntry, LogQuery};
use super::store::{LogStore, StoreError};

/// Capacity used when a non-positive one is requested.
pub const DEFAULT_CAPACITY: usize = 1000;

struct Ring {
    entries: VecDeque<LogEntry>,
    next_id: i64,
}

/// Ring buffer of the most recent entries. Once full, every append evicts
/// the oldest entry. Reads order by (timestamp, id), as the SQLite store
/// does, since probes can finish out of their start order.
pub struct RingBufferStore {
    capacity: usize,
    inner: RwLock<Ring>,
}

impl RingBufferStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 { DEFAULT_CAPACITY } else { capacity };
        Self {
            capacity,
            inner: RwLock::new(Ring {
                entries: VecDeque::with_capacity(capacity),
                next_id: 1,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl LogStore for RingBufferStore {
    fn append(&self, mut entry: LogEntry) -> Result<i64, StoreError> {
        let mut ring = self.inner.write().map_err(|_| StoreError::Poisoned)?;

        let id = ring.next_id;
        ring.next_id += 1;
        entry.id = id;

        if ring.entries.len() >= self.capacity {
            ring.entries.pop_front();
        }
        ring.entries.push_back(entry);

        Ok(id)
    }

    fn query(&self, query: &LogQuery) -> Result<Vec<LogEntry>, StoreError> {
        let ring = self.inner.read().map_err(|_| StoreError::Poisoned)?;

        let mut results: Vec<LogEntry> = ring.entries.iter().filter(|e| query.matches(e)).cloned().collect();
        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        if let Some(limit) = query.max_len() {
            results.truncate(limit);
        }

        Ok(results)
    }

    fn all_entries(&self) -> Result<Vec<LogEntry>, StoreError> {
        let ring = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        let mut entries: Vec<LogEntry> = ring.entries.iter().cloned().collect();
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(entries)
    }

    fn len(&self) -> Result<usize, StoreError> {
        let ring = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(ring.entries.len())
    }

    fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
