//! Key-value database abstraction
//!
//! Execution never writes to the durable store directly. Every mutation goes
//! through a [`VersionDb`] layered on a parent database and is either committed
//! as one atomic batch or dropped.

use parking_lot::RwLock;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use thiserror::Error;

/// Staged writes: `Some(value)` is a put, `None` is a delete
pub type ChangeSet = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

#[derive(Error, Debug, Clone)]
pub enum DatabaseError {
    #[error("database closed")]
    Closed,
    #[error("storage error: {0}")]
    Storage(String),
}

/// Minimal key-value store contract consumed by the ledger
pub trait Database: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError>;

    fn has(&self, key: &[u8]) -> Result<bool, DatabaseError> {
        Ok(self.get(key)?.is_some())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DatabaseError>;

    fn delete(&self, key: &[u8]) -> Result<(), DatabaseError>;

    /// Entries whose key starts with `prefix`, in ascending key order, at most `limit`
    fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, DatabaseError>;

    /// Apply all changes atomically
    fn write_batch(&self, changes: ChangeSet) -> Result<(), DatabaseError>;

    /// Flush and release the store
    fn close(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

/// In-memory ordered store
///
/// Used for tests and for nodes running without a data directory.
#[derive(Default)]
pub struct MemoryDatabase {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn check_open(&self) -> Result<(), DatabaseError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DatabaseError::Closed);
        }
        Ok(())
    }
}

impl Database for MemoryDatabase {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
        self.check_open()?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DatabaseError> {
        self.check_open()?;
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), DatabaseError> {
        self.check_open()?;
        self.entries.write().remove(key);
        Ok(())
    }

    fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, DatabaseError> {
        self.check_open()?;
        let entries = self.entries.read();
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write_batch(&self, changes: ChangeSet) -> Result<(), DatabaseError> {
        self.check_open()?;
        let mut entries = self.entries.write();
        for (key, value) in changes {
            match value {
                Some(value) => {
                    entries.insert(key, value);
                }
                None => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<(), DatabaseError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Abortable overlay on top of a parent database
///
/// Reads fall through to the parent for keys not touched by the overlay.
/// The parent can be swapped (see [`VersionDb::set_parent`]) once the
/// parent's own overlay has been committed further down.
pub struct VersionDb {
    parent: RwLock<Arc<dyn Database>>,
    changes: RwLock<ChangeSet>,
}

impl VersionDb {
    pub fn new(parent: Arc<dyn Database>) -> Self {
        Self {
            parent: RwLock::new(parent),
            changes: RwLock::new(ChangeSet::new()),
        }
    }

    /// Write all staged changes to the parent as one batch
    pub fn commit(&self) -> Result<(), DatabaseError> {
        let changes = self.changes.read().clone();
        if changes.is_empty() {
            return Ok(());
        }
        self.parent().write_batch(changes)?;
        self.changes.write().clear();
        Ok(())
    }

    /// Drop all staged changes
    pub fn abort(&self) {
        self.changes.write().clear();
    }

    pub fn changes(&self) -> ChangeSet {
        self.changes.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.read().is_empty()
    }

    pub fn parent(&self) -> Arc<dyn Database> {
        self.parent.read().clone()
    }

    pub fn set_parent(&self, parent: Arc<dyn Database>) {
        *self.parent.write() = parent;
    }

    /// Commitment over the values written by the staged change set
    ///
    /// Deletes are left out. Claiming an expired lease wipes whatever of it
    /// the local pruner has not removed yet, so the delete set differs
    /// between nodes while the written records are the same everywhere.
    pub fn commitment(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        for (key, value) in self.changes.read().iter() {
            let Some(value) = value else {
                continue;
            };
            hasher.update(&(key.len() as u64).to_le_bytes());
            hasher.update(key);
            hasher.update(&(value.len() as u64).to_le_bytes());
            hasher.update(value);
        }
        *hasher.finalize().as_bytes()
    }
}

impl Database for VersionDb {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
        if let Some(value) = self.changes.read().get(key) {
            return Ok(value.clone());
        }
        self.parent().get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DatabaseError> {
        self.changes.write().insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), DatabaseError> {
        self.changes.write().insert(key.to_vec(), None);
        Ok(())
    }

    fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, DatabaseError> {
        let overlay: Vec<(Vec<u8>, Option<Vec<u8>>)> = self
            .changes
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        // Every overlay delete can hide at most one parent row
        let parent_rows = self
            .parent()
            .scan_prefix(prefix, limit.saturating_add(overlay.len()))?;

        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = parent_rows.into_iter().collect();
        for (key, value) in overlay {
            match value {
                Some(value) => {
                    merged.insert(key, value);
                }
                None => {
                    merged.remove(&key);
                }
            }
        }

        Ok(merged.into_iter().take(limit).collect())
    }

    fn write_batch(&self, changes: ChangeSet) -> Result<(), DatabaseError> {
        self.changes.write().extend(changes);
        Ok(())
    }
}
