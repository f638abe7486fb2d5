//! Persistence Layer for Ledger State
//!
//! Uses the sled embedded database as the durable base beneath every
//! staged view. All chain data lives in one tree so a staged change set
//! commits as a single atomic batch.

use lease_program::{ChangeSet, Database, DatabaseError};
use sled::Db;
use std::{
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
};

fn storage(e: sled::Error) -> DatabaseError {
    DatabaseError::Storage(e.to_string())
}

/// Durable [`Database`] backed by sled
pub struct SledDatabase {
    /// Sled database instance
    db: Db,
    /// Ledger tree (blocks, prefixes, values, expiry index, tx markers)
    ledger: sled::Tree,
    closed: AtomicBool,
}

impl SledDatabase {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let db = sled::open(&path).map_err(storage)?;
        let ledger = db.open_tree("ledger").map_err(storage)?;

        tracing::info!("Opened ledger database at {:?}", path.as_ref());

        Ok(Self {
            db,
            ledger,
            closed: AtomicBool::new(false),
        })
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), DatabaseError> {
        self.db.flush().map_err(storage)?;
        Ok(())
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.ledger.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ledger.is_empty()
    }

    fn ensure_open(&self) -> Result<(), DatabaseError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DatabaseError::Closed);
        }
        Ok(())
    }
}

impl Database for SledDatabase {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
        self.ensure_open()?;
        Ok(self.ledger.get(key).map_err(storage)?.map(|v| v.to_vec()))
    }

    fn has(&self, key: &[u8]) -> Result<bool, DatabaseError> {
        self.ensure_open()?;
        self.ledger.contains_key(key).map_err(storage)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DatabaseError> {
        self.ensure_open()?;
        self.ledger.insert(key, value).map_err(storage)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), DatabaseError> {
        self.ensure_open()?;
        self.ledger.remove(key).map_err(storage)?;
        Ok(())
    }

    fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, DatabaseError> {
        self.ensure_open()?;
        let mut rows = Vec::new();
        for result in self.ledger.scan_prefix(prefix).take(limit) {
            let (key, value) = result.map_err(storage)?;
            rows.push((key.to_vec(), value.to_vec()));
        }
        Ok(rows)
    }

    fn write_batch(&self, changes: ChangeSet) -> Result<(), DatabaseError> {
        self.ensure_open()?;
        let mut batch = sled::Batch::default();
        for (key, value) in changes {
            match value {
                Some(value) => batch.insert(key, value),
                None => batch.remove(key),
            }
        }
        self.ledger.apply_batch(batch).map_err(storage)?;
        Ok(())
    }

    fn close(&self) -> Result<(), DatabaseError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.flush()?;
        tracing::info!("Closed ledger database ({} entries)", self.ledger.len());
        Ok(())
    }
}
