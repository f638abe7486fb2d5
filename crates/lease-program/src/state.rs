//! Prefix Ledger State
//!
//! Lease records, per-prefix values and the expiry index, stored in any
//! [`Database`]. Callers pass a staged view; nothing here commits.

use crate::{
    constants::*,
    database::Database,
    error::ChainError,
    id::Id,
};
use serde::{Deserialize, Serialize};

/// Lease record for one namespace
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PrefixInfo {
    /// ed25519 public key of the holder
    pub owner: [u8; 32],
    /// Claim time (unix seconds)
    pub created: u64,
    /// Last time units or expiry changed
    pub last_updated: u64,
    /// Lease is void once `expiry <= now`
    pub expiry: u64,
    /// Expiry before the most recent renewal
    pub previous_expiry: u64,
    /// 1 for the lease plus the value units of every stored key
    pub units: u64,
}

impl PrefixInfo {
    /// Fresh lease created by a claim
    pub fn new(owner: [u8; 32], now: u64, lifetime: u64) -> Self {
        Self {
            owner,
            created: now,
            last_updated: now,
            expiry: now.saturating_add(lifetime),
            previous_expiry: 0,
            units: 1,
        }
    }

    pub fn is_active(&self, now: u64) -> bool {
        self.expiry > now
    }

    /// Add lifetime spread across all units held by the prefix
    ///
    /// Returns the number of seconds added.
    pub fn extend(&mut self, reward: u64, now: u64) -> Result<u64, ChainError> {
        if self.units == 0 {
            return Err(ChainError::InvalidUnits);
        }
        let added = reward / self.units;
        self.previous_expiry = self.expiry;
        self.expiry = self.expiry.saturating_add(added);
        self.last_updated = now;
        Ok(added)
    }

    /// Change occupancy, keeping the total remaining unit-seconds constant
    pub fn set_units(&mut self, units: u64, now: u64) {
        let units = units.max(1);
        let remaining = self.expiry.saturating_sub(now) as u128 * self.units as u128;
        let life = (remaining / units as u128).min(u64::MAX as u128) as u64;
        self.expiry = now.saturating_add(life);
        self.units = units;
        self.last_updated = now;
    }
}

// ============ Keys ============

fn prefix_info_key(prefix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + prefix.len());
    key.push(PREFIX_INFO_PREFIX);
    key.push(DELIMITER);
    key.extend_from_slice(prefix);
    key
}

fn prefix_keys_prefix(prefix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(3 + prefix.len());
    key.push(PREFIX_KEY_PREFIX);
    key.push(DELIMITER);
    key.extend_from_slice(prefix);
    key.push(DELIMITER);
    key
}

fn prefix_value_key(prefix: &[u8], key: &[u8]) -> Vec<u8> {
    let mut k = prefix_keys_prefix(prefix);
    k.extend_from_slice(key);
    k
}

fn expiry_index_prefix() -> [u8; 2] {
    [EXPIRY_PREFIX, DELIMITER]
}

/// Big-endian expiry so that index iteration is in expiry order
fn expiry_key(expiry: u64, prefix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(11 + prefix.len());
    key.extend_from_slice(&expiry_index_prefix());
    key.extend_from_slice(&expiry.to_be_bytes());
    key.push(DELIMITER);
    key.extend_from_slice(prefix);
    key
}

fn parse_expiry_key(key: &[u8]) -> Option<(u64, &[u8])> {
    if key.len() < 11 {
        return None;
    }
    let expiry = u64::from_be_bytes(key[2..10].try_into().ok()?);
    Some((expiry, &key[11..]))
}

fn tx_key(id: &Id) -> Vec<u8> {
    let mut key = vec![TX_PREFIX, DELIMITER];
    key.extend_from_slice(id.as_ref());
    key
}

fn block_key(id: &Id) -> Vec<u8> {
    let mut key = vec![BLOCK_PREFIX, DELIMITER];
    key.extend_from_slice(id.as_ref());
    key
}

// ============ Prefix ledger ============

pub fn get_prefix_info(db: &dyn Database, prefix: &[u8]) -> Result<Option<PrefixInfo>, ChainError> {
    match db.get(&prefix_info_key(prefix))? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

/// Store `info` and move its expiry index entry from `previous_expiry`
pub fn put_prefix_info(
    db: &dyn Database,
    prefix: &[u8],
    info: &PrefixInfo,
    previous_expiry: u64,
) -> Result<(), ChainError> {
    db.delete(&expiry_key(previous_expiry, prefix))?;
    db.put(&prefix_info_key(prefix), &bincode::serialize(info)?)?;
    db.put(&expiry_key(info.expiry, prefix), &[])?;
    Ok(())
}

/// Remove a lease, its index entry and every value stored under it
pub fn delete_prefix_info(db: &dyn Database, prefix: &[u8]) -> Result<bool, ChainError> {
    let Some(info) = get_prefix_info(db, prefix)? else {
        return Ok(false);
    };
    db.delete(&expiry_key(info.expiry, prefix))?;
    db.delete(&prefix_info_key(prefix))?;
    delete_all_prefix_keys(db, prefix)?;
    Ok(true)
}

pub fn get_value(db: &dyn Database, prefix: &[u8], key: &[u8]) -> Result<Option<Vec<u8>>, ChainError> {
    Ok(db.get(&prefix_value_key(prefix, key))?)
}

pub fn put_value(db: &dyn Database, prefix: &[u8], key: &[u8], value: &[u8]) -> Result<(), ChainError> {
    db.put(&prefix_value_key(prefix, key), value)?;
    Ok(())
}

pub fn delete_value(db: &dyn Database, prefix: &[u8], key: &[u8]) -> Result<(), ChainError> {
    db.delete(&prefix_value_key(prefix, key))?;
    Ok(())
}

pub fn delete_all_prefix_keys(db: &dyn Database, prefix: &[u8]) -> Result<usize, ChainError> {
    let rows = db.scan_prefix(&prefix_keys_prefix(prefix), usize::MAX)?;
    for (key, _) in &rows {
        db.delete(key)?;
    }
    Ok(rows.len())
}

/// Remove up to `limit` leases whose expiry is at or before `now`
///
/// Walks the expiry index in ascending order and stops at the first entry
/// that is still live.
pub fn prune_next(db: &dyn Database, now: u64, limit: usize) -> Result<usize, ChainError> {
    let rows = db.scan_prefix(&expiry_index_prefix(), limit)?;
    let mut removals = 0;

    for (key, _) in rows {
        let Some((expiry, prefix)) = parse_expiry_key(&key) else {
            tracing::warn!("Skipping malformed expiry index key ({} bytes)", key.len());
            db.delete(&key)?;
            continue;
        };
        if expiry > now {
            break;
        }

        match get_prefix_info(db, prefix)? {
            Some(info) if info.expiry == expiry => {
                db.delete(&prefix_info_key(prefix))?;
                let keys = delete_all_prefix_keys(db, prefix)?;
                tracing::debug!(
                    "Pruned prefix {} (expiry {}, {} keys)",
                    String::from_utf8_lossy(prefix),
                    expiry,
                    keys
                );
            }
            _ => {
                tracing::debug!(
                    "Dropping stale expiry index entry for {}",
                    String::from_utf8_lossy(prefix)
                );
            }
        }
        db.delete(&key)?;
        removals += 1;
    }

    Ok(removals)
}

// ============ Chain records ============

pub fn has_transaction(db: &dyn Database, id: &Id) -> Result<bool, ChainError> {
    Ok(db.has(&tx_key(id))?)
}

pub fn put_transaction(db: &dyn Database, id: &Id) -> Result<(), ChainError> {
    db.put(&tx_key(id), &[])?;
    Ok(())
}

pub fn get_block_bytes(db: &dyn Database, id: &Id) -> Result<Option<Vec<u8>>, ChainError> {
    Ok(db.get(&block_key(id))?)
}

pub fn put_block_bytes(db: &dyn Database, id: &Id, bytes: &[u8]) -> Result<(), ChainError> {
    db.put(&block_key(id), bytes)?;
    Ok(())
}

pub fn get_last_accepted(db: &dyn Database) -> Result<Option<Id>, ChainError> {
    match db.get(LAST_ACCEPTED_KEY)? {
        Some(bytes) => {
            let arr: [u8; 32] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| ChainError::Codec("invalid last accepted id".into()))?;
            Ok(Some(Id(arr)))
        }
        None => Ok(None),
    }
}

pub fn set_last_accepted(db: &dyn Database, id: &Id) -> Result<(), ChainError> {
    db.put(LAST_ACCEPTED_KEY, id.as_ref())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDatabase;

    const OWNER: [u8; 32] = [7u8; 32];

    fn claim(db: &dyn Database, prefix: &str, now: u64, lifetime: u64) {
        let info = PrefixInfo::new(OWNER, now, lifetime);
        put_prefix_info(db, prefix.as_bytes(), &info, 0).unwrap();
    }

    #[test]
    fn test_put_get_delete() {
        let db = MemoryDatabase::new();
        assert!(get_prefix_info(&db, b"abc").unwrap().is_none());

        claim(&db, "abc", 100, 50);
        put_value(&db, b"abc", b"k1", b"v1").unwrap();

        let info = get_prefix_info(&db, b"abc").unwrap().unwrap();
        assert_eq!(info.owner, OWNER);
        assert_eq!(info.expiry, 150);
        assert_eq!(info.units, 1);

        assert!(delete_prefix_info(&db, b"abc").unwrap());
        assert!(get_prefix_info(&db, b"abc").unwrap().is_none());
        assert!(get_value(&db, b"abc", b"k1").unwrap().is_none());
        assert!(!delete_prefix_info(&db, b"abc").unwrap());
        assert!(db.is_empty());
    }

    #[test]
    fn test_put_moves_expiry_index() {
        let db = MemoryDatabase::new();
        claim(&db, "abc", 100, 50);

        let mut info = get_prefix_info(&db, b"abc").unwrap().unwrap();
        let last = info.expiry;
        info.extend(100, 120).unwrap();
        put_prefix_info(&db, b"abc", &info, last).unwrap();

        // Old index entry gone: nothing prunes at the old expiry
        assert_eq!(prune_next(&db, 150, 10).unwrap(), 0);
        assert!(get_prefix_info(&db, b"abc").unwrap().is_some());
        assert_eq!(prune_next(&db, 250, 10).unwrap(), 1);
        assert!(get_prefix_info(&db, b"abc").unwrap().is_none());
    }

    #[test]
    fn test_prune_respects_limit_and_order() {
        let db = MemoryDatabase::new();
        claim(&db, "aaa", 0, 30);
        claim(&db, "bbb", 0, 10);
        claim(&db, "ccc", 0, 20);
        claim(&db, "ddd", 0, 1000);
        put_value(&db, b"bbb", b"x", b"y").unwrap();

        assert_eq!(prune_next(&db, 100, 2).unwrap(), 2);
        // Earliest expiries first
        assert!(get_prefix_info(&db, b"bbb").unwrap().is_none());
        assert!(get_prefix_info(&db, b"ccc").unwrap().is_none());
        assert!(get_prefix_info(&db, b"aaa").unwrap().is_some());
        assert!(get_value(&db, b"bbb", b"x").unwrap().is_none());

        assert_eq!(prune_next(&db, 100, 2).unwrap(), 1);
        // Idempotent once drained
        assert_eq!(prune_next(&db, 100, 2).unwrap(), 0);
        assert!(get_prefix_info(&db, b"ddd").unwrap().is_some());
    }

    #[test]
    fn test_prune_includes_exact_expiry() {
        let db = MemoryDatabase::new();
        claim(&db, "abc", 0, 10);
        assert_eq!(prune_next(&db, 9, 1).unwrap(), 0);
        assert_eq!(prune_next(&db, 10, 1).unwrap(), 1);
    }

    #[test]
    fn test_extend_diminishing_returns() {
        let mut added = Vec::new();
        for units in 1..=4 {
            let mut info = PrefixInfo::new(OWNER, 0, 100);
            info.units = units;
            let before = info.expiry;
            added.push(info.extend(600, 0).unwrap());
            assert!(info.expiry >= before);
            assert_eq!(info.previous_expiry, before);
        }
        assert_eq!(added, vec![600, 300, 200, 150]);
    }

    #[test]
    fn test_set_units_respreads_lifetime() {
        let mut info = PrefixInfo::new(OWNER, 0, 100);
        info.set_units(2, 0);
        assert_eq!(info.expiry, 50);
        info.set_units(1, 10);
        assert_eq!(info.expiry, 10 + 80);
    }

    #[test]
    fn test_last_accepted_and_tx_markers() {
        let db = MemoryDatabase::new();
        assert!(get_last_accepted(&db).unwrap().is_none());

        let id = Id::hash(b"blk");
        set_last_accepted(&db, &id).unwrap();
        assert_eq!(get_last_accepted(&db).unwrap(), Some(id));

        let tx = Id::hash(b"tx");
        assert!(!has_transaction(&db, &tx).unwrap());
        put_transaction(&db, &tx).unwrap();
        assert!(has_transaction(&db, &tx).unwrap());
    }
}
