//! Chain index
//!
//! Tracks the last accepted block, the preferred head and every block that
//! has been verified but not yet decided, each with the staged view holding
//! its changes.

use crate::error::VmError;
use lease_program::{state, ChainError, Database, Id, StatelessBlock, VersionDb};
use std::{collections::HashMap, sync::Arc};

/// A block that passed verification, with its uncommitted state
#[derive(Clone)]
pub struct VerifiedBlock {
    pub block: StatelessBlock,
    pub state: Arc<VersionDb>,
}

pub struct ChainIndex {
    db: Arc<dyn Database>,
    last_accepted: StatelessBlock,
    preferred: Id,
    verified: HashMap<Id, VerifiedBlock>,
}

impl ChainIndex {
    pub fn new(db: Arc<dyn Database>, last_accepted: StatelessBlock) -> Self {
        let preferred = last_accepted.id();
        Self {
            db,
            last_accepted,
            preferred,
            verified: HashMap::new(),
        }
    }

    pub fn last_accepted(&self) -> &StatelessBlock {
        &self.last_accepted
    }

    pub fn preferred(&self) -> Id {
        self.preferred
    }

    pub fn set_preferred(&mut self, id: Id) -> Result<(), VmError> {
        if id != self.last_accepted.id() && !self.verified.contains_key(&id) {
            return Err(VmError::BlockNotFound(id));
        }
        self.preferred = id;
        Ok(())
    }

    pub fn is_verified(&self, id: &Id) -> bool {
        self.verified.contains_key(id)
    }

    /// Look a block up among pending, last accepted and stored blocks
    pub fn get_block(&self, id: &Id) -> Result<Option<StatelessBlock>, ChainError> {
        if let Some(v) = self.verified.get(id) {
            return Ok(Some(v.block.clone()));
        }
        if *id == self.last_accepted.id() {
            return Ok(Some(self.last_accepted.clone()));
        }
        match state::get_block_bytes(self.db.as_ref(), id)? {
            Some(bytes) => Ok(Some(StatelessBlock::parse(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Database view as of the end of block `id`
    ///
    /// Only the last accepted block and pending blocks have a view.
    pub fn state_of(&self, id: &Id) -> Option<Arc<dyn Database>> {
        if *id == self.last_accepted.id() {
            return Some(self.db.clone());
        }
        self.verified
            .get(id)
            .map(|v| v.state.clone() as Arc<dyn Database>)
    }

    pub fn insert_verified(&mut self, block: StatelessBlock, state: Arc<VersionDb>) {
        self.verified.insert(block.id(), VerifiedBlock { block, state });
    }

    pub fn verified(&self, id: &Id) -> Option<VerifiedBlock> {
        self.verified.get(id).cloned()
    }

    pub fn take_verified(&mut self, id: &Id) -> Option<VerifiedBlock> {
        self.verified.remove(id)
    }

    pub fn set_last_accepted(&mut self, block: StatelessBlock) {
        if self.preferred == block.parent {
            self.preferred = block.id();
        }
        self.last_accepted = block;
    }

    /// Re-point pending children of the last accepted block at the base database
    ///
    /// Needed after the accepted block's own view is committed into the base.
    pub fn set_children_db(&self) -> usize {
        let parent = self.last_accepted.id();
        let mut updated = 0;
        for v in self.verified.values() {
            if v.block.parent == parent {
                v.state.set_parent(self.db.clone());
                updated += 1;
            }
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lease_program::{Genesis, MemoryDatabase, StatefulBlock};

    fn child(parent: &StatelessBlock) -> StatelessBlock {
        StatelessBlock::new(StatefulBlock {
            parent: parent.id(),
            height: parent.height + 1,
            timestamp: parent.timestamp + 1,
            difficulty: parent.difficulty,
            cost: parent.cost,
            state_root: [0u8; 32],
            txs: Vec::new(),
        })
    }

    #[test]
    fn test_lookup_and_preference() {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let root = StatelessBlock::genesis(&Genesis::default());
        let mut index = ChainIndex::new(db.clone(), root.clone());
        assert_eq!(index.preferred(), root.id());

        let b1 = child(&root);
        assert!(index.set_preferred(b1.id()).is_err());

        index.insert_verified(b1.clone(), Arc::new(VersionDb::new(db.clone())));
        index.set_preferred(b1.id()).unwrap();
        assert_eq!(index.get_block(&b1.id()).unwrap(), Some(b1.clone()));
        assert!(index.state_of(&b1.id()).is_some());
        assert!(index.get_block(&Id::hash(b"unknown")).unwrap().is_none());
    }

    #[test]
    fn test_set_children_db_after_accept() {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let root = StatelessBlock::genesis(&Genesis::default());
        let mut index = ChainIndex::new(db.clone(), root.clone());

        let b1 = child(&root);
        let s1 = Arc::new(VersionDb::new(db.clone()));
        s1.put(b"k", b"1").unwrap();
        index.insert_verified(b1.clone(), s1.clone());

        let b2 = child(&b1);
        let s2 = Arc::new(VersionDb::new(s1.clone()));
        index.insert_verified(b2.clone(), s2.clone());

        // Accept b1: commit its view and hand b2 over to the base
        let accepted = index.take_verified(&b1.id()).unwrap();
        accepted.state.commit().unwrap();
        index.set_last_accepted(accepted.block);
        assert_eq!(index.set_children_db(), 1);

        assert_eq!(s2.get(b"k").unwrap(), Some(b"1".to_vec()));
        s2.put(b"k", b"2").unwrap();
        s2.commit().unwrap();
        assert_eq!(db.get(b"k").unwrap(), Some(b"2".to_vec()));
    }
}
