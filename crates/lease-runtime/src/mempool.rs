//! Bounded transaction pool
//!
//! Ordered by proof-of-work difficulty (fee paid per fee unit), earlier
//! submissions first among equals. Not synchronised; the VM wraps it in a
//! lock.

use lease_program::{Id, Transaction};
use std::{
    cmp::Reverse,
    collections::{BTreeMap, HashMap},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Rank {
    priority: u64,
    /// Earlier arrivals rank higher among equal priorities
    arrival: Reverse<u64>,
}

pub struct Mempool {
    capacity: usize,
    next_arrival: u64,
    by_rank: BTreeMap<Rank, Id>,
    by_id: HashMap<Id, (Rank, Transaction)>,
}

impl Mempool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_arrival: 0,
            by_rank: BTreeMap::new(),
            by_id: HashMap::new(),
        }
    }


    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn has(&self, id: &Id) -> bool {
        self.by_id.contains_key(id)
    }

    /// Admit a transaction
    ///
    /// Returns `true` if the transaction is held after the call. When full,
    /// the lowest-ranked entry is evicted only if the new transaction has a
    /// strictly higher priority.
    pub fn add(&mut self, tx: Transaction) -> bool {
        let id = tx.id();
        if self.by_id.contains_key(&id) {
            return true;
        }

        let priority = tx.work();
        if self.by_id.len() >= self.capacity {
            let Some((&lowest, &evicted)) = self.by_rank.iter().next() else {
                return false;
            };
            if priority <= lowest.priority {
                tracing::debug!("Mempool full, rejected tx {} (priority {})", id, priority);
                return false;
            }
            self.by_rank.remove(&lowest);
            self.by_id.remove(&evicted);
            tracing::debug!("Mempool full, evicted tx {} for {}", evicted, id);
        }

        let rank = Rank {
            priority,
            arrival: Reverse(self.next_arrival),
        };
        self.next_arrival += 1;
        self.by_rank.insert(rank, id);
        self.by_id.insert(id, (rank, tx));
        true
    }

    /// Highest-priority transaction
    pub fn peek_max(&self) -> Option<&Transaction> {
        let (_, id) = self.by_rank.iter().next_back()?;
        self.by_id.get(id).map(|(_, tx)| tx)
    }

    pub fn pop_max(&mut self) -> Option<Transaction> {
        let (_, id) = self.by_rank.pop_last()?;
        self.by_id.remove(&id).map(|(_, tx)| tx)
    }

    /// Up to `n` transactions in priority order
    pub fn pop(&mut self, n: usize) -> Vec<Transaction> {
        let mut txs = Vec::with_capacity(n.min(self.len()));
        while txs.len() < n {
            match self.pop_max() {
                Some(tx) => txs.push(tx),
                None => break,
            }
        }
        txs
    }

    /// Drop the given ids, ignoring those not held
    pub fn remove(&mut self, ids: &[Id]) {
        for id in ids {
            if let Some((rank, _)) = self.by_id.remove(id) {
                self.by_rank.remove(&rank);
            }
        }
    }

    /// Snapshot of held transactions in priority order
    pub fn transactions(&self) -> Vec<Transaction> {
        self.by_rank
            .values()
            .rev()
            .filter_map(|id| self.by_id.get(id).map(|(_, tx)| tx.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use lease_program::{BaseTx, ClaimTx, UnsignedTransaction};

    /// Transaction whose work is at least `difficulty`, distinct per `prefix`
    fn tx(prefix: &str, difficulty: u64) -> Transaction {
        let key = SigningKey::from_bytes(&[5u8; 32]);
        let mut unsigned = UnsignedTransaction::Claim(ClaimTx {
            base: BaseTx {
                sender: key.verifying_key().to_bytes(),
                block_id: Id::EMPTY,
                prefix: prefix.to_string(),
                magic: 1,
                max_units: u64::MAX,
                graffiti: 0,
            },
        });
        unsigned.mine(difficulty);
        unsigned.sign(&key)
    }

    #[test]
    fn test_add_and_pop_in_priority_order() {
        let mut pool = Mempool::new(8);
        let txs: Vec<_> = ["a", "b", "c", "d"].iter().map(|p| tx(p, 1)).collect();
        for t in &txs {
            assert!(pool.add(t.clone()));
        }
        assert_eq!(pool.len(), 4);

        let popped = pool.pop(4);
        let works: Vec<u64> = popped.iter().map(|t| t.work()).collect();
        let mut sorted = works.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(works, sorted);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_duplicate_add_is_noop() {
        let mut pool = Mempool::new(2);
        let t = tx("abc", 1);
        assert!(pool.add(t.clone()));
        assert!(pool.add(t.clone()));
        assert_eq!(pool.len(), 1);
        assert!(pool.has(&t.id()));
    }

    #[test]
    fn test_full_pool_evicts_only_for_higher_priority() {
        let mut pool = Mempool::new(3);
        let low: Vec<_> = ["a", "b", "c"].iter().map(|p| tx(p, 1)).collect();
        for t in &low {
            assert!(pool.add(t.clone()));
        }
        let lowest = low.iter().map(|t| t.work()).min().unwrap();

        // Mine until strictly above every held entry
        let high = tx("high", low.iter().map(|t| t.work()).max().unwrap() + 1);
        assert!(pool.add(high.clone()));
        assert_eq!(pool.len(), 3);
        assert!(pool.has(&high.id()));
        assert!(low.iter().filter(|t| !pool.has(&t.id())).all(|t| t.work() == lowest));

        // A tx no better than the floor is refused
        let floor = pool.transactions().iter().map(|t| t.work()).min().unwrap();
        let mut weak = None;
        for i in 0..1000 {
            let candidate = tx(&format!("w{}", i), 1);
            if candidate.work() <= floor {
                weak = Some(candidate);
                break;
            }
        }
        let weak = weak.expect("a low-work tx within 1000 tries");
        assert!(!pool.add(weak.clone()));
        assert!(!pool.has(&weak.id()));
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        // Distinct transactions rarely share a work value; check the tie-break on ranks
        let a = Rank {
            priority: 7,
            arrival: Reverse(0),
        };
        let b = Rank {
            priority: 7,
            arrival: Reverse(1),
        };
        assert!(a > b);
    }

    #[test]
    fn test_remove() {
        let mut pool = Mempool::new(4);
        let first = tx("a", 1);
        let second = tx("b", 1);
        pool.add(first.clone());
        pool.add(second.clone());
        pool.remove(&[first.id()]);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.pop_max().unwrap().id(), second.id());
    }

    #[test]
    fn test_transactions_snapshot() {
        let mut pool = Mempool::new(4);
        pool.add(tx("a", 1));
        pool.add(tx("b", 1));
        let snapshot = pool.transactions();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.peek_max().map(|t| t.id()), snapshot.first().map(|t| t.id()));
    }
}
