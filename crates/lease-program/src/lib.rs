//! Lease Program - Prefix ledger and transaction execution
//!
//! Owns everything that runs inside block execution:
//! - PrefixInfo ledger with expiry index and key/value storage
//! - Claim / Lifeline / Set / Delete transactions and their fee schedule
//! - Execution context (recent window, next difficulty and cost)
//! - Block format and verification against a staged database view
//!
//! Key layout:
//! - `l`                    last accepted block id
//! - `b/<block id>`         block bytes
//! - `p/<prefix>`           PrefixInfo
//! - `k/<prefix>/<key>`     value
//! - `x/<expiry>/<prefix>`  expiry index used by pruning
//! - `t/<tx id>`            confirmed transaction marker

pub mod block;
pub mod context;
pub mod database;
pub mod error;
pub mod genesis;
pub mod id;
pub mod parser;
pub mod processor;
pub mod state;
pub mod transaction;

pub use block::{StatefulBlock, StatelessBlock};
pub use context::ExecutionContext;
pub use database::{ChangeSet, Database, DatabaseError, MemoryDatabase, VersionDb};
pub use error::{ChainError, ErrorKind};
pub use genesis::Genesis;
pub use id::Id;
pub use state::PrefixInfo;
pub use transaction::{
    BaseTx, ClaimTx, DeleteTx, LifelineTx, SetTx, Transaction, UnsignedTransaction,
};

/// Constants
pub mod constants {
    /// Maximum namespace length in bytes
    pub const MAX_PREFIX_SIZE: usize = 256;
    /// Maximum key length in bytes
    pub const MAX_KEY_SIZE: usize = 256;

    /// Separator between key segments
    pub const DELIMITER: u8 = b'/';

    // Storage key prefixes
    pub const LAST_ACCEPTED_KEY: &[u8] = b"l";
    pub const BLOCK_PREFIX: u8 = b'b';
    pub const PREFIX_INFO_PREFIX: u8 = b'p';
    pub const PREFIX_KEY_PREFIX: u8 = b'k';
    pub const EXPIRY_PREFIX: u8 = b'x';
    pub const TX_PREFIX: u8 = b't';
}
