//! Lease Program Errors

use crate::database::DatabaseError;
use thiserror::Error;

/// Broad class of a failure, used to decide whether a transaction is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input; rejected before touching state
    Validation,
    /// Conflicts with current ledger state; may succeed later
    StateConflict,
    /// Storage or encoding failure
    Infrastructure,
}

/// Chain errors
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("invalid empty transaction")]
    InvalidEmptyTx,

    #[error("invalid prefix: {0}")]
    InvalidPrefix(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("value too large: {size} > {max}")]
    ValueTooLarge { size: usize, max: u64 },

    #[error("invalid units: lifeline requires at least one unit")]
    InvalidUnits,

    #[error("invalid magic: expected {expected}, got {found}")]
    InvalidMagic { expected: u64, found: u64 },

    #[error("invalid signature")]
    InvalidSignature,

    #[error("block id is not recent")]
    StaleBlockId,

    #[error("duplicate transaction")]
    DuplicateTx,

    #[error("PoW failed: difficulty {difficulty} < required {required}")]
    PoWFailed { difficulty: u64, required: u64 },

    #[error("insufficient fee: requires {required} units, budget {budget}")]
    InsufficientFee { required: u64, budget: u64 },

    #[error("prefix missing")]
    PrefixMissing,

    #[error("prefix not expired")]
    PrefixNotExpired,

    #[error("unauthorized: sender does not own prefix")]
    Unauthorized,

    #[error("key missing")]
    KeyMissing,

    #[error("block has no transactions")]
    NoTxs,

    #[error("invalid block height: expected {expected}, got {found}")]
    InvalidHeight { expected: u64, found: u64 },

    #[error("invalid block timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid difficulty: expected {expected}, got {found}")]
    InvalidDifficulty { expected: u64, found: u64 },

    #[error("invalid block cost: expected {expected}, got {found}")]
    InvalidCost { expected: u64, found: u64 },

    #[error("insufficient surplus work: {surplus} < {required}")]
    InsufficientSurplus { surplus: u128, required: u128 },

    #[error("state root mismatch")]
    StateRootMismatch,

    #[error("invalid genesis: {0}")]
    InvalidGenesis(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl ChainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChainError::PrefixMissing
            | ChainError::PrefixNotExpired
            | ChainError::Unauthorized
            | ChainError::KeyMissing
            | ChainError::InsufficientFee { .. } => ErrorKind::StateConflict,
            ChainError::Codec(_) | ChainError::Database(_) => ErrorKind::Infrastructure,
            _ => ErrorKind::Validation,
        }
    }

    /// Whether a transaction failing with this error should stay in the mempool
    ///
    /// Difficulty falls back toward the floor over time, so a PoW shortfall is
    /// not permanent.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::StateConflict) || matches!(self, ChainError::PoWFailed { .. })
    }
}

impl From<bincode::Error> for ChainError {
    fn from(e: bincode::Error) -> Self {
        ChainError::Codec(e.to_string())
    }
}

impl From<std::io::Error> for ChainError {
    fn from(e: std::io::Error) -> Self {
        ChainError::Codec(e.to_string())
    }
}
