//! VM Runtime Errors

use lease_program::{ChainError, DatabaseError, Id};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VmError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("block {0} not found")]
    BlockNotFound(Id),

    #[error("parent block {0} is not verified or accepted")]
    UnknownParent(Id),

    #[error("block {0} is not verified")]
    NotVerified(Id),

    #[error("invalid genesis: {0}")]
    Genesis(String),
}

impl From<DatabaseError> for VmError {
    fn from(e: DatabaseError) -> Self {
        VmError::Chain(ChainError::Database(e))
    }
}

/// Errors surfaced by gossip transports
#[derive(Error, Debug)]
pub enum GossipError {
    #[error("no peers connected")]
    NoPeers,

    #[error("malformed gossip: {0}")]
    Decode(String),
}
