//! Lease Runtime - VM for the lease chain
//!
//! This crate hosts the lease program inside a node:
//! - Mempool ordered by proof-of-work difficulty
//! - Block building, verification and acceptance over staged state
//! - Background pruning of expired leases and transaction regossip
//! - sled-backed persistence

pub mod block_builder;
pub mod block_producer;
pub mod chain_index;
pub mod clock;
pub mod config;
pub mod error;
pub mod gossip;
pub mod mempool;
pub mod persistence;
pub mod pruner;
pub mod vm;


pub use block_builder::BlockBuilder;
pub use block_producer::{BlockProducer, BlockProducerConfig, BlockUpdate};
pub use chain_index::{ChainIndex, VerifiedBlock};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::VmConfig;
pub use error::{GossipError, VmError};
pub use gossip::{GossipMessage, GossipSender, Gossiper, NoopGossip};
pub use mempool::Mempool;
pub use persistence::SledDatabase;
pub use vm::Vm;
