//! RPC Server - JSON-RPC for the lease node
//!
//! Exposes the service verbs over HTTP:
//! - ping, issueTx, checkTx
//! - currBlock, validBlockID, difficultyEstimate
//! - prefixInfo

pub mod http_server;
pub mod methods;

pub use http_server::HttpRpcServer;
pub use methods::{RpcContext, RpcError};
