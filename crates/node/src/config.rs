//! Node Configuration

use anyhow::Context;
use lease_program::Genesis;
use lease_runtime::VmConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// HTTP RPC bind address
    pub rpc_addr: String,
    /// Gossip bind address; no listener when unset
    pub p2p_addr: Option<String>,
    /// Peers dialed at startup
    pub peers: Vec<String>,
    /// Block time in milliseconds
    pub block_time_ms: u64,
    /// sled directory; state is kept in memory when unset
    pub data_dir: Option<PathBuf>,
    pub vm: VmConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc_addr: "127.0.0.1:9650".to_string(),
            p2p_addr: None,
            peers: Vec::new(),
            block_time_ms: lease_runtime::block_producer::BLOCK_TIME_MS,
            data_dir: None,
            vm: VmConfig::default(),
        }
    }
}

/// Read a genesis JSON file, or production defaults when no path is given
pub fn load_genesis(path: Option<&Path>) -> anyhow::Result<Genesis> {
    let genesis = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading genesis {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing genesis {}", path.display()))?
        }
        None => Genesis::default(),
    };
    genesis
        .verify()
        .map_err(|e| anyhow::anyhow!("invalid genesis: {}", e))?;
    Ok(genesis)
}

/// Read a node config JSON file, or defaults when no path is given
pub fn load_config(path: Option<&Path>) -> anyhow::Result<NodeConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
        }
        None => Ok(NodeConfig::default()),
    }
}
