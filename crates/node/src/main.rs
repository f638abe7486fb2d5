//! Lease Node
//!
//! Main entry point for a namespace-leasing chain node. Runs the VM with a
//! single-node block producer, the JSON-RPC service and WebSocket gossip.
//! State is persisted to sled when a data directory is given.

use anyhow::Result;
use clap::Parser;
use lease_gossip::PeerNetwork;
use lease_program::{Database, MemoryDatabase};
use lease_runtime::{BlockProducer, BlockProducerConfig, SledDatabase, SystemClock, Vm};
use rpc_server::{HttpRpcServer, RpcContext};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::NodeConfig;

/// Namespace-leasing chain node
#[derive(Parser, Debug)]
#[command(name = "lease-node")]
#[command(about = "Namespace-leasing chain node with proof-of-work fees", long_about = None)]
struct Args {
    /// Node config JSON; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Genesis JSON (production defaults when omitted)
    #[arg(long)]
    genesis: Option<PathBuf>,

    /// Data directory for persistent state (in-memory when omitted)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// HTTP RPC bind address
    #[arg(long)]
    rpc_addr: Option<String>,

    /// Gossip bind address
    #[arg(long)]
    p2p_addr: Option<String>,

    /// Peer gossip address to dial (repeatable)
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Block time in milliseconds
    #[arg(long)]
    block_time_ms: Option<u64>,

    /// Maximum pending transactions
    #[arg(long)]
    mempool_size: Option<usize>,

    /// Maximum expired leases removed per prune tick
    #[arg(long)]
    prune_limit: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Overlay command-line flags on a loaded config
    fn apply(&self, config: &mut NodeConfig) {
        if let Some(dir) = &self.data_dir {
            config.data_dir = Some(dir.clone());
        }
        if let Some(addr) = &self.rpc_addr {
            config.rpc_addr = addr.clone();
        }
        if let Some(addr) = &self.p2p_addr {
            config.p2p_addr = Some(addr.clone());
        }
        config.peers.extend(self.peers.iter().cloned());
        if let Some(ms) = self.block_time_ms {
            config.block_time_ms = ms;
        }
        if let Some(size) = self.mempool_size {
            config.vm.mempool_size = size;
        }
        if let Some(limit) = self.prune_limit {
            config.vm.prune_limit = limit;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = config::load_config(args.config.as_deref())?;
    args.apply(&mut config);
    let genesis = config::load_genesis(args.genesis.as_deref())?;

    run(config, genesis, args.verbose).await
}

async fn run(config: NodeConfig, genesis: lease_program::Genesis, verbose: bool) -> Result<()> {
    tracing::info!("Starting lease node");
    tracing::info!("  HTTP RPC: {}", config.rpc_addr);
    tracing::info!("  Gossip: {}", config.p2p_addr.as_deref().unwrap_or("disabled"));
    tracing::info!("  Peers: {}", config.peers.len());
    tracing::info!("  Block time: {}ms", config.block_time_ms);
    tracing::info!("  Data directory: {:?}", config.data_dir);

    // Open persistent store
    let db: Arc<dyn Database> = match &config.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            Arc::new(SledDatabase::open(dir)?)
        }
        None => {
            tracing::warn!("No data directory, state will not survive restarts");
            Arc::new(MemoryDatabase::new())
        }
    };

    let network = Arc::new(PeerNetwork::new());
    let vm = Arc::new(Vm::new(
        genesis,
        config.vm.clone(),
        db,
        Arc::new(SystemClock),
        network.clone(),
    )?);
    vm.start();

    if let Some(addr) = &config.p2p_addr {
        network.listen(addr, vm.clone()).await?;
    }
    for peer in &config.peers {
        if let Err(e) = network.connect(peer, vm.clone()).await {
            tracing::warn!("Could not reach peer {}: {}", peer, e);
        }
    }

    let (stop_tx, stop_rx) = watch::channel(false);

    // Spawn block producer
    let block_producer = BlockProducer::new(
        vm.clone(),
        BlockProducerConfig {
            block_time_ms: config.block_time_ms,
            verbose,
        },
    );
    let block_producer_handle = tokio::spawn(block_producer.run_async(stop_rx.clone()));

    // Start HTTP RPC server
    let http_context = Arc::new(RpcContext { vm: vm.clone() });
    let http_addr = config.rpc_addr.clone();
    let mut http_stop = stop_rx.clone();
    let http_server = tokio::spawn(async move {
        let server = HttpRpcServer::new(http_context);
        let shutdown = async move {
            let _ = http_stop.changed().await;
        };
        if let Err(e) = server.run(&http_addr, shutdown).await {
            tracing::error!("HTTP RPC server error: {}", e);
        }
    });

    tracing::info!("Lease node running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    stop_tx.send_replace(true);
    if let Err(e) = block_producer_handle.await {
        tracing::warn!("Block producer ended abnormally: {}", e);
    }
    if let Err(e) = http_server.await {
        tracing::warn!("HTTP RPC server ended abnormally: {}", e);
    }
    network.shutdown();
    vm.shutdown().await?;

    tracing::info!("Lease node stopped");

    Ok(())
}
