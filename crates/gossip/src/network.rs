//! WebSocket peer network
//!
//! Connections are symmetric: whichever side dialed, outbound gossip is fanned
//! out to every peer and each binary frame received is handed to the
//! [`GossipHandler`].

use futures_util::{SinkExt, StreamExt};
use lease_runtime::{GossipError, GossipSender, Vm};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::Arc,
    time::Instant,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    sync::broadcast,
    task::JoinHandle,
};
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message, WebSocketStream};

/// Outbound fan-out queue depth per peer
const CHANNEL_CAPACITY: usize = 1000;

/// Inbound side of the peer network
pub trait GossipHandler: Send + Sync + 'static {
    fn on_gossip(&self, peer: &str, msg: &[u8]);
}

impl GossipHandler for Vm {
    fn on_gossip(&self, peer: &str, msg: &[u8]) {
        match self.app_gossip(msg) {
            Ok(admitted) => {
                tracing::debug!("Gossip from {}: {} transactions admitted", peer, admitted)
            }
            Err(e) => tracing::warn!("Dropped gossip from {}: {}", peer, e),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NetworkStats {
    pub messages_broadcast: u64,
    pub messages_received: u64,
}

type Peers = Arc<RwLock<HashMap<String, Instant>>>;
type Tasks = Arc<Mutex<Vec<JoinHandle<()>>>>;

fn track(tasks: &Tasks, task: JoinHandle<()>) {
    let mut tasks = tasks.lock();
    tasks.retain(|t| !t.is_finished());
    tasks.push(task);
}

pub struct PeerNetwork {
    /// Channel feeding every connected peer
    tx: broadcast::Sender<Vec<u8>>,
    /// Connected peers and when they connected
    peers: Peers,
    stats: Arc<RwLock<NetworkStats>>,
    tasks: Tasks,
}

impl PeerNetwork {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            peers: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(NetworkStats::default())),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Accept peer connections on `addr`
    ///
    /// Returns the bound address, which differs from `addr` when port 0 was
    /// requested.
    pub async fn listen(
        &self,
        addr: &str,
        handler: Arc<dyn GossipHandler>,
    ) -> anyhow::Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        tracing::info!("Gossip listening on {}", local);

        let tx = self.tx.clone();
        let peers = self.peers.clone();
        let stats = self.stats.clone();
        let tasks = self.tasks.clone();

        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        // Subscribe before the handshake so nothing sent after
                        // the peer shows up is missed
                        let rx = tx.subscribe();
                        let handler = handler.clone();
                        let peers = peers.clone();
                        let stats = stats.clone();

                        let conn = tokio::spawn(async move {
                            match accept_async(stream).await {
                                Ok(ws) => {
                                    run_peer(ws, peer_addr.to_string(), rx, handler, peers, stats)
                                        .await
                                }
                                Err(e) => tracing::warn!("Handshake with {} failed: {}", peer_addr, e),
                            }
                        });
                        track(&tasks, conn);
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
        });
        track(&self.tasks, task);

        Ok(local)
    }

    /// Dial a peer
    pub async fn connect(&self, peer_addr: &str, handler: Arc<dyn GossipHandler>) -> anyhow::Result<()> {
        let url = format!("ws://{}", peer_addr);
        let rx = self.tx.subscribe();
        let (ws, _) = connect_async(&url).await?;
        tracing::info!("Connected to peer {}", peer_addr);

        let task = tokio::spawn(run_peer(
            ws,
            peer_addr.to_string(),
            rx,
            handler,
            self.peers.clone(),
            self.stats.clone(),
        ));
        track(&self.tasks, task);
        Ok(())
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    pub fn stats(&self) -> NetworkStats {
        *self.stats.read()
    }

    /// Stop listening and drop outbound connections
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Default for PeerNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl GossipSender for PeerNetwork {
    fn send_app_gossip(&self, msg: Vec<u8>) -> Result<(), GossipError> {
        match self.tx.send(msg) {
            Ok(n) => {
                self.stats.write().messages_broadcast += 1;
                tracing::debug!("Gossip sent to {} peers", n);
                Ok(())
            }
            Err(_) => Err(GossipError::NoPeers),
        }
    }
}

async fn run_peer<S>(
    ws: WebSocketStream<S>,
    peer: String,
    mut rx: broadcast::Receiver<Vec<u8>>,
    handler: Arc<dyn GossipHandler>,
    peers: Peers,
    stats: Arc<RwLock<NetworkStats>>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_sender, mut ws_receiver) = ws.split();
    peers.write().insert(peer.clone(), Instant::now());

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Ok(data) => {
                    if ws_sender.send(Message::Binary(data)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Peer {} lagged {} messages", peer, n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            inbound = ws_receiver.next() => match inbound {
                Some(Ok(Message::Binary(data))) => {
                    stats.write().messages_received += 1;
                    handler.on_gossip(&peer, &data);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::warn!("WebSocket error from {}: {}", peer, e);
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    let connected_at = peers.write().remove(&peer);
    match connected_at {
        Some(at) => tracing::info!("Peer {} disconnected after {:?}", peer, at.elapsed()),
        None => tracing::info!("Peer {} disconnected", peer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use lease_program::{BaseTx, ClaimTx, Database, Genesis, MemoryDatabase, UnsignedTransaction};
    use lease_runtime::{GossipMessage, ManualClock, NoopGossip, VmConfig};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Recorder {
        tx: mpsc::UnboundedSender<(String, Vec<u8>)>,
    }

    impl GossipHandler for Recorder {
        fn on_gossip(&self, peer: &str, msg: &[u8]) {
            let _ = self.tx.send((peer.to_string(), msg.to_vec()));
        }
    }

    fn recorder() -> (Arc<Recorder>, mpsc::UnboundedReceiver<(String, Vec<u8>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Recorder { tx }), rx)
    }

    async fn wait_for(cond: impl Fn() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met within 5s");
    }

    async fn linked() -> (PeerNetwork, PeerNetwork, SocketAddr) {
        let a = PeerNetwork::new();
        let b = PeerNetwork::new();
        let (a_handler, _) = recorder();
        let addr = a.listen("127.0.0.1:0", a_handler).await.unwrap();
        let (b_handler, _) = recorder();
        b.connect(&addr.to_string(), b_handler).await.unwrap();
        (a, b, addr)
    }

    #[test]
    fn test_send_without_peers() {
        let network = PeerNetwork::new();
        assert!(matches!(
            network.send_app_gossip(vec![1, 2, 3]),
            Err(GossipError::NoPeers)
        ));
        assert_eq!(network.stats(), NetworkStats::default());
    }

    #[tokio::test]
    async fn test_fan_out_both_directions() {
        let a = PeerNetwork::new();
        let b = PeerNetwork::new();
        let (a_handler, mut a_rx) = recorder();
        let (b_handler, mut b_rx) = recorder();

        let addr = a.listen("127.0.0.1:0", a_handler).await.unwrap();
        b.connect(&addr.to_string(), b_handler).await.unwrap();
        wait_for(|| a.peer_count() == 1 && b.peer_count() == 1).await;

        a.send_app_gossip(b"from a".to_vec()).unwrap();
        let (peer, msg) = tokio::time::timeout(Duration::from_secs(5), b_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(peer, addr.to_string());
        assert_eq!(msg, b"from a".to_vec());

        b.send_app_gossip(b"from b".to_vec()).unwrap();
        let (_, msg) = tokio::time::timeout(Duration::from_secs(5), a_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg, b"from b".to_vec());

        assert_eq!(a.stats().messages_broadcast, 1);
        assert_eq!(a.stats().messages_received, 1);
    }

    #[tokio::test]
    async fn test_shutdown_drops_peers() {
        let (a, b, _) = linked().await;
        wait_for(|| a.peer_count() == 1 && b.peer_count() == 1).await;

        b.shutdown();
        wait_for(|| a.peer_count() == 0).await;
    }

    #[tokio::test]
    async fn test_gossip_reaches_vm_mempool() {
        let genesis = Genesis {
            min_difficulty: 2,
            ..Default::default()
        };
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let vm = Arc::new(
            Vm::new(
                genesis.clone(),
                VmConfig::default(),
                db,
                Arc::new(ManualClock::new(100)),
                Arc::new(NoopGossip),
            )
            .unwrap(),
        );

        let a = PeerNetwork::new();
        let b = PeerNetwork::new();
        let (a_handler, _) = recorder();
        let addr = a.listen("127.0.0.1:0", a_handler).await.unwrap();
        b.connect(&addr.to_string(), vm.clone()).await.unwrap();
        wait_for(|| a.peer_count() == 1).await;

        let key = SigningKey::from_bytes(&[8u8; 32]);
        let mut unsigned = UnsignedTransaction::Claim(ClaimTx {
            base: BaseTx {
                sender: key.verifying_key().to_bytes(),
                block_id: vm.preferred(),
                prefix: "peer".to_string(),
                magic: genesis.magic,
                max_units: u64::MAX,
                graffiti: 0,
            },
        });
        unsigned.mine(vm.difficulty_estimate().unwrap());
        let tx = unsigned.sign(&key);

        a.send_app_gossip(GossipMessage { txs: vec![tx.clone()] }.to_bytes())
            .unwrap();
        wait_for(|| vm.mempool_has(&tx.id())).await;
    }
}
