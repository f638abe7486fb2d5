//! Lease Gossip - peer transport for transaction gossip
//!
//! WebSocket connections between nodes carry opaque gossip frames. Outbound
//! frames come from the VM through [`lease_runtime::GossipSender`]; inbound
//! frames are delivered to a [`GossipHandler`], normally the VM itself.

pub mod network;

pub use network::{GossipHandler, NetworkStats, PeerNetwork};
