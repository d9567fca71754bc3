//! Peer-to-peer plumbing.
//!
//! - Wire messages (`message`)
//! - Replicated peer list (`peer`)
//! - Byte transports (`transport`)

pub mod message;
pub mod peer;
pub mod transport;

pub use message::{Message, MessageError};
pub use peer::{PeerEntry, PeerList};
pub use transport::{
    Inbound, MemoryNetwork, MemoryTransport, TcpTransport, Transport, TransportConfig,
};
