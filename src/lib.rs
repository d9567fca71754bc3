//! deedchain: a peer-to-peer property ownership ledger.
//!
//! Every node keeps a copy of an append-only chain of blocks recording
//! registrations and transfers of real-estate assets:
//! - Merkle blocks with tamper-evident hashing
//! - Randomized-delay minting that discards stale attempts
//! - Interactive ownership proofs run against every peer
//! - Peer sync over an opaque byte transport

pub mod chain;
pub mod consensus;
pub mod crypto;
pub mod network;
pub mod node;
pub mod storage;
pub mod types;

// Re-export core types for convenience
pub use chain::{AppendOutcome, Ledger};
pub use consensus::{ConsensusEngine, MintDelay, MintOutcome};
pub use crypto::{CryptoGroup, OwnershipKeyPair};
pub use network::{Message, MemoryNetwork, TcpTransport, Transport};
pub use node::{NodeConfig, NodeError, PropertyNode};
pub use storage::{FileStore, MemoryStore, StateStore};
pub use types::{Asset, AssetRecord, Block, Transaction};
