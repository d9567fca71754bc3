//! Property ledger node.
//!
//! Combines the protocol components into a runnable peer:
//! - Pending pool updates (`mempool`)
//! - Ownership proofs (`proof`)
//! - Join, rejoin and block adoption (`sync`)
//! - JSON-RPC query surface (`rpc`)

pub mod config;
pub mod mempool;
pub mod node;
pub mod proof;
pub mod rpc;
pub mod sync;

pub use config::NodeConfig;
pub use node::{NodeError, NodeStats, PropertyNode};
pub use proof::{ProofCoordinator, ProofError, ProofState};
pub use rpc::start_rpc_server;
pub use sync::{AdoptOutcome, SyncError};
