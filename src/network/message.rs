//! Wire messages exchanged between peers.
//!
//! Every payload is a UTF-8 JSON record `{"tag": ..., "data": ...}`.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;

use super::peer::PeerList;
use crate::chain::BlockIndex;
use crate::crypto::Challenge;
use crate::storage::state::{PropertyMap, TransactionMap};
use crate::storage::StateSnapshot;
use crate::types::{AssetRecord, BlockHash, PeerId, Transaction, TransactionId};

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Malformed message: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Every message a peer can send.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", content = "data", rename_all = "snake_case")]
pub enum Message {
    // === Bootstrap ===
    /// A new node announces itself to the rendezvous
    NewUser { peer_id: PeerId, address: SocketAddr },
    /// Full replicated state for a joining or rejoining node
    NewUserResponse(StateSnapshot),
    /// Current peer list
    PeerListUpdate(PeerList),
    /// A returning node asks for fresh state
    RequestUpdate { peer_id: PeerId, address: SocketAddr },

    // === Pending pool ===
    /// Assets to union into the pending properties
    TempProperties(PropertyMap),
    /// Transactions to union into the pending transactions
    TempTransactions(TransactionMap),

    // === Consensus ===
    /// Winner's block index and head
    NewBlock { blocks: BlockIndex, head: BlockHash },

    // === Ownership proof ===
    /// Prover's commitment for a transfer
    ProofCommit {
        transaction: Transaction,
        h: u64,
        public_key: u64,
        p: u64,
        g: u64,
    },
    /// Verifier's challenge bit
    ProofChallenge { transaction: TransactionId, b: Challenge },
    /// Prover's answer to a challenge
    ProofResponse {
        transaction: TransactionId,
        s: u64,
        owner_details: AssetRecord,
    },
    /// Verifier's verdict
    ProofResult { transaction: TransactionId, accepted: bool },
}

impl Message {
    /// Wire tag of this message.
    pub fn tag(&self) -> &'static str {
        match self {
            Message::NewUser { .. } => "new_user",
            Message::NewUserResponse(_) => "new_user_response",
            Message::PeerListUpdate(_) => "peer_list_update",
            Message::RequestUpdate { .. } => "request_update",
            Message::TempProperties(_) => "temp_properties",
            Message::TempTransactions(_) => "temp_transactions",
            Message::NewBlock { .. } => "new_block",
            Message::ProofCommit { .. } => "proof_commit",
            Message::ProofChallenge { .. } => "proof_challenge",
            Message::ProofResponse { .. } => "proof_response",
            Message::ProofResult { .. } => "proof_result",
        }
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        serde_json::to_vec(self).map_err(MessageError::Encode)
    }

    /// Deserialize from bytes. Unknown tags and missing fields are errors.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        serde_json::from_slice(bytes).map_err(MessageError::Decode)
    }
}
