//! Blocks and merkle roots over transaction ids.

use super::{sha256_hex, timestamp_now, BlockHash, TransactionId};
use serde::{Deserialize, Serialize};

/// Merkle root recorded for blocks without transactions.
pub const EMPTY_MERKLE_ROOT: &str = "None";

/// Block header. The block hash is derived from these three fields only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Hash of the previous block ("" for genesis)
    pub prev_hash: BlockHash,

    /// Wall-clock time the block was minted
    pub timestamp: String,

    /// Merkle root of the transaction ids
    pub merkle_root: String,
}

/// Block body.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBody {
    /// Committed transaction ids, in pool order
    pub transactions: Vec<TransactionId>,
}

/// An immutable ledger block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub body: BlockBody,
}

impl Block {
    /// Mint a block on top of `prev_hash` over the given transaction ids.
    pub fn new(prev_hash: impl Into<BlockHash>, transactions: Vec<TransactionId>) -> Self {
        let merkle_root = compute_merkle_root(&transactions);
        Self {
            header: BlockHeader {
                prev_hash: prev_hash.into(),
                timestamp: timestamp_now(),
                merkle_root,
            },
            body: BlockBody { transactions },
        }
    }

    /// Create a genesis block.
    pub fn genesis() -> Self {
        Self::new(String::new(), vec![])
    }

    /// Whether this block starts a chain.
    pub fn is_genesis(&self) -> bool {
        self.header.prev_hash.is_empty()
    }

    /// SHA-256 over `prev_hash ∥ timestamp ∥ merkle_root`.
    ///
    /// Pure: two blocks with identical headers share a hash.
    pub fn hash(&self) -> BlockHash {
        let header = &self.header;
        let mut input =
            String::with_capacity(header.prev_hash.len() + header.timestamp.len() + 64);
        input.push_str(&header.prev_hash);
        input.push_str(&header.timestamp);
        input.push_str(&header.merkle_root);
        sha256_hex(&input)
    }

    /// Check that the stored merkle root matches the body.
    pub fn has_consistent_root(&self) -> bool {
        compute_merkle_root(&self.body.transactions) == self.header.merkle_root
    }
}

/// Compute the merkle root of an ordered list of transaction ids.
///
/// Odd levels duplicate their last element, adjacent entries are concatenated
/// and hashed, until a single value remains. A single id is its own root.
pub fn compute_merkle_root<S: AsRef<str>>(ids: &[S]) -> String {
    if ids.is_empty() {
        return EMPTY_MERKLE_ROOT.to_string();
    }

    let mut layer: Vec<String> = ids.iter().map(|id| id.as_ref().to_string()).collect();

    while layer.len() > 1 {
        if layer.len() % 2 != 0 {
            if let Some(last) = layer.last().cloned() {
                layer.push(last);
            }
        }

        layer = layer
            .chunks(2)
            .map(|pair| {
                let mut combined = String::with_capacity(pair[0].len() + pair[1].len());
                combined.push_str(&pair[0]);
                combined.push_str(&pair[1]);
                sha256_hex(&combined)
            })
            .collect();
    }

    layer.swap_remove(0)
}
