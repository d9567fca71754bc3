//! Core type definitions for the deedchain ledger.
//!
//! Every identifier on the wire is a plain string: hashes are lowercase hex
//! SHA-256 digests, peer ids are random hex, transaction ids are random
//! letters. Keeping them as strings keeps the hashing rules textual
//! (`prev_hash ∥ timestamp ∥ merkle_root`) and the JSON payloads readable.

pub mod asset;
pub mod block;
pub mod transaction;

use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

pub use asset::{Asset, AssetRecord};
pub use block::{compute_merkle_root, Block, BlockBody, BlockHeader, EMPTY_MERKLE_ROOT};
pub use transaction::{Transaction, REGISTRATION_SELLER};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Unique identifier of a node in the network.
pub type PeerId = String;

/// Hex-encoded SHA-256 digest identifying a block.
pub type BlockHash = String;

/// Identifier of a transaction (random ASCII letters).
pub type TransactionId = String;

/// Identifier of an asset: decimal public key followed by the address.
pub type AssetId = String;

/// Length of generated transaction identifiers.
pub const TRANSACTION_ID_LEN: usize = 15;

/// Generate a fresh random peer id.
pub fn generate_peer_id() -> PeerId {
    let mut bytes = [0u8; 16];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
    hex::encode(bytes)
}

/// Generate a random transaction id made of ASCII letters.
pub fn generate_transaction_id() -> TransactionId {
    const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut rng = rand::thread_rng();
    (0..TRANSACTION_ID_LEN)
        .map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char)
        .collect()
}

/// Shorten an id for log lines.
pub fn short(id: &str) -> &str {
    let end = id
        .char_indices()
        .nth(8)
        .map(|(i, _)| i)
        .unwrap_or(id.len());
    &id[..end]
}

// ============================================================================
// UTILITY FUNCTIONS
// ============================================================================

/// Compute the lowercase hex SHA-256 digest of a string.
pub fn sha256_hex(data: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

/// Wall-clock timestamp as `seconds.microseconds` since the Unix epoch.
pub fn timestamp_now() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:06}", now.as_secs(), now.subsec_micros())
}
