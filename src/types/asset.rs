//! Assets (registered properties).

use serde::{Deserialize, Serialize};

use super::{AssetId, TransactionId};
use crate::crypto::{CryptoGroup, OwnershipKeyPair};

/// Replicated, public view of an asset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Street address of the property
    pub address: String,

    /// Transactions touching this asset, most recent first
    pub history: Vec<TransactionId>,

    /// Transfer that minted this asset on the buyer's side
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquired_via: Option<TransactionId>,
}

impl AssetRecord {
    pub fn new(address: impl Into<String>, history: Vec<TransactionId>) -> Self {
        Self {
            address: address.into(),
            history,
            acquired_via: None,
        }
    }

    /// Record a committed transaction at the front of the history.
    pub fn prepend_history(&mut self, tx_id: &str) {
        if self.history.first().map(String::as_str) != Some(tx_id) {
            self.history.insert(0, tx_id.to_string());
        }
    }
}

/// An asset held by this node, including its private key material.
#[derive(Clone, Debug)]
pub struct Asset {
    pub id: AssetId,
    pub record: AssetRecord,
    keys: OwnershipKeyPair,
}

impl Asset {
    /// Register a brand-new asset with a fresh keypair.
    pub fn register(group: CryptoGroup, address: impl Into<String>) -> Self {
        Self::from_keys(OwnershipKeyPair::generate(group), AssetRecord::new(address, vec![]))
    }

    /// Mint the buyer-side asset for a transfer: fresh keypair, inherited
    /// address and history.
    pub fn inherit(group: CryptoGroup, previous: &AssetRecord, via: &str) -> Self {
        let record = AssetRecord {
            address: previous.address.clone(),
            history: previous.history.clone(),
            acquired_via: Some(via.to_string()),
        };
        Self::from_keys(OwnershipKeyPair::generate(group), record)
    }

    /// Wrap existing key material.
    pub fn from_keys(keys: OwnershipKeyPair, record: AssetRecord) -> Self {
        Self {
            id: asset_id(keys.public(), &record.address),
            record,
            keys,
        }
    }

    pub fn keys(&self) -> &OwnershipKeyPair {
        &self.keys
    }

    pub fn public_key(&self) -> u64 {
        self.keys.public()
    }
}

/// `public_key ∥ address`.
pub fn asset_id(public_key: u64, address: &str) -> AssetId {
    format!("{public_key}{address}")
}

/// Check that an asset id is bound to a claimed public key.
///
/// The id must start with the decimal public key; when the address is known
/// the id must match exactly.
pub fn id_matches_key(id: &str, public_key: u64, address: Option<&str>) -> bool {
    match address {
        Some(address) => id == asset_id(public_key, address),
        None => id.starts_with(&public_key.to_string()),
    }
}
