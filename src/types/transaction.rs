//! Ownership transactions.

use super::{generate_transaction_id, timestamp_now, AssetId, PeerId, TransactionId};
use serde::{Deserialize, Serialize};

/// Seller id recorded for first registrations.
pub const REGISTRATION_SELLER: &str = "NA";

/// A registration or transfer of an asset.
///
/// Immutable once created. It sits in the pending pool until a block
/// commits it, then moves to the confirmed pool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,

    /// Receiving peer
    pub buyer_id: PeerId,

    /// Giving peer, or `"NA"` for a registration
    pub seller_id: PeerId,

    pub property_id: AssetId,

    pub amount: f64,

    pub timestamp: String,
}

impl Transaction {
    /// Create a transfer from `seller_id` to `buyer_id`.
    pub fn new(
        buyer_id: impl Into<PeerId>,
        seller_id: impl Into<PeerId>,
        property_id: impl Into<AssetId>,
        amount: f64,
    ) -> Self {
        Self {
            id: generate_transaction_id(),
            buyer_id: buyer_id.into(),
            seller_id: seller_id.into(),
            property_id: property_id.into(),
            amount,
            timestamp: timestamp_now(),
        }
    }

    /// Create the registration of a freshly created asset.
    pub fn registration(owner_id: impl Into<PeerId>, property_id: impl Into<AssetId>) -> Self {
        Self::new(owner_id, REGISTRATION_SELLER, property_id, 0.0)
    }

    /// Whether this transaction registers a new asset.
    pub fn is_registration(&self) -> bool {
        self.seller_id == REGISTRATION_SELLER
    }
}
