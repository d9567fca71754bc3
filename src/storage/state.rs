//! Typed views over the replicated state entries.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use super::{load, save, StateKey, StateStore, StorageError};
use crate::chain::BlockIndex;
use crate::types::{AssetId, AssetRecord, BlockHash, PeerId, Transaction, TransactionId};

/// Transactions keyed by id, in arrival order.
pub type TransactionMap = IndexMap<TransactionId, Transaction>;

/// Asset records keyed by asset id, in arrival order.
pub type PropertyMap = IndexMap<AssetId, AssetRecord>;

/// This node's persisted identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub peer_id: PeerId,
    pub address: SocketAddr,
}

impl Identity {
    /// Load the stored identity, if this node has run before.
    pub fn load<S: StateStore + ?Sized>(store: &S) -> Result<Option<Self>, StorageError> {
        if !store.exists(StateKey::Identity) {
            return Ok(None);
        }
        let bytes = store.read(StateKey::Identity)?;
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StorageError::Corrupt {
                key: StateKey::Identity,
                source,
            })
    }

    pub fn save<S: StateStore + ?Sized>(&self, store: &S) -> Result<(), StorageError> {
        save(store, StateKey::Identity, self)
    }
}

/// Transactions and assets accepted locally but not yet committed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PendingPool {
    pub transactions: TransactionMap,
    pub properties: PropertyMap,
}

impl PendingPool {
    pub fn load<S: StateStore + ?Sized>(store: &S) -> Result<Self, StorageError> {
        Ok(Self {
            transactions: load(store, StateKey::PendingTransactions)?,
            properties: load(store, StateKey::PendingProperties)?,
        })
    }

    pub fn save<S: StateStore + ?Sized>(&self, store: &S) -> Result<(), StorageError> {
        save(store, StateKey::PendingTransactions, &self.transactions)?;
        save(store, StateKey::PendingProperties, &self.properties)
    }

    /// Number of pending transactions.
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Union incoming transactions into the pool, skipping confirmed ones.
    /// Returns how many were new.
    pub fn merge_transactions(&mut self, incoming: TransactionMap, confirmed: &ConfirmedPool) -> usize {
        let mut added = 0;
        for (id, tx) in incoming {
            if confirmed.transactions.contains_key(&id) || self.transactions.contains_key(&id) {
                continue;
            }
            self.transactions.insert(id, tx);
            added += 1;
        }
        added
    }

    /// Union incoming asset records into the pool, skipping confirmed ones.
    pub fn merge_properties(&mut self, incoming: PropertyMap, confirmed: &ConfirmedPool) -> usize {
        let mut added = 0;
        for (id, record) in incoming {
            if confirmed.properties.contains_key(&id) || self.properties.contains_key(&id) {
                continue;
            }
            self.properties.insert(id, record);
            added += 1;
        }
        added
    }
}

/// Transactions and assets committed in blocks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfirmedPool {
    pub transactions: TransactionMap,
    pub properties: PropertyMap,
}

impl ConfirmedPool {
    pub fn load<S: StateStore + ?Sized>(store: &S) -> Result<Self, StorageError> {
        Ok(Self {
            transactions: load(store, StateKey::ConfirmedTransactions)?,
            properties: load(store, StateKey::ConfirmedProperties)?,
        })
    }

    pub fn save<S: StateStore + ?Sized>(&self, store: &S) -> Result<(), StorageError> {
        save(store, StateKey::ConfirmedTransactions, &self.transactions)?;
        save(store, StateKey::ConfirmedProperties, &self.properties)
    }
}

/// Full replicated state handed to joining or rejoining peers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub block_list: BlockIndex,
    pub head: BlockHash,
    pub pending_transactions: TransactionMap,
    pub pending_properties: PropertyMap,
    pub confirmed_transactions: TransactionMap,
    pub confirmed_properties: PropertyMap,
}

impl StateSnapshot {
    /// Read every replicated entry.
    pub fn capture<S: StateStore + ?Sized>(store: &S) -> Result<Self, StorageError> {
        Ok(Self {
            block_list: load(store, StateKey::BlockList)?,
            head: load(store, StateKey::BlockchainHead)?,
            pending_transactions: load(store, StateKey::PendingTransactions)?,
            pending_properties: load(store, StateKey::PendingProperties)?,
            confirmed_transactions: load(store, StateKey::ConfirmedTransactions)?,
            confirmed_properties: load(store, StateKey::ConfirmedProperties)?,
        })
    }

    /// Overwrite every replicated entry with this snapshot.
    pub fn install<S: StateStore + ?Sized>(&self, store: &S) -> Result<(), StorageError> {
        save(store, StateKey::BlockList, &self.block_list)?;
        save(store, StateKey::BlockchainHead, &self.head)?;
        save(store, StateKey::PendingTransactions, &self.pending_transactions)?;
        save(store, StateKey::PendingProperties, &self.pending_properties)?;
        save(store, StateKey::ConfirmedTransactions, &self.confirmed_transactions)?;
        save(store, StateKey::ConfirmedProperties, &self.confirmed_properties)
    }
}
