//! Replicated peer list: who is in the network and what each peer owns.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;

use crate::storage::{load, save, StateKey, StateStore, StorageError};
use crate::types::{AssetId, PeerId};

/// Information about a peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    /// Address the peer listens on
    pub address: SocketAddr,

    /// Asset ids committed to this peer
    #[serde(default)]
    pub owned: BTreeSet<AssetId>,
}

impl PeerEntry {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            owned: BTreeSet::new(),
        }
    }
}

/// Every known peer keyed by id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerList {
    peers: BTreeMap<PeerId, PeerEntry>,
}

impl PeerList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load<S: StateStore + ?Sized>(store: &S) -> Result<Self, StorageError> {
        load(store, StateKey::PeerList)
    }

    pub fn save<S: StateStore + ?Sized>(&self, store: &S) -> Result<(), StorageError> {
        save(store, StateKey::PeerList, self)
    }

    /// Add a peer or refresh its address. Returns true if the peer is new.
    pub fn add_peer(&mut self, id: impl Into<PeerId>, address: SocketAddr) -> bool {
        let id = id.into();
        match self.peers.get_mut(&id) {
            Some(entry) => {
                entry.address = address;
                false
            }
            None => {
                self.peers.insert(id, PeerEntry::new(address));
                true
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&PeerEntry> {
        self.peers.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }

    pub fn address_of(&self, id: &str) -> Option<SocketAddr> {
        self.peers.get(id).map(|entry| entry.address)
    }

    /// Addresses of every peer except `local`.
    pub fn other_addresses(&self, local: &str) -> Vec<SocketAddr> {
        self.peers
            .iter()
            .filter(|(id, _)| id.as_str() != local)
            .map(|(_, entry)| entry.address)
            .collect()
    }

    /// Whether `peer` owns `asset`.
    pub fn owns(&self, peer: &str, asset: &str) -> bool {
        self.peers
            .get(peer)
            .map_or(false, |entry| entry.owned.contains(asset))
    }

    /// The peer owning `asset`, if any.
    pub fn owner_of(&self, asset: &str) -> Option<&PeerId> {
        self.peers
            .iter()
            .find(|(_, entry)| entry.owned.contains(asset))
            .map(|(id, _)| id)
    }

    /// Add an asset to a peer's owned set. Unknown peers are ignored.
    pub fn grant(&mut self, peer: &str, asset: impl Into<AssetId>) -> bool {
        match self.peers.get_mut(peer) {
            Some(entry) => entry.owned.insert(asset.into()),
            None => false,
        }
    }

    /// Remove an asset from a peer's owned set.
    pub fn revoke(&mut self, peer: &str, asset: &str) -> bool {
        self.peers
            .get_mut(peer)
            .map_or(false, |entry| entry.owned.remove(asset))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &PeerEntry)> {
        self.peers.iter()
    }

    /// Merge a remote list: new peers are added, addresses refreshed, and
    /// owned sets taken from the remote side.
    pub fn merge(&mut self, remote: PeerList) {
        for (id, entry) in remote.peers {
            self.peers.insert(id, entry);
        }
    }
}
