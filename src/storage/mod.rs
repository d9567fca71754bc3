//! Node state storage.
//!
//! Components never touch files directly: every read/modify/write of the
//! replicated state goes through a [`StateStore`], a key-value store of named
//! byte blobs. The file-backed store serves real nodes; the in-memory store
//! serves tests.

pub mod file;
pub mod memory;
pub mod state;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use state::{ConfirmedPool, Identity, PendingPool, StateSnapshot};

/// Named entries of the state store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateKey {
    Identity,
    PeerList,
    BlockList,
    BlockchainHead,
    PendingTransactions,
    PendingProperties,
    ConfirmedTransactions,
    ConfirmedProperties,
}

impl StateKey {
    pub const ALL: [StateKey; 8] = [
        StateKey::Identity,
        StateKey::PeerList,
        StateKey::BlockList,
        StateKey::BlockchainHead,
        StateKey::PendingTransactions,
        StateKey::PendingProperties,
        StateKey::ConfirmedTransactions,
        StateKey::ConfirmedProperties,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateKey::Identity => "identity",
            StateKey::PeerList => "peer_list",
            StateKey::BlockList => "block_list",
            StateKey::BlockchainHead => "blockchain_head",
            StateKey::PendingTransactions => "pending_transactions",
            StateKey::PendingProperties => "pending_properties",
            StateKey::ConfirmedTransactions => "confirmed_transactions",
            StateKey::ConfirmedProperties => "confirmed_properties",
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Entry {0} does not exist")]
    Missing(StateKey),

    #[error("I/O error on {key}: {source}")]
    Io {
        key: StateKey,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt entry {key}: {source}")]
    Corrupt {
        key: StateKey,
        #[source]
        source: serde_json::Error,
    },
}

/// Key-value store of named byte blobs.
///
/// No transactional guarantee spans several keys; callers perform the
/// read/modify/write sequence each protocol step requires.
pub trait StateStore: Send + Sync {
    /// Whether an entry has been written.
    fn exists(&self, key: StateKey) -> bool;

    /// Read an entry.
    fn read(&self, key: StateKey) -> Result<Vec<u8>, StorageError>;

    /// Overwrite an entry.
    fn write(&self, key: StateKey, bytes: &[u8]) -> Result<(), StorageError>;
}

/// Read and decode an entry, defaulting to an empty value on first run.
pub fn load<T, S>(store: &S, key: StateKey) -> Result<T, StorageError>
where
    T: DeserializeOwned + Default,
    S: StateStore + ?Sized,
{
    if !store.exists(key) {
        return Ok(T::default());
    }
    let bytes = store.read(key)?;
    serde_json::from_slice(&bytes).map_err(|source| StorageError::Corrupt { key, source })
}

/// Encode and write an entry.
pub fn save<T, S>(store: &S, key: StateKey, value: &T) -> Result<(), StorageError>
where
    T: Serialize + ?Sized,
    S: StateStore + ?Sized,
{
    let bytes = serde_json::to_vec(value).map_err(|source| StorageError::Corrupt { key, source })?;
    store.write(key, &bytes)
}
