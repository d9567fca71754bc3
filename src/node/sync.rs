//! Peer sync: joining, rejoining and adopting remote blocks.
//!
//! Like the mempool helpers these are read/modify/write sequences over the
//! store and run under the node's state lock.

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::chain::{BlockIndex, ChainError, Ledger};
use crate::consensus::apply_transactions;
use crate::network::PeerList;
use crate::storage::{ConfirmedPool, Identity, PendingPool, StateSnapshot, StateStore, StorageError};
use crate::types::{BlockHash, Transaction};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Invalid chain: {0}")]
    InvalidChain(#[from] ChainError),
}

/// What happened to a received block index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdoptOutcome {
    /// Remote chain installed; `applied` pending transactions were committed.
    Adopted { head: BlockHash, applied: usize },

    /// Remote head is already on the local chain.
    AlreadyKnown,

    /// Remote chain forks from the local one and loses the tie-break.
    Ignored,
}

/// Seed a brand-new network: this node is the only peer and the chain is a
/// lone genesis block. Safe to call again on restart.
pub fn seed_first_node<S: StateStore + ?Sized>(
    store: &S,
    identity: &Identity,
) -> Result<Ledger, SyncError> {
    let mut peers = PeerList::load(store)?;
    peers.add_peer(identity.peer_id.clone(), identity.address);
    peers.save(store)?;
    Ok(Ledger::load_or_genesis(store)?)
}

/// Admit a newcomer (or refresh a returning peer's address).
///
/// Returns the updated peer list and the snapshot to hand over.
pub fn admit_peer<S: StateStore + ?Sized>(
    store: &S,
    peer_id: &str,
    address: SocketAddr,
) -> Result<(PeerList, StateSnapshot), SyncError> {
    let mut peers = PeerList::load(store)?;
    peers.add_peer(peer_id, address);
    peers.save(store)?;
    // Make sure there is a chain to hand out
    Ledger::load_or_genesis(store)?;
    Ok((peers, StateSnapshot::capture(store)?))
}

/// Merge a received peer list into the local one.
pub fn merge_peer_list<S: StateStore + ?Sized>(
    store: &S,
    remote: PeerList,
) -> Result<PeerList, SyncError> {
    let mut peers = PeerList::load(store)?;
    peers.merge(remote);
    peers.save(store)?;
    Ok(peers)
}

/// Install a full snapshot after validating its chain.
pub fn install_snapshot<S: StateStore + ?Sized>(
    store: &S,
    snapshot: &StateSnapshot,
) -> Result<(), SyncError> {
    Ledger::from_parts(snapshot.head.clone(), snapshot.block_list.clone()).validate()?;
    snapshot.install(store)?;
    Ok(())
}

/// Adopt a peer's block index and head.
///
/// The remote chain must validate. If it extends the local head, its new
/// blocks' transactions found in the pending pool are applied oldest first.
/// A remote chain that forks from ours wins when it is longer, or equally
/// long with the smaller head hash, so crossing broadcasts converge.
pub fn adopt_chain<S: StateStore + ?Sized>(
    store: &S,
    blocks: BlockIndex,
    head: BlockHash,
) -> Result<AdoptOutcome, SyncError> {
    let remote = Ledger::from_parts(head.clone(), blocks);
    remote.validate()?;

    // A node still waiting for its snapshot takes any valid chain
    let local = Ledger::load(store)?
        .unwrap_or_else(|| Ledger::from_parts(BlockHash::new(), BlockIndex::new()));
    if local.contains(&head) {
        return Ok(AdoptOutcome::AlreadyKnown);
    }

    if !remote.contains(local.head()) {
        let (remote_len, local_len) = (remote.walk_chain().len(), local.walk_chain().len());
        let remote_wins =
            remote_len > local_len || (remote_len == local_len && head.as_str() < local.head());
        if !remote_wins {
            return Ok(AdoptOutcome::Ignored);
        }
    }

    let mut pending = PendingPool::load(store)?;
    let mut confirmed = ConfirmedPool::load(store)?;
    let mut peers = PeerList::load(store)?;

    let new_blocks = remote.blocks_missing_from(local.blocks());
    let mut seen = HashSet::new();
    let committed: Vec<Transaction> = new_blocks
        .iter()
        .flat_map(|block| block.body.transactions.iter())
        .filter(|id| seen.insert(id.as_str()))
        .filter_map(|id| pending.transactions.get(id).cloned())
        .collect();

    apply_transactions(&committed, &mut pending, &mut confirmed, &mut peers);

    pending.save(store)?;
    confirmed.save(store)?;
    peers.save(store)?;
    remote.save(store)?;

    Ok(AdoptOutcome::Adopted {
        head,
        applied: committed.len(),
    })
}
