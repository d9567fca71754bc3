//! Minting: turn the pending pool into the next block.
//!
//! An attempt remembers the head it started from. After its delay it calls
//! [`ConsensusEngine::try_commit`] inside the node's commit section; if the
//! head moved in the meantime another peer won and the attempt aborts
//! without touching shared state.

use tracing::debug;

use super::delay::MintDelay;
use crate::chain::{AppendOutcome, BlockIndex, Ledger};
use crate::network::PeerList;
use crate::storage::{ConfirmedPool, PendingPool, StateStore, StorageError};
use crate::types::{short, Block, BlockHash, Transaction, TransactionId};

/// Result of a mint attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MintOutcome {
    /// Block appended; carries the state to broadcast.
    Committed {
        head: BlockHash,
        blocks: BlockIndex,
        transactions: Vec<TransactionId>,
    },

    /// The head moved since the attempt started.
    Stale { expected: BlockHash, current: BlockHash },

    /// Nothing pending by the time the attempt woke up.
    Empty,
}

/// Threshold trigger and commit step of the randomized-delay consensus.
#[derive(Clone, Debug)]
pub struct ConsensusEngine {
    /// Pending transactions needed to start an attempt
    threshold: usize,

    /// Delay distribution
    delay: MintDelay,
}

impl ConsensusEngine {
    pub fn new(threshold: usize, delay: MintDelay) -> Self {
        Self {
            threshold: threshold.max(1),
            delay,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Whether the pool is large enough to start an attempt.
    pub fn threshold_reached(&self, pending: usize) -> bool {
        pending >= self.threshold
    }

    /// Draw the wait for one attempt.
    pub fn draw_delay(&self) -> std::time::Duration {
        self.delay.draw()
    }

    /// Mint a block over every pending transaction on top of `base_head`.
    ///
    /// Must run inside the node's commit section.
    pub fn try_commit<S: StateStore + ?Sized>(
        &self,
        store: &S,
        base_head: &str,
    ) -> Result<MintOutcome, StorageError> {
        let mut ledger = Ledger::load_or_genesis(store)?;
        if ledger.head() != base_head {
            return Ok(MintOutcome::Stale {
                expected: base_head.to_string(),
                current: ledger.head().to_string(),
            });
        }

        let mut pending = PendingPool::load(store)?;
        if pending.is_empty() {
            return Ok(MintOutcome::Empty);
        }
        let mut confirmed = ConfirmedPool::load(store)?;
        let mut peers = PeerList::load(store)?;

        let transactions: Vec<Transaction> = pending.transactions.values().cloned().collect();
        let ids: Vec<TransactionId> = transactions.iter().map(|tx| tx.id.clone()).collect();
        let block = Block::new(ledger.head().to_string(), ids.clone());

        let head = match ledger.append(block) {
            AppendOutcome::Appended(hash) => hash,
            AppendOutcome::RejectedStale { head, .. } => {
                return Ok(MintOutcome::Stale {
                    expected: base_head.to_string(),
                    current: head,
                });
            }
        };

        apply_transactions(&transactions, &mut pending, &mut confirmed, &mut peers);

        pending.save(store)?;
        confirmed.save(store)?;
        peers.save(store)?;
        ledger.save(store)?;

        let blocks = ledger.into_parts().1;
        Ok(MintOutcome::Committed {
            head,
            blocks,
            transactions: ids,
        })
    }
}

/// Apply committed transactions to ownership and move them from the pending
/// pools to the confirmed pools.
///
/// A registration gives the property to the buyer. A transfer takes it from
/// the seller and gives the buyer the asset minted for that transfer (found
/// through `acquired_via`), or the original id when that record never
/// arrived. Every touched record gets the transaction id prepended to its
/// history.
pub fn apply_transactions(
    transactions: &[Transaction],
    pending: &mut PendingPool,
    confirmed: &mut ConfirmedPool,
    peers: &mut PeerList,
) {
    for tx in transactions {
        if tx.is_registration() {
            peers.grant(&tx.buyer_id, tx.property_id.clone());
            confirm_property(&tx.property_id, &tx.id, pending, confirmed);
        } else {
            peers.revoke(&tx.seller_id, &tx.property_id);
            confirm_property(&tx.property_id, &tx.id, pending, confirmed);

            let minted = minted_for(&tx.id, pending, confirmed);
            match minted {
                Some(new_id) => {
                    confirm_property(&new_id, &tx.id, pending, confirmed);
                    peers.grant(&tx.buyer_id, new_id);
                }
                None => {
                    debug!(
                        "No minted asset for transfer {}, moving {}",
                        short(&tx.id),
                        short(&tx.property_id)
                    );
                    peers.grant(&tx.buyer_id, tx.property_id.clone());
                }
            }
        }

        pending.transactions.shift_remove(&tx.id);
        confirmed.transactions.insert(tx.id.clone(), tx.clone());
    }
}

/// Move a property record to the confirmed pool, recording `tx_id`.
fn confirm_property(
    property_id: &str,
    tx_id: &str,
    pending: &mut PendingPool,
    confirmed: &mut ConfirmedPool,
) {
    if let Some(mut record) = pending.properties.shift_remove(property_id) {
        record.prepend_history(tx_id);
        confirmed.properties.insert(property_id.to_string(), record);
    } else if let Some(record) = confirmed.properties.get_mut(property_id) {
        record.prepend_history(tx_id);
    }
}

/// Id of the asset minted on the buyer's side for `tx_id`.
fn minted_for(tx_id: &str, pending: &PendingPool, confirmed: &ConfirmedPool) -> Option<String> {
    pending
        .properties
        .iter()
        .chain(confirmed.properties.iter())
        .find(|(_, record)| record.acquired_via.as_deref() == Some(tx_id))
        .map(|(id, _)| id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::AssetRecord;
    use std::net::SocketAddr;

    fn make_addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn make_engine() -> ConsensusEngine {
        ConsensusEngine::new(1, MintDelay::Fixed(std::time::Duration::ZERO))
    }

    fn seed_store() -> (MemoryStore, BlockHash) {
        let store = MemoryStore::new();
        let ledger = Ledger::load_or_genesis(&store).unwrap();
        let mut peers = PeerList::new();
        peers.add_peer("a", make_addr(1));
        peers.add_peer("b", make_addr(2));
        peers.save(&store).unwrap();
        (store, ledger.head().to_string())
    }

    fn register(store: &MemoryStore, owner: &str, id: &str, address: &str) -> Transaction {
        let mut pending = PendingPool::load(store).unwrap();
        let tx = Transaction::registration(owner, id);
        pending.transactions.insert(tx.id.clone(), tx.clone());
        pending
            .properties
            .insert(id.to_string(), AssetRecord::new(address, vec![]));
        pending.save(store).unwrap();
        tx
    }

    #[test]
    fn test_threshold() {
        let engine = ConsensusEngine::new(3, MintDelay::default());
        let mut pool = PendingPool::default();
        for i in 0..2 {
            let tx = Transaction::registration("a", format!("{i}x"));
            pool.transactions.insert(tx.id.clone(), tx);
        }
        assert!(!engine.threshold_reached(pool.len()));
        let tx = Transaction::registration("a", "2x");
        pool.transactions.insert(tx.id.clone(), tx);
        assert!(engine.threshold_reached(pool.len()));

        // A zero threshold is clamped to one
        let eager = ConsensusEngine::new(0, MintDelay::default());
        assert!(!eager.threshold_reached(0));
        assert!(eager.threshold_reached(1));
    }

    #[test]
    fn test_commit_registration() {
        let (store, genesis) = seed_store();
        let tx = register(&store, "a", "649123 Main St", "123 Main St");

        let outcome = make_engine().try_commit(&store, &genesis).unwrap();
        let MintOutcome::Committed { head, blocks, transactions } = outcome else {
            panic!("expected a committed block");
        };
        assert_eq!(transactions, vec![tx.id.clone()]);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[&head].header.prev_hash, genesis);

        let peers = PeerList::load(&store).unwrap();
        assert!(peers.owns("a", "649123 Main St"));

        let pending = PendingPool::load(&store).unwrap();
        assert!(pending.is_empty());
        assert!(pending.properties.is_empty());

        let confirmed = ConfirmedPool::load(&store).unwrap();
        assert!(confirmed.transactions.contains_key(&tx.id));
        assert_eq!(confirmed.properties["649123 Main St"].history, vec![tx.id]);
    }

    #[test]
    fn test_stale_attempt_touches_nothing() {
        let (store, genesis) = seed_store();
        register(&store, "a", "1x", "x");
        register(&store, "b", "2y", "y");

        // Another peer's block lands first
        let mut ledger = Ledger::load(&store).unwrap().unwrap();
        ledger.append(Block::new(genesis.clone(), vec![]));
        ledger.save(&store).unwrap();

        let before = crate::storage::StateSnapshot::capture(&store).unwrap();
        let outcome = make_engine().try_commit(&store, &genesis).unwrap();
        assert!(matches!(outcome, MintOutcome::Stale { .. }));
        assert_eq!(crate::storage::StateSnapshot::capture(&store).unwrap(), before);
        assert!(PeerList::load(&store).unwrap().owner_of("1x").is_none());
    }

    #[test]
    fn test_empty_pool() {
        let (store, genesis) = seed_store();
        assert_eq!(
            make_engine().try_commit(&store, &genesis).unwrap(),
            MintOutcome::Empty
        );
    }

    #[test]
    fn test_transfer_moves_to_minted_asset() {
        let mut peers = PeerList::new();
        peers.add_peer("a", make_addr(1));
        peers.add_peer("b", make_addr(2));
        peers.grant("a", "649x");

        let mut confirmed = ConfirmedPool::default();
        confirmed
            .properties
            .insert("649x".into(), AssetRecord::new("x", vec!["reg".into()]));

        let tx = Transaction::new("b", "a", "649x", 10.0);
        let mut pending = PendingPool::default();
        pending.transactions.insert(tx.id.clone(), tx.clone());
        pending.properties.insert(
            "12x".into(),
            AssetRecord {
                address: "x".into(),
                history: vec!["reg".into()],
                acquired_via: Some(tx.id.clone()),
            },
        );

        apply_transactions(&[tx.clone()], &mut pending, &mut confirmed, &mut peers);

        assert!(!peers.owns("a", "649x"));
        assert!(peers.owns("b", "12x"));
        assert!(pending.is_empty() && pending.properties.is_empty());
        assert_eq!(confirmed.properties["12x"].history, vec![tx.id.clone(), "reg".into()]);
        assert_eq!(confirmed.properties["649x"].history[0], tx.id);
    }

    #[test]
    fn test_transfer_without_minted_record() {
        let mut peers = PeerList::new();
        peers.add_peer("a", make_addr(1));
        peers.add_peer("b", make_addr(2));
        peers.grant("a", "649x");

        let tx = Transaction::new("b", "a", "649x", 1.0);
        let mut pending = PendingPool::default();
        pending.transactions.insert(tx.id.clone(), tx.clone());

        apply_transactions(
            &[tx],
            &mut pending,
            &mut ConfirmedPool::default(),
            &mut peers,
        );
        assert!(peers.owns("b", "649x"));
        assert!(!peers.owns("a", "649x"));
    }
}
