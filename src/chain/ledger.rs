//! Append-only ledger of blocks keyed by their own hash.

use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::debug;

use crate::storage::{load, save, StateKey, StateStore, StorageError};
use crate::types::{short, Block, BlockHash};

/// Blocks keyed by hash. Ordered so serialized snapshots are byte-stable.
pub type BlockIndex = BTreeMap<BlockHash, Block>;

/// Result of offering a block to the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Block accepted; carries the new head.
    Appended(BlockHash),

    /// Block built on a head that is no longer current.
    RejectedStale { head: BlockHash, prev_hash: BlockHash },
}

impl AppendOutcome {
    pub fn is_appended(&self) -> bool {
        matches!(self, AppendOutcome::Appended(_))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("Head {0} is not in the block index")]
    MissingHead(BlockHash),

    #[error("Block stored under {key} hashes to {actual}")]
    HashMismatch { key: BlockHash, actual: BlockHash },

    #[error("Block {0} has an inconsistent merkle root")]
    BadMerkleRoot(BlockHash),

    #[error("Block {0} links to an unknown parent")]
    BrokenLink(BlockHash),

    #[error("Chain loops back through {0}")]
    Cycle(BlockHash),
}

/// The chain: head hash plus every known block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ledger {
    head: BlockHash,
    blocks: BlockIndex,
}

impl Ledger {
    /// A fresh chain holding only a genesis block.
    pub fn genesis() -> Self {
        let genesis = Block::genesis();
        let head = genesis.hash();
        let mut blocks = BlockIndex::new();
        blocks.insert(head.clone(), genesis);
        Self { head, blocks }
    }

    pub fn from_parts(head: BlockHash, blocks: BlockIndex) -> Self {
        Self { head, blocks }
    }

    pub fn into_parts(self) -> (BlockHash, BlockIndex) {
        (self.head, self.blocks)
    }

    /// Load the stored chain, if any.
    pub fn load<S: StateStore + ?Sized>(store: &S) -> Result<Option<Self>, StorageError> {
        if !store.exists(StateKey::BlockchainHead) {
            return Ok(None);
        }
        Ok(Some(Self {
            head: load(store, StateKey::BlockchainHead)?,
            blocks: load(store, StateKey::BlockList)?,
        }))
    }

    /// Load the stored chain or start (and persist) a new genesis chain.
    pub fn load_or_genesis<S: StateStore + ?Sized>(store: &S) -> Result<Self, StorageError> {
        if let Some(ledger) = Self::load(store)? {
            return Ok(ledger);
        }
        let ledger = Self::genesis();
        ledger.save(store)?;
        debug!("Created genesis block {}", short(&ledger.head));
        Ok(ledger)
    }

    pub fn save<S: StateStore + ?Sized>(&self, store: &S) -> Result<(), StorageError> {
        save(store, StateKey::BlockList, &self.blocks)?;
        save(store, StateKey::BlockchainHead, &self.head)
    }

    pub fn head(&self) -> &str {
        &self.head
    }

    pub fn head_block(&self) -> Option<&Block> {
        self.blocks.get(&self.head)
    }

    pub fn blocks(&self) -> &BlockIndex {
        &self.blocks
    }

    pub fn get(&self, hash: &str) -> Option<&Block> {
        self.blocks.get(hash)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.blocks.contains_key(hash)
    }

    /// Number of indexed blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Append a block iff it builds on the current head.
    pub fn append(&mut self, block: Block) -> AppendOutcome {
        if block.header.prev_hash != self.head {
            return AppendOutcome::RejectedStale {
                head: self.head.clone(),
                prev_hash: block.header.prev_hash,
            };
        }
        let hash = block.hash();
        self.blocks.insert(hash.clone(), block);
        self.head = hash.clone();
        AppendOutcome::Appended(hash)
    }

    /// Hashes from head back to genesis.
    ///
    /// Stops early on a missing parent or a cycle; [`Ledger::validate`]
    /// reports those.
    pub fn walk_chain(&self) -> Vec<BlockHash> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = self.head.as_str();

        while let Some(block) = self.blocks.get(cursor) {
            if !seen.insert(cursor) {
                break;
            }
            chain.push(cursor.to_string());
            if block.is_genesis() {
                break;
            }
            cursor = block.header.prev_hash.as_str();
        }

        chain
    }

    /// Blocks on this chain that `known` does not contain, oldest first.
    pub fn blocks_missing_from(&self, known: &BlockIndex) -> Vec<Block> {
        let mut missing: Vec<Block> = self
            .walk_chain()
            .into_iter()
            .take_while(|hash| !known.contains_key(hash))
            .filter_map(|hash| self.blocks.get(&hash).cloned())
            .collect();
        missing.reverse();
        missing
    }

    /// Check that every key is its block's hash and that the head chains
    /// back to a genesis block without cycles.
    pub fn validate(&self) -> Result<(), ChainError> {
        for (key, block) in &self.blocks {
            let actual = block.hash();
            if &actual != key {
                return Err(ChainError::HashMismatch {
                    key: key.clone(),
                    actual,
                });
            }
            if !block.has_consistent_root() {
                return Err(ChainError::BadMerkleRoot(key.clone()));
            }
        }

        let mut seen = HashSet::new();
        let mut cursor = self.head.as_str();
        loop {
            let block = self.blocks.get(cursor).ok_or_else(|| {
                if cursor == self.head {
                    ChainError::MissingHead(self.head.clone())
                } else {
                    ChainError::BrokenLink(cursor.to_string())
                }
            })?;
            if !seen.insert(cursor) {
                return Err(ChainError::Cycle(cursor.to_string()));
            }
            if block.is_genesis() {
                return Ok(());
            }
            cursor = block.header.prev_hash.as_str();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_genesis_chain() {
        let ledger = Ledger::genesis();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.walk_chain(), vec![ledger.head().to_string()]);
        assert!(ledger.validate().is_ok());
    }

    #[test]
    fn test_append_on_head() {
        let mut ledger = Ledger::genesis();
        let genesis_hash = ledger.head().to_string();

        let block = Block::new(genesis_hash.clone(), vec!["tx1".into()]);
        let hash = block.hash();
        assert_eq!(ledger.append(block), AppendOutcome::Appended(hash.clone()));

        assert_eq!(ledger.head(), hash);
        assert_eq!(ledger.walk_chain(), vec![hash.clone(), genesis_hash.clone()]);
        assert_eq!(ledger.head_block().unwrap().header.prev_hash, genesis_hash);
        assert!(ledger.validate().is_ok());
    }

    #[test]
    fn test_append_rejects_stale() {
        let mut ledger = Ledger::genesis();
        let genesis_hash = ledger.head().to_string();

        let first = Block::new(genesis_hash.clone(), vec!["a".into()]);
        let racing = Block::new(genesis_hash.clone(), vec!["b".into()]);
        assert!(ledger.append(first).is_appended());

        let before = ledger.clone();
        let outcome = ledger.append(racing);
        assert!(matches!(outcome, AppendOutcome::RejectedStale { .. }));
        assert_eq!(ledger, before);
    }

    #[test]
    fn test_walk_grows_by_one() {
        let mut ledger = Ledger::genesis();
        for i in 0..5 {
            let len = ledger.walk_chain().len();
            let block = Block::new(ledger.head().to_string(), vec![format!("tx{i}")]);
            assert!(ledger.append(block).is_appended());
            assert_eq!(ledger.walk_chain().len(), len + 1);
        }
    }

    #[test]
    fn test_validate_detects_tampering() {
        let mut ledger = Ledger::genesis();
        let block = Block::new(ledger.head().to_string(), vec!["tx".into()]);
        ledger.append(block);

        let (head, mut blocks) = ledger.into_parts();
        if let Some(block) = blocks.get_mut(&head) {
            block.body.transactions.push("forged".into());
        }
        let tampered = Ledger::from_parts(head.clone(), blocks.clone());
        assert_eq!(tampered.validate(), Err(ChainError::BadMerkleRoot(head.clone())));

        if let Some(block) = blocks.get_mut(&head) {
            block.header.merkle_root = "forged".into();
        }
        let rehashed = Ledger::from_parts(head, blocks);
        assert!(matches!(rehashed.validate(), Err(ChainError::HashMismatch { .. })));
    }

    #[test]
    fn test_validate_missing_head_and_link() {
        let ledger = Ledger::from_parts("nope".into(), BlockIndex::new());
        assert_eq!(ledger.validate(), Err(ChainError::MissingHead("nope".into())));

        let orphan = Block::new("unknown-parent", vec![]);
        let hash = orphan.hash();
        let mut blocks = BlockIndex::new();
        blocks.insert(hash.clone(), orphan);
        let ledger = Ledger::from_parts(hash, blocks);
        assert_eq!(
            ledger.validate(),
            Err(ChainError::BrokenLink("unknown-parent".into()))
        );
    }

    #[test]
    fn test_blocks_missing_from() {
        let mut ledger = Ledger::genesis();
        let known = ledger.blocks().clone();
        let b1 = Block::new(ledger.head().to_string(), vec!["one".into()]);
        ledger.append(b1.clone());
        let b2 = Block::new(ledger.head().to_string(), vec!["two".into()]);
        ledger.append(b2.clone());

        assert_eq!(ledger.blocks_missing_from(&known), vec![b1, b2]);
        assert!(ledger.blocks_missing_from(ledger.blocks()).is_empty());
    }

    #[test]
    fn test_persist_and_reload() {
        let store = MemoryStore::new();
        assert!(Ledger::load(&store).unwrap().is_none());

        let mut ledger = Ledger::load_or_genesis(&store).unwrap();
        let block = Block::new(ledger.head().to_string(), vec!["tx".into()]);
        ledger.append(block);
        ledger.save(&store).unwrap();

        assert_eq!(Ledger::load_or_genesis(&store).unwrap(), ledger);
    }
}
