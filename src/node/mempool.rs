//! Pending pool updates.
//!
//! Every function here is a read/modify/write of the stored pools and must
//! run while the node holds its state lock.

use crate::storage::state::{PropertyMap, TransactionMap};
use crate::storage::{ConfirmedPool, PendingPool, StateStore, StorageError};
use crate::types::{AssetId, AssetRecord, Transaction};

/// Result of merging remote entries into the pending pool.
#[derive(Clone, Debug, PartialEq)]
pub struct PoolUpdate {
    /// Entries that were new to this node
    pub added: usize,

    /// Pool after the merge
    pub pool: PendingPool,
}

/// Add a locally created transaction, and the record it introduces.
pub fn admit_local<S: StateStore + ?Sized>(
    store: &S,
    tx: Transaction,
    property: Option<(AssetId, AssetRecord)>,
) -> Result<PendingPool, StorageError> {
    let mut pool = PendingPool::load(store)?;
    if let Some((id, record)) = property {
        pool.properties.insert(id, record);
    }
    pool.transactions.insert(tx.id.clone(), tx);
    pool.save(store)?;
    Ok(pool)
}

/// Union remote transactions into the pending pool.
pub fn admit_transactions<S: StateStore + ?Sized>(
    store: &S,
    incoming: TransactionMap,
) -> Result<PoolUpdate, StorageError> {
    let mut pool = PendingPool::load(store)?;
    let confirmed = ConfirmedPool::load(store)?;
    let added = pool.merge_transactions(incoming, &confirmed);
    if added > 0 {
        pool.save(store)?;
    }
    Ok(PoolUpdate { added, pool })
}

/// Union remote asset records into the pending properties.
pub fn admit_properties<S: StateStore + ?Sized>(
    store: &S,
    incoming: PropertyMap,
) -> Result<usize, StorageError> {
    let mut pool = PendingPool::load(store)?;
    let confirmed = ConfirmedPool::load(store)?;
    let added = pool.merge_properties(incoming, &confirmed);
    if added > 0 {
        pool.save(store)?;
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_admit_local_registration() {
        let store = MemoryStore::new();
        let tx = Transaction::registration("a", "1x");
        let pool = admit_local(
            &store,
            tx.clone(),
            Some(("1x".into(), AssetRecord::new("x", vec![]))),
        )
        .unwrap();

        assert_eq!(pool.len(), 1);
        assert_eq!(PendingPool::load(&store).unwrap(), pool);
        assert!(pool.properties.contains_key("1x"));
    }

    #[test]
    fn test_admit_remote_is_idempotent() {
        let store = MemoryStore::new();
        let tx = Transaction::registration("a", "1x");
        let incoming: TransactionMap = [(tx.id.clone(), tx)].into_iter().collect();

        let first = admit_transactions(&store, incoming.clone()).unwrap();
        assert_eq!(first.added, 1);
        let second = admit_transactions(&store, incoming).unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.pool.len(), 1);
    }

    #[test]
    fn test_confirmed_entries_not_readmitted() {
        let store = MemoryStore::new();
        let tx = Transaction::registration("a", "1x");

        let mut confirmed = ConfirmedPool::default();
        confirmed.transactions.insert(tx.id.clone(), tx.clone());
        confirmed
            .properties
            .insert("1x".into(), AssetRecord::new("x", vec![tx.id.clone()]));
        confirmed.save(&store).unwrap();

        let update =
            admit_transactions(&store, [(tx.id.clone(), tx)].into_iter().collect()).unwrap();
        assert_eq!(update.added, 0);
        let props: PropertyMap = [("1x".to_string(), AssetRecord::new("x", vec![]))]
            .into_iter()
            .collect();
        assert_eq!(admit_properties(&store, props).unwrap(), 0);
    }
}
