//! Property ledger node.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::chain::Ledger;
use crate::consensus::{ConsensusEngine, MintOutcome};
use crate::crypto::{CryptoGroup, GroupError};
use crate::network::{Inbound, Message, PeerList, Transport};
use crate::storage::state::{PropertyMap, TransactionMap};
use crate::storage::{ConfirmedPool, Identity, PendingPool, StateStore, StorageError};
use crate::types::{
    generate_peer_id, short, Asset, AssetId, AssetRecord, PeerId, Transaction, TransactionId,
};

use super::config::NodeConfig;
use super::mempool;
use super::proof::{ProofCoordinator, ProofError};
use super::sync::{self, AdoptOutcome, SyncError};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Proof error: {0}")]
    Proof(#[from] ProofError),

    #[error("Invalid crypto group: {0}")]
    Group(#[from] GroupError),

    #[error("Unknown buyer {0}")]
    UnknownBuyer(PeerId),

    #[error("Property {0} is not owned by this node")]
    NotOwned(AssetId),

    #[error("Address must not be empty")]
    EmptyAddress,

    #[error("No peers available to verify ownership")]
    NoVerifiers,

    #[error("Transaction rejected")]
    Rejected,

    #[error("Ownership proof timed out")]
    ProofTimeout,

    #[error("No chain yet, the node has not joined a network")]
    NoChain,

    #[error("Node already started")]
    AlreadyStarted,
}

/// Statistics about node operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct NodeStats {
    pub blocks_minted: u64,
    pub blocks_adopted: u64,
    pub stale_aborts: u64,
    pub messages_handled: u64,
    pub messages_dropped: u64,
    pub proofs_accepted: u64,
    pub proofs_rejected: u64,
}

/// A peer of the property ledger network.
pub struct PropertyNode {
    /// Configuration
    config: NodeConfig,

    /// Persisted identity
    identity: Identity,

    /// Whether the identity was found in storage
    rejoining: bool,

    /// Replicated state
    store: Arc<dyn StateStore>,

    /// Network transport
    transport: Arc<dyn Transport>,

    /// Mint trigger and commit step
    engine: ConsensusEngine,

    /// Private key material of owned assets
    holdings: RwLock<HashMap<AssetId, Asset>>,

    /// Ownership proof sessions
    proofs: ProofCoordinator,

    /// Serializes every read/modify/write of replicated state
    state_lock: Mutex<()>,

    /// A mint attempt is in flight
    minting: AtomicBool,

    /// Statistics
    stats: RwLock<NodeStats>,

    /// Shutdown signal
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: parking_lot::Mutex<Option<mpsc::Receiver<()>>>,
}

impl PropertyNode {
    /// Create a node over a store and a transport.
    ///
    /// Reuses the stored identity if there is one, refreshing its address.
    pub fn new(
        config: NodeConfig,
        store: Arc<dyn StateStore>,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>, NodeError> {
        let group = config.proof.group()?;
        let address = transport.local_addr();

        let (identity, rejoining) = match Identity::load(store.as_ref())? {
            Some(mut identity) => {
                identity.address = address;
                (identity, true)
            }
            None => (
                Identity {
                    peer_id: generate_peer_id(),
                    address,
                },
                false,
            ),
        };
        identity.save(store.as_ref())?;

        let engine = ConsensusEngine::new(
            config.consensus.pending_threshold,
            config.consensus.mint_delay(),
        );
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Ok(Arc::new(Self {
            config,
            identity,
            rejoining,
            store,
            transport,
            engine,
            holdings: RwLock::new(HashMap::new()),
            proofs: ProofCoordinator::new(group),
            state_lock: Mutex::new(()),
            minting: AtomicBool::new(false),
            stats: RwLock::new(NodeStats::default()),
            shutdown_tx,
            shutdown_rx: parking_lot::Mutex::new(Some(shutdown_rx)),
        }))
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn peer_id(&self) -> &str {
        &self.identity.peer_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.identity.address
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn group(&self) -> CryptoGroup {
        self.proofs.group()
    }

    pub fn stats(&self) -> NodeStats {
        self.stats.read().clone()
    }

    /// Public records of the assets this node holds keys for, as committed
    /// when the asset is on the chain.
    pub fn holdings(&self) -> Vec<(AssetId, AssetRecord)> {
        let confirmed = match self.confirmed() {
            Ok(pool) => pool.properties,
            Err(e) => {
                warn!("Showing uncommitted holdings: {}", e);
                PropertyMap::default()
            }
        };
        let mut held: Vec<_> = self
            .holdings
            .read()
            .values()
            .map(|asset| {
                let record = confirmed
                    .get(&asset.id)
                    .cloned()
                    .unwrap_or_else(|| asset.record.clone());
                (asset.id.clone(), record)
            })
            .collect();
        held.sort_by(|a, b| a.0.cmp(&b.0));
        held
    }

    pub fn holds(&self, asset_id: &str) -> bool {
        self.holdings.read().contains_key(asset_id)
    }

    /// Prover sessions still holding a copy of an asset's keys.
    pub fn open_proofs(&self) -> usize {
        self.proofs.open_sessions()
    }

    /// The local chain, once seeded or received from a peer.
    pub fn ledger(&self) -> Result<Ledger, NodeError> {
        Ledger::load(self.store.as_ref())?.ok_or(NodeError::NoChain)
    }

    pub fn peer_list(&self) -> Result<PeerList, NodeError> {
        Ok(PeerList::load(self.store.as_ref())?)
    }

    pub fn pending(&self) -> Result<PendingPool, NodeError> {
        Ok(PendingPool::load(self.store.as_ref())?)
    }

    pub fn confirmed(&self) -> Result<ConfirmedPool, NodeError> {
        Ok(ConfirmedPool::load(self.store.as_ref())?)
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Start the message loop and join the network.
    pub async fn start(self: &Arc<Self>) -> Result<(), NodeError> {
        let receiver = self
            .transport
            .take_receiver()
            .ok_or(NodeError::AlreadyStarted)?;
        let shutdown = self
            .shutdown_rx
            .lock()
            .take()
            .ok_or(NodeError::AlreadyStarted)?;

        info!(
            "Starting node {} on {}",
            short(self.peer_id()),
            self.local_addr()
        );

        let node = Arc::clone(self);
        tokio::spawn(async move {
            node.run(receiver, shutdown).await;
        });

        self.join().await
    }

    /// Stop the message loop.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }

    async fn run(
        self: Arc<Self>,
        mut receiver: mpsc::Receiver<Inbound>,
        mut shutdown: mpsc::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                inbound = receiver.recv() => match inbound {
                    Some(inbound) => self.handle_inbound(inbound).await,
                    None => break,
                },
                _ = shutdown.recv() => {
                    info!("Shutting down node {}", short(self.peer_id()));
                    break;
                }
            }
        }
    }

    /// Enter the network: seed it, announce ourselves to the rendezvous, or
    /// ask known peers for fresh state after a restart.
    async fn join(self: &Arc<Self>) -> Result<(), NodeError> {
        if self.config.network.first_node {
            let ledger = {
                let _guard = self.state_lock.lock().await;
                sync::seed_first_node(self.store.as_ref(), &self.identity)?
            };
            info!("Seeded network, genesis {}", short(ledger.head()));
            return Ok(());
        }

        let known = self.peer_list()?.other_addresses(self.peer_id());
        if self.rejoining && !known.is_empty() {
            info!("Rejoining, requesting state from {} peers", known.len());
            let request = Message::RequestUpdate {
                peer_id: self.identity.peer_id.clone(),
                address: self.local_addr(),
            };
            self.send_all(&known, &request).await;
            return Ok(());
        }

        let rendezvous = self.config.network.rendezvous_addr;
        if rendezvous == self.local_addr() {
            warn!("Rendezvous address is our own address, not joining");
            return Ok(());
        }
        info!("Joining via {}", rendezvous);
        let announce = Message::NewUser {
            peer_id: self.identity.peer_id.clone(),
            address: self.local_addr(),
        };
        self.send_to(rendezvous, &announce).await;
        Ok(())
    }

    // ========================================================================
    // USER ACTIONS
    // ========================================================================

    /// Register a new asset at `address`, owned by this node.
    pub async fn register_asset(self: &Arc<Self>, address: &str) -> Result<AssetId, NodeError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(NodeError::EmptyAddress);
        }

        let asset = Asset::register(self.group(), address);
        let asset_id = asset.id.clone();
        let tx = Transaction::registration(self.identity.peer_id.clone(), asset_id.clone());

        let pool = {
            let _guard = self.state_lock.lock().await;
            mempool::admit_local(
                self.store.as_ref(),
                tx.clone(),
                Some((asset_id.clone(), asset.record.clone())),
            )?
        };
        self.holdings.write().insert(asset_id.clone(), asset);

        info!(
            "Registered {} as {} (tx {})",
            address,
            short(&asset_id),
            short(&tx.id)
        );

        self.broadcast(&Message::TempProperties(pool.properties.clone()))
            .await;
        self.broadcast(&Message::TempTransactions(pool.transactions.clone()))
            .await;
        self.maybe_start_mint(pool.len());

        Ok(asset_id)
    }

    /// Sell an owned asset to `buyer_id`.
    ///
    /// Proves ownership to every other peer first. The transaction enters the
    /// pending pool only once the proof is accepted.
    pub async fn transfer_asset(
        self: &Arc<Self>,
        buyer_id: &str,
        property_id: &str,
        amount: f64,
    ) -> Result<TransactionId, NodeError> {
        let peers = self.peer_list()?;
        if !peers.contains(buyer_id) {
            return Err(NodeError::UnknownBuyer(buyer_id.to_string()));
        }
        if !peers.owns(self.peer_id(), property_id) {
            return Err(NodeError::NotOwned(property_id.to_string()));
        }

        let tx = Transaction::new(buyer_id, self.identity.peer_id.clone(), property_id, amount);

        // Without the keys there is nothing to prove
        let asset = self.holdings.read().get(property_id).cloned();
        let Some(mut asset) = asset else {
            warn!("No keys held for {}", short(property_id));
            return Err(NodeError::Rejected);
        };
        // Hand the buyer the committed history
        if let Some(record) = self.confirmed()?.properties.get(property_id) {
            asset.record = record.clone();
        }

        let verifiers = peers.other_addresses(self.peer_id());
        if verifiers.is_empty() {
            return Err(NodeError::NoVerifiers);
        }

        let (commit, verdict) = self.proofs.begin(&tx, &asset, &verifiers)?;
        debug!(
            "Proving ownership of {} to {} peers",
            short(property_id),
            verifiers.len()
        );
        self.send_all(&verifiers, &commit).await;

        let accepted = match self.config.proof.timeout() {
            Some(limit) => match tokio::time::timeout(limit, verdict).await {
                Ok(result) => result.unwrap_or(false),
                Err(_) => {
                    self.proofs.abandon(&tx.id);
                    warn!("Proof for tx {} timed out", short(&tx.id));
                    return Err(NodeError::ProofTimeout);
                }
            },
            None => verdict.await.unwrap_or(false),
        };

        if !accepted {
            self.proofs.abandon(&tx.id);
            self.stats.write().proofs_rejected += 1;
            info!("Transfer {} rejected", short(&tx.id));
            return Err(NodeError::Rejected);
        }

        self.stats.write().proofs_accepted += 1;
        self.holdings.write().remove(property_id);
        self.release_proof_later(tx.id.clone());

        let pool = {
            let _guard = self.state_lock.lock().await;
            mempool::admit_local(self.store.as_ref(), tx.clone(), None)?
        };
        info!(
            "Transfer {} of {} to {} accepted",
            short(&tx.id),
            short(property_id),
            short(buyer_id)
        );

        self.broadcast(&Message::TempTransactions(pool.transactions.clone()))
            .await;
        self.maybe_start_mint(pool.len());

        Ok(tx.id)
    }

    // ========================================================================
    // MESSAGE HANDLING
    // ========================================================================

    async fn handle_inbound(self: &Arc<Self>, inbound: Inbound) {
        let message = match Message::from_bytes(&inbound.bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping message from {}: {}", inbound.from, e);
                self.stats.write().messages_dropped += 1;
                return;
            }
        };

        let tag = message.tag();
        match self.handle_message(inbound.from, message).await {
            Ok(()) => self.stats.write().messages_handled += 1,
            Err(e) => {
                warn!("Failed to handle {} from {}: {}", tag, inbound.from, e);
                self.stats.write().messages_dropped += 1;
            }
        }
    }

    async fn handle_message(
        self: &Arc<Self>,
        from: SocketAddr,
        message: Message,
    ) -> Result<(), NodeError> {
        match message {
            Message::NewUser { peer_id, address } => {
                let (peers, snapshot) = {
                    let _guard = self.state_lock.lock().await;
                    sync::admit_peer(self.store.as_ref(), &peer_id, address)?
                };
                info!("Admitted peer {} at {}", short(&peer_id), address);
                self.broadcast(&Message::PeerListUpdate(peers)).await;
                self.send_to(address, &Message::NewUserResponse(snapshot)).await;
            }

            Message::RequestUpdate { peer_id, address } => {
                let (peers, snapshot) = {
                    let _guard = self.state_lock.lock().await;
                    sync::admit_peer(self.store.as_ref(), &peer_id, address)?
                };
                debug!("Sending state to returning peer {}", short(&peer_id));
                self.send_to(address, &Message::PeerListUpdate(peers)).await;
                self.send_to(address, &Message::NewUserResponse(snapshot)).await;
            }

            Message::NewUserResponse(snapshot) => {
                {
                    let _guard = self.state_lock.lock().await;
                    sync::install_snapshot(self.store.as_ref(), &snapshot)?;
                }
                info!(
                    "Installed state from {}, head {}",
                    from,
                    short(&snapshot.head)
                );
                self.maybe_start_mint(snapshot.pending_transactions.len());
            }

            Message::PeerListUpdate(remote) => {
                let peers = {
                    let _guard = self.state_lock.lock().await;
                    sync::merge_peer_list(self.store.as_ref(), remote)?
                };
                debug!("Peer list now has {} peers", peers.len());
            }

            Message::TempProperties(properties) => self.on_temp_properties(properties).await?,

            Message::TempTransactions(transactions) => {
                self.on_temp_transactions(transactions).await?
            }

            Message::NewBlock { blocks, head } => {
                let outcome = {
                    let _guard = self.state_lock.lock().await;
                    sync::adopt_chain(self.store.as_ref(), blocks, head)?
                };
                match outcome {
                    AdoptOutcome::Adopted { head, applied } => {
                        self.stats.write().blocks_adopted += 1;
                        info!(
                            "Adopted head {} from {} ({} transactions)",
                            short(&head),
                            from,
                            applied
                        );
                    }
                    AdoptOutcome::AlreadyKnown => debug!("Block from {} already known", from),
                    AdoptOutcome::Ignored => debug!("Ignoring losing fork from {}", from),
                }
            }

            Message::ProofCommit {
                transaction,
                h,
                public_key,
                p,
                g,
            } => {
                let challenge = self
                    .proofs
                    .on_commit(from, transaction, h, public_key, p, g)?;
                self.send_to(from, &challenge).await;
            }

            Message::ProofChallenge { transaction, b } => {
                match self.proofs.on_challenge(from, &transaction, b) {
                    Some(response) => self.send_to(from, &response).await,
                    None => warn!(
                        "Refusing challenge for {} from {}",
                        short(&transaction),
                        from
                    ),
                }
            }

            Message::ProofResponse {
                transaction,
                s,
                owner_details,
            } => {
                let Some(verdict) = self.proofs.on_response(from, &transaction, s, owner_details)
                else {
                    debug!("Response for unknown proof {}", short(&transaction));
                    return Ok(());
                };

                let tx = &verdict.transaction;
                if verdict.accepted && tx.buyer_id == self.identity.peer_id {
                    self.receive_asset(tx, &verdict.owner_details).await?;
                }
                debug!(
                    "Verified proof {}: {}",
                    short(&tx.id),
                    if verdict.accepted { "accepted" } else { "rejected" }
                );
                self.send_to(from, &verdict.to_message()).await;
            }

            Message::ProofResult {
                transaction,
                accepted,
            } => {
                if self.proofs.on_result(from, &transaction, accepted).is_none() {
                    debug!("Late verdict for {} ignored", short(&transaction));
                }
            }
        }
        Ok(())
    }

    async fn on_temp_properties(&self, properties: PropertyMap) -> Result<(), NodeError> {
        let added = {
            let _guard = self.state_lock.lock().await;
            mempool::admit_properties(self.store.as_ref(), properties)?
        };
        if added > 0 {
            debug!("Added {} pending properties", added);
        }
        Ok(())
    }

    async fn on_temp_transactions(
        self: &Arc<Self>,
        transactions: TransactionMap,
    ) -> Result<(), NodeError> {
        let update = {
            let _guard = self.state_lock.lock().await;
            mempool::admit_transactions(self.store.as_ref(), transactions)?
        };
        if update.added > 0 {
            debug!(
                "Added {} pending transactions ({} pending)",
                update.added,
                update.pool.len()
            );
        }
        self.maybe_start_mint(update.pool.len());
        Ok(())
    }

    /// Drop the seller-side proof session once stragglers had their chance.
    fn release_proof_later(self: &Arc<Self>, tx_id: TransactionId) {
        let node = Arc::clone(self);
        let linger = self.config.proof.session_linger();
        tokio::spawn(async move {
            tokio::time::sleep(linger).await;
            node.proofs.abandon(&tx_id);
        });
    }

    /// As the buyer of a verified transfer, mint our side of the asset.
    async fn receive_asset(
        &self,
        tx: &Transaction,
        previous: &AssetRecord,
    ) -> Result<(), NodeError> {
        let asset = Asset::inherit(self.group(), previous, &tx.id);
        let asset_id = asset.id.clone();
        let record = asset.record.clone();

        {
            let _guard = self.state_lock.lock().await;
            let mut pool = PendingPool::load(self.store.as_ref())?;
            pool.properties.insert(asset_id.clone(), record.clone());
            pool.save(self.store.as_ref())?;
        }
        self.holdings.write().insert(asset_id.clone(), asset);
        info!(
            "Received {} as {} (tx {})",
            previous.address,
            short(&asset_id),
            short(&tx.id)
        );

        let announce: PropertyMap = [(asset_id, record)].into_iter().collect();
        self.broadcast(&Message::TempProperties(announce)).await;
        Ok(())
    }

    // ========================================================================
    // MINTING
    // ========================================================================

    /// Start a mint attempt if the pool reached the threshold and none is in
    /// flight.
    fn maybe_start_mint(self: &Arc<Self>, pending: usize) {
        if !self.engine.threshold_reached(pending) {
            return;
        }
        if self
            .minting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let node = Arc::clone(self);
        tokio::spawn(async move {
            node.mint_attempt().await;
        });
    }

    async fn mint_attempt(self: Arc<Self>) {
        let base_head = match self.ledger() {
            Ok(ledger) => ledger.head().to_string(),
            Err(e) => {
                error!("Cannot start mint attempt: {}", e);
                self.minting.store(false, Ordering::Release);
                return;
            }
        };

        let delay = self.engine.draw_delay();
        debug!("Mint attempt on {} in {:?}", short(&base_head), delay);
        tokio::time::sleep(delay).await;

        {
            let _guard = self.state_lock.lock().await;
            match self.engine.try_commit(self.store.as_ref(), &base_head) {
                Ok(MintOutcome::Committed {
                    head,
                    blocks,
                    transactions,
                }) => {
                    self.stats.write().blocks_minted += 1;
                    info!(
                        "Minted block {} with {} transactions",
                        short(&head),
                        transactions.len()
                    );
                    self.broadcast(&Message::NewBlock { blocks, head }).await;
                }
                Ok(MintOutcome::Stale { expected, current }) => {
                    self.stats.write().stale_aborts += 1;
                    debug!(
                        "Mint attempt stale: started on {}, head is {}",
                        short(&expected),
                        short(&current)
                    );
                }
                Ok(MintOutcome::Empty) => debug!("Nothing left to mint"),
                Err(e) => error!("Mint attempt failed: {}", e),
            }
        }

        self.minting.store(false, Ordering::Release);

        // Transactions may have arrived while we were busy
        match self.pending() {
            Ok(pool) => self.maybe_start_mint(pool.len()),
            Err(e) => error!("Failed to reload pending pool: {}", e),
        }
    }

    // ========================================================================
    // NETWORK HELPERS
    // ========================================================================

    async fn send_to(&self, to: SocketAddr, message: &Message) {
        let bytes = match message.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode {}: {}", message.tag(), e);
                return;
            }
        };
        if let Err(e) = self.transport.send(to, bytes).await {
            warn!("Failed to send {} to {}: {}", message.tag(), to, e);
        }
    }

    async fn send_all(&self, targets: &[SocketAddr], message: &Message) {
        for &target in targets {
            self.send_to(target, message).await;
        }
    }

    /// Send to every known peer except ourselves.
    async fn broadcast(&self, message: &Message) {
        match self.peer_list() {
            Ok(peers) => {
                let targets = peers.other_addresses(self.peer_id());
                self.send_all(&targets, message).await;
            }
            Err(e) => error!("Cannot broadcast {}: {}", message.tag(), e),
        }
    }
}
