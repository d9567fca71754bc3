use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use deedchain::network::MemoryTransport;
use deedchain::node::NodeConfig;
use deedchain::storage::StateSnapshot;
use deedchain::{MemoryNetwork, MemoryStore, PropertyNode, Transport};

pub struct TestNode {
    pub node: Arc<PropertyNode>,
    pub store: Arc<MemoryStore>,
    pub addr: SocketAddr,
}

impl TestNode {
    /// Start a node on a fresh endpoint of `network`.
    pub async fn start(network: &Arc<MemoryNetwork>, config: NodeConfig) -> Self {
        Self::launch(config, Arc::new(MemoryStore::new()), network.endpoint()).await
    }

    /// Restart over an existing store at the same address.
    pub async fn restart(
        network: &Arc<MemoryNetwork>,
        config: NodeConfig,
        store: Arc<MemoryStore>,
        addr: SocketAddr,
    ) -> Self {
        Self::launch(config, store, network.endpoint_at(addr)).await
    }

    async fn launch(
        config: NodeConfig,
        store: Arc<MemoryStore>,
        transport: Arc<MemoryTransport>,
    ) -> Self {
        let addr = transport.local_addr();
        let node = PropertyNode::new(config, store.clone(), transport).unwrap();
        node.start().await.unwrap();

        Self { node, store, addr }
    }

    pub async fn stop(&self) {
        self.node.stop().await;
    }

    pub fn chain_len(&self) -> usize {
        self.node
            .ledger()
            .map(|ledger| ledger.walk_chain().len())
            .unwrap_or(0)
    }

    pub fn head(&self) -> Option<String> {
        self.node.ledger().ok().map(|ledger| ledger.head().to_string())
    }

    pub fn peer_count(&self) -> usize {
        self.node.peer_list().map(|peers| peers.len()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::capture(self.store.as_ref()).unwrap()
    }
}

/// Config for a test node: threshold and a fixed mint delay.
pub fn test_config(threshold: usize, delay_ms: u64) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.consensus.pending_threshold = threshold;
    config.consensus.fixed_delay_ms = Some(delay_ms);
    config.rpc.enabled = false;
    config
}

pub async fn start_network(
    threshold: usize,
    delays_ms: &[u64],
) -> (Arc<MemoryNetwork>, Vec<TestNode>) {
    start_network_with(threshold, delays_ms, |_, _| {}).await
}

/// Start one node per delay. The first seeds the network and the rest join
/// through it. Returns once every node sees the full peer list and a chain.
pub async fn start_network_with<F>(
    threshold: usize,
    delays_ms: &[u64],
    configure: F,
) -> (Arc<MemoryNetwork>, Vec<TestNode>)
where
    F: Fn(usize, &mut NodeConfig),
{
    let network = MemoryNetwork::new();
    let mut nodes: Vec<TestNode> = Vec::new();

    for (i, &delay) in delays_ms.iter().enumerate() {
        let mut config = test_config(threshold, delay);
        if i == 0 {
            config.network.first_node = true;
        } else {
            config.network.rendezvous_addr = nodes[0].addr;
        }
        configure(i, &mut config);
        let node = TestNode::start(&network, config).await;
        nodes.push(node);

        let expected = nodes.len();
        let joined = wait_until(Duration::from_secs(5), || {
            nodes
                .iter()
                .all(|node| node.peer_count() == expected && node.chain_len() >= 1)
        })
        .await;
        assert!(joined, "node {} failed to join", i);
    }

    (network, nodes)
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
