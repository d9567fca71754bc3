use std::time::Duration;
use tokio::time::sleep;

mod common;
use common::{start_network, start_network_with, test_config, wait_until, TestNode};
use deedchain::{Message, NodeError, Transport};

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_join_shares_peers_and_chain() {
    let (_network, nodes) = start_network(3, &[50, 50, 50]).await;

    let genesis = nodes[0].head().unwrap();
    for node in &nodes {
        assert_eq!(node.head().as_deref(), Some(genesis.as_str()));
        assert_eq!(node.peer_count(), 3);
    }

    // Every node knows every other node's address
    let peers = nodes[2].node.peer_list().unwrap();
    for node in &nodes {
        assert_eq!(peers.address_of(node.node.peer_id()), Some(node.addr));
    }

    for node in &nodes {
        node.stop().await;
    }
}

#[tokio::test]
async fn test_registration_mints_block() {
    let (_network, nodes) = start_network(1, &[30, 300]).await;
    let (a, b) = (&nodes[0], &nodes[1]);
    let genesis = a.head().unwrap();

    let asset_id = a.node.register_asset("123 Main St").await.unwrap();
    assert!(asset_id.ends_with("123 Main St"));
    assert!(a.node.holds(&asset_id));

    let minted = wait_until(TIMEOUT, || a.chain_len() == 2 && b.chain_len() == 2).await;
    assert!(minted, "registration was not committed");
    assert_eq!(a.head(), b.head());

    let ledger = b.node.ledger().unwrap();
    let head = ledger.head_block().unwrap();
    assert_eq!(head.header.prev_hash, genesis);
    assert_eq!(head.body.transactions.len(), 1);

    for node in &nodes {
        let peers = node.node.peer_list().unwrap();
        assert!(peers.owns(a.node.peer_id(), &asset_id));
        let confirmed = node.node.confirmed().unwrap();
        assert!(confirmed.properties.contains_key(&asset_id));
        assert!(node.node.pending().unwrap().is_empty());
    }

    // Holdings show the committed record
    let confirmed = a.node.confirmed().unwrap();
    let held = a.node.holdings();
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].1, confirmed.properties[&asset_id]);
    assert_eq!(held[0].1.history.len(), 1);

    for node in &nodes {
        node.stop().await;
    }
}

#[tokio::test]
async fn test_transfer_moves_ownership() {
    let (_network, nodes) = start_network(1, &[30, 300]).await;
    let (a, b) = (&nodes[0], &nodes[1]);

    let sold = a.node.register_asset("9 Elm Rd").await.unwrap();
    assert!(wait_until(TIMEOUT, || a.chain_len() == 2 && b.chain_len() == 2).await);
    assert!(wait_until(TIMEOUT, || {
        a.node
            .peer_list()
            .map(|peers| peers.owns(a.node.peer_id(), &sold))
            .unwrap_or(false)
    })
    .await);

    let tx_id = a
        .node
        .transfer_asset(b.node.peer_id(), &sold, 250_000.0)
        .await
        .unwrap();
    assert!(!a.node.holds(&sold));

    let committed = wait_until(TIMEOUT, || a.chain_len() == 3 && b.chain_len() == 3).await;
    assert!(committed, "transfer was not committed");

    let held = b.node.holdings();
    assert_eq!(held.len(), 1);
    let (received, record) = &held[0];
    assert_ne!(received, &sold);
    assert!(received.ends_with("9 Elm Rd"));
    assert_eq!(record.acquired_via.as_deref(), Some(tx_id.as_str()));
    assert_eq!(record.history.len(), 2);
    assert_eq!(record.history[0], tx_id);

    // The seller kept no copy of the old keys
    assert!(a.node.holdings().is_empty());
    assert!(wait_until(TIMEOUT, || a.node.open_proofs() == 0).await);

    for node in &nodes {
        let peers = node.node.peer_list().unwrap();
        assert!(!peers.owns(a.node.peer_id(), &sold));
        assert!(peers.owns(b.node.peer_id(), received));

        let confirmed = node.node.confirmed().unwrap();
        assert!(confirmed.transactions.contains_key(&tx_id));
        // The buyer's record carries the registration forward
        assert_eq!(confirmed.properties[received].history.len(), 2);
        assert_eq!(confirmed.properties[received].history[0], tx_id);
        assert_eq!(confirmed.properties[&sold].history[0], tx_id);
    }
    assert_eq!(a.node.stats().proofs_accepted, 1);

    for node in &nodes {
        node.stop().await;
    }
}

#[tokio::test]
async fn test_transfer_verified_by_every_peer() {
    let (_network, nodes) = start_network(1, &[30, 300, 400]).await;
    let (a, b, c) = (&nodes[0], &nodes[1], &nodes[2]);

    let sold = a.node.register_asset("12 Oak Ave").await.unwrap();
    assert!(wait_until(TIMEOUT, || nodes.iter().all(|node| node.chain_len() == 2)).await);

    let tx_id = a
        .node
        .transfer_asset(b.node.peer_id(), &sold, 90_000.0)
        .await
        .unwrap();

    let committed = wait_until(TIMEOUT, || nodes.iter().all(|node| node.chain_len() == 3)).await;
    assert!(committed, "transfer was not committed");

    // Both verifiers got an answer, then the seller dropped the session
    assert!(wait_until(TIMEOUT, || a.node.open_proofs() == 0).await);

    // Only the buyer minted an asset
    let received = b.node.holdings();
    assert_eq!(received.len(), 1);
    assert!(c.node.holdings().is_empty());
    assert_eq!(a.node.stats().proofs_accepted, 1);

    let (received_id, _) = &received[0];
    for node in &nodes {
        let peers = node.node.peer_list().unwrap();
        assert_eq!(peers.owner_of(received_id), Some(&b.node.peer_id().to_string()));
        assert!(peers.owner_of(&sold).is_none());
        assert!(node.node.confirmed().unwrap().transactions.contains_key(&tx_id));
    }

    for node in &nodes {
        node.stop().await;
    }
}

#[tokio::test]
async fn test_rejected_verdict_keeps_asset() {
    let (network, nodes) = start_network(1, &[20]).await;
    let a = &nodes[0];

    let asset_id = a.node.register_asset("3 Doubt Dr").await.unwrap();
    assert!(wait_until(TIMEOUT, || a.chain_len() == 2).await);

    // A peer that joins and votes against the seller
    let skeptic = network.endpoint();
    let mut inbox = skeptic.take_receiver().unwrap();
    let join = Message::NewUser {
        peer_id: "skeptic".into(),
        address: skeptic.local_addr(),
    };
    skeptic.send(a.addr, join.to_bytes().unwrap()).await.unwrap();
    assert!(wait_until(TIMEOUT, || a.peer_count() == 2).await);

    let seller = a.node.clone();
    let sold = asset_id.clone();
    let transfer =
        tokio::spawn(async move { seller.transfer_asset("skeptic", &sold, 1.0).await });

    let commit = tokio::time::timeout(TIMEOUT, async {
        while let Some(inbound) = inbox.recv().await {
            if let Ok(Message::ProofCommit { transaction, .. }) =
                Message::from_bytes(&inbound.bytes)
            {
                return Some(transaction);
            }
        }
        None
    })
    .await
    .unwrap()
    .expect("no commitment received");

    let verdict = Message::ProofResult {
        transaction: commit.id,
        accepted: false,
    };
    skeptic.send(a.addr, verdict.to_bytes().unwrap()).await.unwrap();

    let result = transfer.await.unwrap();
    assert!(matches!(result, Err(NodeError::Rejected)));
    assert!(a.node.holds(&asset_id));
    assert!(a.node.pending().unwrap().is_empty());
    assert_eq!(a.node.stats().proofs_rejected, 1);
    assert_eq!(a.node.open_proofs(), 0);

    a.stop().await;
}

#[tokio::test]
async fn test_faster_minter_wins_race() {
    let (_network, nodes) = start_network(1, &[300, 50]).await;
    let (a, b) = (&nodes[0], &nodes[1]);

    a.node.register_asset("1 Race Ln").await.unwrap();

    // A's attempt wakes after B's block arrived and must abort
    let settled = wait_until(TIMEOUT, || a.node.stats().stale_aborts == 1).await;
    assert!(settled, "slow minter never aborted");

    assert_eq!(b.node.stats().blocks_minted, 1);
    assert_eq!(a.node.stats().blocks_minted, 0);
    assert_eq!(a.node.stats().blocks_adopted, 1);
    assert_eq!(a.chain_len(), 2);
    assert_eq!(a.head(), b.head());

    for node in &nodes {
        node.stop().await;
    }
}

#[tokio::test]
async fn test_threshold_batches_transactions() {
    let (_network, nodes) = start_network(3, &[30, 150, 300]).await;
    let a = &nodes[0];

    a.node.register_asset("1 First St").await.unwrap();
    a.node.register_asset("2 First St").await.unwrap();
    sleep(Duration::from_millis(400)).await;
    for node in &nodes {
        assert_eq!(node.chain_len(), 1);
        assert_eq!(node.node.pending().unwrap().len(), 2);
    }

    a.node.register_asset("3 First St").await.unwrap();
    let minted = wait_until(TIMEOUT, || nodes.iter().all(|node| node.chain_len() == 2)).await;
    assert!(minted, "full pool was not committed");

    let ledger = nodes[2].node.ledger().unwrap();
    assert_eq!(ledger.head_block().unwrap().body.transactions.len(), 3);
    assert_eq!(a.node.holdings().len(), 3);

    for node in &nodes {
        node.stop().await;
    }
}

#[tokio::test]
async fn test_rejoin_receives_missed_blocks() {
    let (network, mut nodes) = start_network(1, &[20, 200]).await;
    let b = nodes.pop().unwrap();
    let a = nodes.pop().unwrap();

    b.stop().await;
    network.set_online(b.addr, false);

    a.node.register_asset("77 Harbor Way").await.unwrap();
    assert!(wait_until(TIMEOUT, || a.chain_len() == 2).await);
    assert_eq!(b.chain_len(), 1);

    let peer_id = b.node.peer_id().to_string();
    let mut config = test_config(1, 20);
    config.network.rendezvous_addr = a.addr;
    let b = TestNode::restart(&network, config, b.store.clone(), b.addr).await;
    assert_eq!(b.node.peer_id(), peer_id);

    let caught_up = wait_until(TIMEOUT, || b.head() == a.head()).await;
    assert!(caught_up, "rejoined node did not catch up");
    assert_eq!(b.snapshot(), a.snapshot());

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_unreachable_verifier_times_out() {
    let (network, nodes) = start_network_with(1, &[20, 200], |i, config| {
        if i == 0 {
            config.proof.timeout_ms = Some(300);
        }
    })
    .await;
    let (a, b) = (&nodes[0], &nodes[1]);

    let asset_id = a.node.register_asset("5 Quiet Ct").await.unwrap();
    assert!(wait_until(TIMEOUT, || a.chain_len() == 2 && b.chain_len() == 2).await);

    network.set_online(b.addr, false);
    let result = a.node.transfer_asset(b.node.peer_id(), &asset_id, 10.0).await;
    assert!(matches!(result, Err(NodeError::ProofTimeout)));

    // Nothing changed hands
    assert!(a.node.holds(&asset_id));
    assert!(a.node.pending().unwrap().is_empty());
    assert_eq!(a.chain_len(), 2);

    for node in &nodes {
        node.stop().await;
    }
}

#[tokio::test]
async fn test_transfer_preconditions() {
    let (_network, nodes) = start_network(1, &[20]).await;
    let a = &nodes[0];

    let result = a.node.transfer_asset("ghost", "1x", 1.0).await;
    assert!(matches!(result, Err(NodeError::UnknownBuyer(_))));

    let result = a.node.transfer_asset(a.node.peer_id(), "1x", 1.0).await;
    assert!(matches!(result, Err(NodeError::NotOwned(_))));

    let result = a.node.register_asset("   ").await;
    assert!(matches!(result, Err(NodeError::EmptyAddress)));

    // Alone on the network nobody can verify the proof
    let asset_id = a.node.register_asset("8 Lonely Rd").await.unwrap();
    assert!(wait_until(TIMEOUT, || a.chain_len() == 2).await);
    let result = a.node.transfer_asset(a.node.peer_id(), &asset_id, 1.0).await;
    assert!(matches!(result, Err(NodeError::NoVerifiers)));

    a.stop().await;
}

#[tokio::test]
async fn test_malformed_messages_are_dropped() {
    let (network, nodes) = start_network(1, &[20]).await;
    let a = &nodes[0];
    let intruder = network.endpoint();

    intruder.send(a.addr, b"not json".to_vec()).await.unwrap();
    intruder
        .send(a.addr, br#"{"tag":"launch_missiles","data":{}}"#.to_vec())
        .await
        .unwrap();

    let dropped = wait_until(TIMEOUT, || a.node.stats().messages_dropped == 2).await;
    assert!(dropped, "malformed messages were not counted");

    // The node keeps working
    a.node.register_asset("4 Sturdy Blvd").await.unwrap();
    assert!(wait_until(TIMEOUT, || a.chain_len() == 2).await);

    // A well-formed but unsolicited proof result is handled and ignored
    let stray = Message::ProofResult {
        transaction: "nope".into(),
        accepted: true,
    };
    let handled = a.node.stats().messages_handled;
    intruder.send(a.addr, stray.to_bytes().unwrap()).await.unwrap();
    assert!(wait_until(TIMEOUT, || a.node.stats().messages_handled == handled + 1).await);
    assert_eq!(a.node.stats().messages_dropped, 2);

    a.stop().await;
}
