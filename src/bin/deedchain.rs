//! deedchain node binary
//!
//! Runs a ledger peer and reads commands from standard input.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use deedchain::network::{TcpTransport, TransportConfig};
use deedchain::node::{start_rpc_server, NodeConfig, PropertyNode};
use deedchain::storage::{FileStore, MemoryStore, StateStore};

const HELP: &str = "\
Commands:
  register <address>                 register a new property
  sell <buyer> <amount> <property>   transfer an owned property
  holdings                           list owned properties
  chain                              print the chain from head to genesis
  peers                              list known peers
  quit                               stop the node";

#[tokio::main]
async fn main() {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    info!("deedchain node v{}", env!("CARGO_PKG_VERSION"));

    // Load or create configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.json"));
    let config = if config_path.exists() {
        match NodeConfig::load(&config_path) {
            Ok(cfg) => {
                info!("Loaded configuration from {}", config_path.display());
                cfg
            }
            Err(e) => {
                error!("Failed to load config: {}", e);
                info!("Using default configuration");
                NodeConfig::default()
            }
        }
    } else {
        info!("No config file found, using defaults");
        let config = NodeConfig::default();

        // Save default config for reference
        if let Err(e) = config.save(&config_path) {
            error!("Failed to save default config: {}", e);
        } else {
            info!("Saved default configuration to {}", config_path.display());
        }

        config
    };

    info!("Listen address: {}", config.network.listen_addr);
    info!("Rendezvous: {}", config.network.rendezvous_addr);
    info!("Mint threshold: {}", config.consensus.pending_threshold);
    info!("RPC enabled: {}", config.rpc.enabled);

    let store: Arc<dyn StateStore> = if config.storage.in_memory {
        Arc::new(MemoryStore::new())
    } else {
        match FileStore::open(&config.storage.data_dir) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!(
                    "Failed to open data dir {}: {}",
                    config.storage.data_dir.display(),
                    e
                );
                std::process::exit(1);
            }
        }
    };

    let transport = match TcpTransport::bind(TransportConfig {
        listen_addr: config.network.listen_addr,
        max_message_size: config.network.max_message_size,
        connect_timeout_ms: config.network.connect_timeout_ms,
    })
    .await
    {
        Ok(transport) => transport,
        Err(e) => {
            error!("Failed to bind {}: {}", config.network.listen_addr, e);
            std::process::exit(1);
        }
    };

    let rpc_addr = config.rpc.listen_addr;
    let rpc_enabled = config.rpc.enabled;

    let node = match PropertyNode::new(config, store, transport) {
        Ok(node) => node,
        Err(e) => {
            error!("Failed to create node: {}", e);
            std::process::exit(1);
        }
    };

    info!("Peer ID: {}", node.peer_id());

    if let Err(e) = node.start().await {
        error!("Failed to start node: {}", e);
        std::process::exit(1);
    }

    if rpc_enabled {
        let rpc_node = Arc::clone(&node);
        tokio::spawn(async move {
            if let Err(e) = start_rpc_server(rpc_node, rpc_addr).await {
                error!("RPC server error: {}", e);
            }
        });
    }

    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !run_command(&node, line.trim()).await {
                        break;
                    }
                }
                Ok(None) => {
                    // Stdin closed, keep serving peers until ctrl+c
                    if tokio::signal::ctrl_c().await.is_err() {
                        warn!("Failed to listen for ctrl+c");
                    }
                    break;
                }
                Err(e) => {
                    error!("Failed to read command: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    node.stop().await;
    info!("Goodbye!");
}

/// Run one command line. Returns false when the node should stop.
async fn run_command(node: &Arc<PropertyNode>, line: &str) -> bool {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    match command {
        "" => {}
        "register" => match node.register_asset(rest).await {
            Ok(id) => println!("Registered property {id}"),
            Err(e) => println!("Registration failed: {e}"),
        },
        "sell" => {
            let mut parts = rest.splitn(3, ' ');
            let (Some(buyer), Some(amount), Some(property)) =
                (parts.next(), parts.next(), parts.next())
            else {
                println!("Usage: sell <buyer> <amount> <property>");
                return true;
            };
            let Ok(amount) = amount.parse::<f64>() else {
                println!("Invalid amount: {amount}");
                return true;
            };
            match node.transfer_asset(buyer, property.trim(), amount).await {
                Ok(tx) => println!("Transfer accepted, transaction {tx}"),
                Err(e) => println!("Transfer failed: {e}"),
            }
        }
        "holdings" => {
            for (id, record) in node.holdings() {
                println!("{id}: {} (history: {:?})", record.address, record.history);
            }
        }
        "chain" => match node.ledger() {
            Ok(ledger) => println!("{}", ledger.walk_chain().join(" -> ")),
            Err(e) => println!("Failed to read chain: {e}"),
        },
        "peers" => match node.peer_list() {
            Ok(peers) => {
                for (id, entry) in peers.iter() {
                    println!("{id} @ {} owns {:?}", entry.address, entry.owned);
                }
            }
            Err(e) => println!("Failed to read peers: {e}"),
        },
        "quit" => return false,
        _ => println!("{HELP}"),
    }
    true
}
