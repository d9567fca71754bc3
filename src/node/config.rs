//! Node configuration.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::consensus::MintDelay;
use crate::crypto::{CryptoGroup, GroupError, DEFAULT_GENERATOR, DEFAULT_PRIME};

/// Full node configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Network configuration
    pub network: NetworkConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Minting configuration
    pub consensus: ConsensusConfig,

    /// Ownership proof configuration
    pub proof: ProofConfig,

    /// RPC configuration
    pub rpc: RpcConfig,
}

/// Network configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to listen on
    pub listen_addr: SocketAddr,

    /// Well-known node that admits newcomers
    pub rendezvous_addr: SocketAddr,

    /// Start a fresh network instead of joining one
    pub first_node: bool,

    /// Connection timeout
    pub connect_timeout_ms: u64,

    /// Maximum message size (bytes)
    pub max_message_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            rendezvous_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            first_node: false,
            connect_timeout_ms: 5000,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

/// Storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory
    pub data_dir: PathBuf,

    /// Keep state in memory only
    pub in_memory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            in_memory: false,
        }
    }
}

/// Minting configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Pending transactions that trigger a mint attempt
    pub pending_threshold: usize,

    /// Upper bound of the random mint delay
    pub max_delay_ms: u64,

    /// Replace the random delay with a fixed one
    pub fixed_delay_ms: Option<u64>,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            pending_threshold: 3,
            max_delay_ms: 15_000,
            fixed_delay_ms: None,
        }
    }
}

impl ConsensusConfig {
    pub fn mint_delay(&self) -> MintDelay {
        MintDelay::from_millis(self.max_delay_ms, self.fixed_delay_ms)
    }
}

/// Ownership proof configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProofConfig {
    /// Give up waiting for a verdict after this long (wait forever if unset)
    pub timeout_ms: Option<u64>,

    /// Keep an accepted proof open this long for verifiers still to answer
    pub session_linger_ms: u64,

    /// Group prime
    pub prime: u64,

    /// Group generator
    pub generator: u64,
}

impl Default for ProofConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            session_linger_ms: 30_000,
            prime: DEFAULT_PRIME,
            generator: DEFAULT_GENERATOR,
        }
    }
}

impl ProofConfig {
    /// Validated group parameters.
    pub fn group(&self) -> Result<CryptoGroup, GroupError> {
        CryptoGroup::new(self.prime, self.generator)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn session_linger(&self) -> Duration {
        Duration::from_millis(self.session_linger_ms)
    }
}

/// RPC server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Enable RPC server
    pub enabled: bool,

    /// RPC listen address
    pub listen_addr: SocketAddr,

    /// Allowed origins (CORS)
    pub allowed_origins: Vec<String>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8646)),
            allowed_origins: vec!["*".to_string()],
        }
    }
}

impl NodeConfig {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config: {}", e))?;

        serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))
    }

    /// Save configuration to file.
    pub fn save(&self, path: &PathBuf) -> Result<(), String> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        std::fs::write(path, content).map_err(|e| format!("Failed to write config: {}", e))
    }
}
