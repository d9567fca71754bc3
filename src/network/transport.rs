//! Transport layer: send opaque bytes to an address, receive `(from, bytes)`.
//!
//! [`TcpTransport`] serves real nodes. [`MemoryNetwork`] wires nodes together
//! in-process for tests and can take endpoints offline.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Capacity of the inbound queue.
const INBOUND_CAPACITY: usize = 10_000;

/// Capacity of each per-connection outbound queue.
const OUTBOUND_CAPACITY: usize = 1_000;

/// Bytes received from a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inbound {
    /// Listen address of the sender
    pub from: SocketAddr,

    /// Raw payload
    pub bytes: Vec<u8>,
}

/// Point-to-point byte delivery between peers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Address other peers reach this node at.
    fn local_addr(&self) -> SocketAddr;

    /// Deliver bytes to the peer listening at `to`.
    async fn send(&self, to: SocketAddr, bytes: Vec<u8>) -> io::Result<()>;

    /// Take the inbound receiver. Only the first call gets it.
    fn take_receiver(&self) -> Option<mpsc::Receiver<Inbound>>;
}

// ============================================================================
// TCP
// ============================================================================

/// TCP transport configuration.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Address to listen on
    pub listen_addr: SocketAddr,

    /// Maximum frame size (bytes)
    pub max_message_size: usize,

    /// Connection timeout
    pub connect_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            max_message_size: 16 * 1024 * 1024, // 16 MB
            connect_timeout_ms: 5000,
        }
    }
}

/// One length-prefixed frame on the wire.
#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    from: SocketAddr,
    payload: Vec<u8>,
}

/// TCP transport with lazily opened outbound connections.
///
/// Each outbound connection is owned by a writer task fed through a channel;
/// inbound connections are read-only and replies travel over the responder's
/// own outbound connection to `Frame::from`.
pub struct TcpTransport {
    /// Configuration
    config: TransportConfig,

    /// Bound listen address
    local_addr: SocketAddr,

    /// Outbound connections by remote listen address
    connections: RwLock<HashMap<SocketAddr, mpsc::Sender<Vec<u8>>>>,

    /// Channel for incoming frames
    incoming_tx: mpsc::Sender<Inbound>,
    incoming_rx: Mutex<Option<mpsc::Receiver<Inbound>>>,
}

impl TcpTransport {
    /// Bind the listener and start accepting connections.
    pub async fn bind(config: TransportConfig) -> io::Result<Arc<Self>> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);

        let transport = Arc::new(Self {
            config,
            local_addr,
            connections: RwLock::new(HashMap::new()),
            incoming_tx: tx,
            incoming_rx: Mutex::new(Some(rx)),
        });

        let acceptor = Arc::clone(&transport);
        tokio::spawn(async move {
            if let Err(e) = acceptor.accept_loop(listener).await {
                warn!("Listener on {} stopped: {}", acceptor.local_addr, e);
            }
        });

        Ok(transport)
    }

    /// Get number of open outbound connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    async fn accept_loop(&self, listener: TcpListener) -> io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            debug!("Accepted connection from {}", addr);
            self.spawn_reader(stream);
        }
    }

    /// Read frames from an inbound connection until it closes.
    fn spawn_reader(&self, stream: TcpStream) {
        let incoming_tx = self.incoming_tx.clone();
        let max_size = self.config.max_message_size;

        tokio::spawn(async move {
            let mut reader = stream;
            let mut len_buf = [0u8; 4];

            loop {
                // Read length prefix
                if reader.read_exact(&mut len_buf).await.is_err() {
                    break;
                }

                let len = u32::from_be_bytes(len_buf) as usize;
                if len > max_size {
                    warn!("Dropping connection: frame of {} bytes exceeds limit", len);
                    break;
                }

                let mut data = vec![0u8; len];
                if reader.read_exact(&mut data).await.is_err() {
                    break;
                }

                match bincode::deserialize::<Frame>(&data) {
                    Ok(frame) => {
                        let inbound = Inbound {
                            from: frame.from,
                            bytes: frame.payload,
                        };
                        if incoming_tx.send(inbound).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Dropping undecodable frame: {}", e),
                }
            }
        });
    }

    /// Open an outbound connection and its writer task.
    async fn connect(&self, addr: SocketAddr) -> io::Result<mpsc::Sender<Vec<u8>>> {
        let stream = tokio::time::timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            TcpStream::connect(addr),
        )
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "Connection timeout"))??;

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_CAPACITY);

        tokio::spawn(async move {
            let mut writer = stream;
            while let Some(data) = rx.recv().await {
                let len = (data.len() as u32).to_be_bytes();
                if writer.write_all(&len).await.is_err() {
                    break;
                }
                if writer.write_all(&data).await.is_err() {
                    break;
                }
            }
        });

        self.connections.write().insert(addr, tx.clone());
        Ok(tx)
    }

    /// Drop a cached connection so the next send reconnects.
    pub fn disconnect(&self, addr: &SocketAddr) {
        self.connections.write().remove(addr);
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn send(&self, to: SocketAddr, bytes: Vec<u8>) -> io::Result<()> {
        let frame = bincode::serialize(&Frame {
            from: self.local_addr,
            payload: bytes,
        })
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if frame.len() > self.config.max_message_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Message exceeds maximum size",
            ));
        }

        let cached = self.connections.read().get(&to).cloned();
        let sender = match cached {
            Some(sender) => sender,
            None => self.connect(to).await?,
        };

        if sender.send(frame).await.is_err() {
            self.disconnect(&to);
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "Connection closed"));
        }
        Ok(())
    }

    fn take_receiver(&self) -> Option<mpsc::Receiver<Inbound>> {
        self.incoming_rx.lock().take()
    }
}

// ============================================================================
// IN-MEMORY
// ============================================================================

struct Endpoint {
    sender: mpsc::Sender<Inbound>,
    online: bool,
}

/// In-process network connecting [`MemoryTransport`] endpoints.
pub struct MemoryNetwork {
    endpoints: RwLock<HashMap<SocketAddr, Endpoint>>,
    next_port: AtomicU16,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            endpoints: RwLock::new(HashMap::new()),
            next_port: AtomicU16::new(10_000),
        })
    }

    /// Create an endpoint at the next free loopback address.
    pub fn endpoint(self: &Arc<Self>) -> Arc<MemoryTransport> {
        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        self.endpoint_at(SocketAddr::from(([127, 0, 0, 1], port)))
    }

    /// Create (or replace) an endpoint at `addr`.
    pub fn endpoint_at(self: &Arc<Self>, addr: SocketAddr) -> Arc<MemoryTransport> {
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        self.endpoints.write().insert(
            addr,
            Endpoint {
                sender: tx,
                online: true,
            },
        );
        Arc::new(MemoryTransport {
            addr,
            network: Arc::clone(self),
            receiver: Mutex::new(Some(rx)),
        })
    }

    /// Take an endpoint off the network or bring it back. An offline
    /// endpoint neither sends nor receives.
    pub fn set_online(&self, addr: SocketAddr, online: bool) {
        if let Some(endpoint) = self.endpoints.write().get_mut(&addr) {
            endpoint.online = online;
        }
    }

    pub fn is_online(&self, addr: &SocketAddr) -> bool {
        self.endpoints
            .read()
            .get(addr)
            .map_or(false, |endpoint| endpoint.online)
    }

    fn route(&self, to: &SocketAddr) -> Option<mpsc::Sender<Inbound>> {
        self.endpoints
            .read()
            .get(to)
            .filter(|endpoint| endpoint.online)
            .map(|endpoint| endpoint.sender.clone())
    }
}

/// One endpoint of a [`MemoryNetwork`].
pub struct MemoryTransport {
    addr: SocketAddr,
    network: Arc<MemoryNetwork>,
    receiver: Mutex<Option<mpsc::Receiver<Inbound>>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn send(&self, to: SocketAddr, bytes: Vec<u8>) -> io::Result<()> {
        if !self.network.is_online(&self.addr) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "Endpoint offline"));
        }
        let sender = self
            .network
            .route(&to)
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "Peer unreachable"))?;

        sender
            .send(Inbound {
                from: self.addr,
                bytes,
            })
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "Receiver closed"))
    }

    fn take_receiver(&self) -> Option<mpsc::Receiver<Inbound>> {
        self.receiver.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_tcp_round_trip() {
        let config = TransportConfig {
            listen_addr: make_addr(0),
            ..Default::default()
        };
        let a = TcpTransport::bind(config.clone()).await.unwrap();
        let b = TcpTransport::bind(config).await.unwrap();
        let mut b_rx = b.take_receiver().unwrap();
        assert!(b.take_receiver().is_none());

        a.send(b.local_addr(), b"hello".to_vec()).await.unwrap();
        a.send(b.local_addr(), b"again".to_vec()).await.unwrap();
        assert_eq!(a.connection_count(), 1);

        let first = b_rx.recv().await.unwrap();
        assert_eq!(first.from, a.local_addr());
        assert_eq!(first.bytes, b"hello");
        assert_eq!(b_rx.recv().await.unwrap().bytes, b"again");
    }

    #[tokio::test]
    async fn test_tcp_connect_nonexistent() {
        let config = TransportConfig {
            listen_addr: make_addr(0),
            connect_timeout_ms: 100,
            ..Default::default()
        };
        let transport = TcpTransport::bind(config).await.unwrap();

        // Bind then drop a listener to get a port nothing listens on
        let listener = TcpListener::bind(make_addr(0)).await.unwrap();
        let dead = listener.local_addr().unwrap();
        drop(listener);

        assert!(transport.send(dead, b"x".to_vec()).await.is_err());
        assert_eq!(transport.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_memory_delivery_and_offline() {
        let network = MemoryNetwork::new();
        let a = network.endpoint();
        let b = network.endpoint();
        let mut b_rx = b.take_receiver().unwrap();

        a.send(b.local_addr(), vec![1, 2, 3]).await.unwrap();
        let inbound = b_rx.recv().await.unwrap();
        assert_eq!(inbound.from, a.local_addr());
        assert_eq!(inbound.bytes, vec![1, 2, 3]);

        network.set_online(b.local_addr(), false);
        assert!(a.send(b.local_addr(), vec![4]).await.is_err());
        assert!(b.send(a.local_addr(), vec![5]).await.is_err());

        network.set_online(b.local_addr(), true);
        a.send(b.local_addr(), vec![6]).await.unwrap();
        assert_eq!(b_rx.recv().await.unwrap().bytes, vec![6]);
    }

    #[tokio::test]
    async fn test_memory_unknown_address() {
        let network = MemoryNetwork::new();
        let a = network.endpoint();
        assert!(a.send(make_addr(1), vec![]).await.is_err());
    }
}
