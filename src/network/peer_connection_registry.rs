//! Registry of handshaken peers. The network manager is the only writer.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::network::message::NetworkMessage;
use crate::network::wire::{self, WireError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// Write side of one peer connection. Sends are serialized by the send
/// mutex so frames never interleave.
pub struct PeerHandle {
    id: PeerId,
    addr: SocketAddr,
    direction: Direction,
    writer: Mutex<BufWriter<OwnedWriteHalf>>,
    alive: AtomicBool,
    cancel: CancellationToken,
    write_timeout: Duration,
}

impl PeerHandle {
    pub fn new(
        id: PeerId,
        addr: SocketAddr,
        direction: Direction,
        writer: OwnedWriteHalf,
        cancel: CancellationToken,
        write_timeout: Duration,
    ) -> Self {
        Self {
            id,
            addr,
            direction,
            writer: Mutex::new(BufWriter::new(writer)),
            alive: AtomicBool::new(true),
            cancel,
            write_timeout,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Writes one frame. A write that does not finish within the write
    /// timeout fails the send; the caller decides whether to disconnect.
    /// Cancelling the peer aborts a pending send.
    pub async fn send(&self, message: &NetworkMessage) -> Result<(), WireError> {
        if !self.is_alive() {
            return Err(not_connected());
        }
        let frame = wire::serialize_frame(message)?;

        let mut writer = tokio::select! {
            _ = self.cancel.cancelled() => return Err(not_connected()),
            writer = self.writer.lock() => writer,
        };
        let write = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        };
        tokio::select! {
            _ = self.cancel.cancelled() => Err(not_connected()),
            written = tokio::time::timeout(self.write_timeout, write) => match written {
                Ok(result) => Ok(result?),
                Err(_) => Err(WireError::Io(std::io::ErrorKind::TimedOut.into())),
            },
        }
    }

    /// Marks the peer dead and cancels its session. Returns true only for
    /// the first call.
    pub fn disconnect(&self) -> bool {
        if self.alive.swap(false, Ordering::AcqRel) {
            self.cancel.cancel();
            true
        } else {
            false
        }
    }

    /// Shuts down the write half of the socket without flushing buffered
    /// frames. Gives up after the write timeout.
    pub async fn shutdown(&self) {
        let close = async {
            let mut writer = self.writer.lock().await;
            writer.get_mut().shutdown().await
        };
        match tokio::time::timeout(self.write_timeout, close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Socket shutdown for {} failed: {}", self.addr, e),
            Err(_) => debug!("Socket shutdown for {} timed out", self.addr),
        }
    }
}

fn not_connected() -> WireError {
    WireError::Io(std::io::ErrorKind::NotConnected.into())
}

impl fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerHandle")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("direction", &self.direction)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub direction: Direction,
}

#[derive(Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerId, Arc<PeerHandle>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer: Arc<PeerHandle>) {
        debug!("✅ Registered {} ({}, {})", peer.id(), peer.addr(), peer.direction());
        self.peers.write().insert(peer.id(), peer);
    }

    /// Removes the peer, returning it only if it was still registered.
    pub fn unregister(&self, id: PeerId) -> Option<Arc<PeerHandle>> {
        let removed = self.peers.write().remove(&id);
        if let Some(peer) = &removed {
            debug!("🔌 Unregistered {} ({})", id, peer.addr());
        }
        removed
    }

    pub fn get(&self, id: PeerId) -> Option<Arc<PeerHandle>> {
        self.peers.read().get(&id).cloned()
    }

    pub fn snapshot(&self) -> Vec<Arc<PeerHandle>> {
        self.peers.read().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.peers.read().len()
    }
}
