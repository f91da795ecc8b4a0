//! Peer Session: handshake then the announce / request / deliver loop for one
//! connection.
//!
//! ```text
//! Connecting -> Handshaking -> Active -> Closing -> Closed
//! ```
//!
//! The session owns the read half. The write half lives in the registered
//! `PeerHandle` so broadcasts and replies share one send mutex.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

use crate::admission::Rejection;
use crate::message::Message;
use crate::network::manager::NetworkManager;
use crate::network::message::NetworkMessage;
use crate::network::peer_connection_registry::{Direction, PeerHandle, PeerId};
use crate::network::rate_limiter::RateLimiter;
use crate::network::wire::{self, WireError};
use crate::types::Outpoint;

/// Why an active session ended.
#[derive(Debug)]
enum CloseReason {
    Eof,
    Shutdown,
    Wire(WireError),
    ProtocolViolation(String),
}

pub struct PeerSession {
    id: PeerId,
    addr: SocketAddr,
    reader: BufReader<OwnedReadHalf>,
    peer: Arc<PeerHandle>,
    manager: NetworkManager,
    rate_limiter: RateLimiter,
}

impl PeerSession {
    /// Runs the handshake on a freshly connected socket and, on success,
    /// registers the peer with the manager.
    pub async fn establish(
        mut stream: TcpStream,
        addr: SocketAddr,
        direction: Direction,
        manager: &NetworkManager,
    ) -> Result<Self, WireError> {
        trace!("Handshaking with {} ({})", addr, direction);
        let timeout = Duration::from_secs(manager.config().handshake_timeout_secs);
        wire::exchange_handshake(&mut stream, timeout).await?;

        let id = manager.next_peer_id();
        let (read_half, write_half) = stream.into_split();
        let peer = Arc::new(PeerHandle::new(
            id,
            addr,
            direction,
            write_half,
            manager.shutdown_token().child_token(),
            Duration::from_secs(manager.config().write_timeout_secs),
        ));
        manager.registry().register(peer.clone());
        info!("✅ Handshake complete with {} ({}, {})", addr, id, direction);

        Ok(Self {
            id,
            addr,
            reader: BufReader::new(read_half),
            peer,
            manager: manager.clone(),
            rate_limiter: RateLimiter::new(),
        })
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Processes frames until EOF, a protocol violation or shutdown, then
    /// disconnects the peer.
    pub async fn run(mut self) {
        let reason = self.active_loop().await;

        match &reason {
            CloseReason::Eof => info!("🔌 Peer {} closed the connection", self.addr),
            CloseReason::Shutdown => debug!("Session with {} cancelled", self.addr),
            CloseReason::Wire(e) => warn!("❌ Connection error with {}: {}", self.addr, e),
            CloseReason::ProtocolViolation(why) => {
                warn!("🚫 Disconnecting {}: protocol violation ({})", self.addr, why)
            }
        }
        self.manager.disconnect_peer(self.id).await;
        trace!("Session with {} closed", self.addr);
    }

    async fn active_loop(&mut self) -> CloseReason {
        let cancel = self.peer.cancel_token().clone();
        let max_message_size = self.manager.config().max_message_size;

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => return CloseReason::Shutdown,
                frame = wire::read_message(&mut self.reader, max_message_size) => frame,
            };

            let message = match frame {
                Ok(Some(message)) => message,
                Ok(None) => return CloseReason::Eof,
                Err(WireError::Io(e)) => return CloseReason::Wire(WireError::Io(e)),
                Err(e) => return CloseReason::ProtocolViolation(e.to_string()),
            };

            if !self.rate_limiter.check(message.kind()) {
                warn!(
                    "⚠️ Rate limit exceeded for {} from {}, dropping frame",
                    message.kind(),
                    self.addr
                );
                continue;
            }

            if let Err(reason) = self.handle(message).await {
                return reason;
            }
        }
    }

    async fn handle(&mut self, message: NetworkMessage) -> Result<(), CloseReason> {
        match message {
            NetworkMessage::Inv(outpoints) => self.handle_inv(outpoints).await,
            NetworkMessage::GetData(outpoint) => self.handle_get_data(outpoint).await,
            NetworkMessage::Data(bytes) => self.handle_data(bytes).await,
        }
    }

    async fn handle_inv(&mut self, outpoints: Vec<Outpoint>) -> Result<(), CloseReason> {
        let store = self.manager.validator().store().clone();
        for outpoint in outpoints {
            match store.has(&outpoint).await {
                Ok(true) => trace!("Already have {}", outpoint),
                Ok(false) => {
                    debug!("📥 Requesting {} from {}", outpoint, self.addr);
                    self.send(NetworkMessage::GetData(outpoint)).await?;
                }
                Err(e) => warn!("Store lookup for {} failed: {}", outpoint, e),
            }
        }
        Ok(())
    }

    async fn handle_get_data(&mut self, outpoint: Outpoint) -> Result<(), CloseReason> {
        match self.manager.validator().store().get_payload(&outpoint).await {
            Ok(Some(bytes)) => {
                debug!("📤 Serving {} to {}", outpoint, self.addr);
                self.send(NetworkMessage::Data(bytes)).await
            }
            Ok(None) => {
                trace!("No cached message for {} requested by {}", outpoint, self.addr);
                Ok(())
            }
            Err(e) => {
                warn!("Payload lookup for {} failed: {}", outpoint, e);
                Ok(())
            }
        }
    }

    async fn handle_data(&mut self, mut bytes: Vec<u8>) -> Result<(), CloseReason> {
        let message = Message::decode(&bytes)
            .map_err(|e| CloseReason::ProtocolViolation(format!("undecodable message: {}", e)))?;
        let outpoint = *message.outpoint();
        // Trailing bytes past the message are not relayed.
        bytes.truncate(message.encoded_len());

        match self.manager.validator().admit(&message).await {
            Ok(admission) => {
                info!(
                    "📨 Admitted message for {} from {} ({} bytes, {})",
                    outpoint,
                    self.addr,
                    message.payload().len(),
                    admission.script.name()
                );
                self.manager.broadcast(Some(self.id), outpoint, bytes).await;
            }
            Err(Rejection::AlreadySeen) => {
                debug!("Duplicate message for {} from {}", outpoint, self.addr);
            }
            Err(rejection) => {
                info!(
                    "🚫 Rejected message for {} from {}: {}",
                    outpoint, self.addr, rejection
                );
            }
        }
        Ok(())
    }

    async fn send(&self, message: NetworkMessage) -> Result<(), CloseReason> {
        self.peer.send(&message).await.map_err(CloseReason::Wire)
    }
}
