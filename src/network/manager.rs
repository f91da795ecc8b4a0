//! Network Manager: owns the listener, the peer registry and the fan-out of
//! admitted messages.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::admission::{Admission, AdmissionValidator, Rejection};
use crate::config::NetworkConfig;
use crate::error::AppError;
use crate::message::Message;
use crate::network::message::NetworkMessage;
use crate::network::peer_connection::PeerSession;
use crate::network::peer_connection_registry::{Direction, PeerId, PeerInfo, PeerRegistry};
use crate::types::Outpoint;

struct ManagerInner {
    config: NetworkConfig,
    validator: Arc<AdmissionValidator>,
    registry: PeerRegistry,
    /// One permit per inbound socket, held from accept until its session ends.
    inbound_slots: Arc<Semaphore>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    next_peer_id: AtomicU64,
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,
}

/// Cheap to clone; every clone drives the same node.
#[derive(Clone)]
pub struct NetworkManager {
    inner: Arc<ManagerInner>,
}

impl NetworkManager {
    pub fn new(
        config: NetworkConfig,
        validator: Arc<AdmissionValidator>,
        shutdown: &CancellationToken,
    ) -> Self {
        let inbound_slots = Arc::new(Semaphore::new(config.max_peers));
        Self {
            inner: Arc::new(ManagerInner {
                inbound_slots,
                config,
                validator,
                registry: PeerRegistry::new(),
                shutdown: shutdown.child_token(),
                tracker: TaskTracker::new(),
                next_peer_id: AtomicU64::new(1),
                local_addr: parking_lot::Mutex::new(None),
            }),
        }
    }

    pub(crate) fn config(&self) -> &NetworkConfig {
        &self.inner.config
    }

    pub(crate) fn validator(&self) -> &Arc<AdmissionValidator> {
        &self.inner.validator
    }

    pub(crate) fn registry(&self) -> &PeerRegistry {
        &self.inner.registry
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    pub(crate) fn next_peer_id(&self) -> PeerId {
        PeerId(self.inner.next_peer_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    /// Binds the listener, starts accepting and dials the configured peers.
    pub async fn start(&self) -> Result<SocketAddr, AppError> {
        let listen = &self.inner.config.listen_address;
        let listener = TcpListener::bind(listen)
            .await
            .map_err(|e| AppError::Bind {
                addr: listen.clone(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        *self.inner.local_addr.lock() = Some(local_addr);
        info!("🌐 Listening for peers on {}", local_addr);

        let manager = self.clone();
        self.inner
            .tracker
            .spawn(async move { manager.accept_loop(listener).await });

        for peer in self.inner.config.known_peers.clone() {
            let manager = self.clone();
            self.inner.tracker.spawn(async move {
                if let Err(e) = manager.connect(&peer).await {
                    warn!("⚠️ Could not connect to known peer {}: {}", peer, e);
                }
            });
        }

        Ok(local_addr)
    }

    async fn accept_loop(&self, listener: TcpListener) {
        loop {
            let accepted = tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    continue;
                }
            };

            // Handshaking sockets count against the limit too.
            let permit = match self.inner.inbound_slots.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(
                        "🚫 Rejecting {}: inbound peer limit {} reached",
                        addr, self.inner.config.max_peers
                    );
                    continue;
                }
            };

            info!("🔌 New inbound connection from {}", addr);
            let manager = self.clone();
            self.inner.tracker.spawn(async move {
                let _permit = permit;
                match PeerSession::establish(stream, addr, Direction::Inbound, &manager).await {
                    Ok(session) => session.run().await,
                    Err(e) => warn!("🚫 Handshake with {} failed: {}", addr, e),
                }
            });
        }
        info!("🛑 Listener closed");
    }

    /// Dials `addr`, completes the handshake and starts the session. Returns
    /// once the peer is registered.
    pub async fn connect(&self, addr: &str) -> Result<PeerId, AppError> {
        let remote = tokio::net::lookup_host(addr)
            .await?
            .next()
            .ok_or_else(|| AppError::Network(format!("{} did not resolve", addr)))?;

        if self
            .inner
            .registry
            .snapshot()
            .iter()
            .any(|peer| peer.addr() == remote)
        {
            return Err(AppError::Network(format!("already connected to {}", remote)));
        }

        let timeout = Duration::from_secs(self.inner.config.handshake_timeout_secs);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(remote))
            .await
            .map_err(|_| AppError::Network(format!("connect to {} timed out", remote)))??;

        let session = PeerSession::establish(stream, remote, Direction::Outbound, self)
            .await
            .map_err(|e| AppError::Network(format!("handshake with {} failed: {}", remote, e)))?;
        let id = session.id();
        info!("🤝 Connected to peer {} ({})", remote, id);

        self.inner.tracker.spawn(session.run());
        Ok(id)
    }

    /// Caches `payload` for `GetData` replies and announces `outpoint` to every
    /// peer except `source`. Each send runs in its own task. Nothing is
    /// announced if the outpoint was already pruned.
    pub async fn broadcast(&self, source: Option<PeerId>, outpoint: Outpoint, payload: Vec<u8>) {
        let store = self.inner.validator.store();
        match store.put_payload(&outpoint, &payload).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("{} was pruned before it could be announced", outpoint);
                return;
            }
            Err(e) => {
                error!("❌ Failed to cache message for {}: {}", outpoint, e);
                return;
            }
        }

        let targets: Vec<_> = self
            .inner
            .registry
            .snapshot()
            .into_iter()
            .filter(|peer| Some(peer.id()) != source)
            .collect();
        debug!("📡 Announcing {} to {} peer(s)", outpoint, targets.len());

        for peer in targets {
            let manager = self.clone();
            self.inner.tracker.spawn(async move {
                if let Err(e) = peer.send(&NetworkMessage::Inv(vec![outpoint])).await {
                    warn!("❌ Failed to announce {} to {}: {}", outpoint, peer.addr(), e);
                    manager.disconnect_peer(peer.id()).await;
                }
            });
        }
    }

    /// Admits a locally produced message and relays it to every peer.
    pub async fn submit(&self, message: &Message) -> Result<Admission, Rejection> {
        let admission = self.inner.validator.admit(message).await?;
        info!("📝 Accepted local message for {}", admission.outpoint);
        self.broadcast(None, admission.outpoint, message.encode())
            .await;
        Ok(admission)
    }

    /// Removes the peer and closes its socket. Safe to call repeatedly.
    pub(crate) async fn disconnect_peer(&self, id: PeerId) {
        if let Some(peer) = self.inner.registry.unregister(id) {
            peer.disconnect();
            peer.shutdown().await;
            info!("🔌 Disconnected {} ({})", peer.addr(), id);
        }
    }

    pub fn peer_count(&self) -> usize {
        self.inner.registry.count()
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        self.inner
            .registry
            .snapshot()
            .iter()
            .map(|peer| PeerInfo {
                id: peer.id(),
                addr: peer.addr(),
                direction: peer.direction(),
            })
            .collect()
    }

    /// Stops accepting, disconnects every peer and waits for session tasks.
    /// The whole sweep is bounded by the shutdown grace period.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();

        let grace = Duration::from_secs(self.inner.config.shutdown_grace_secs);
        let sweep = async {
            let mut closing = tokio::task::JoinSet::new();
            for peer in self.inner.registry.snapshot() {
                let manager = self.clone();
                closing.spawn(async move { manager.disconnect_peer(peer.id()).await });
            }
            while closing.join_next().await.is_some() {}
            self.inner.tracker.wait().await;
        };
        if tokio::time::timeout(grace, sweep).await.is_err() {
            warn!(
                "⚠️ {} network task(s) still running after {:?}, proceeding",
                self.inner.tracker.len(),
                grace
            );
        } else {
            info!("✅ Network stopped");
        }
    }
}
