pub mod manager;
pub mod message;
pub mod peer_connection;
pub mod peer_connection_registry;
pub mod rate_limiter;
pub mod wire;

pub use manager::NetworkManager;
pub use peer_connection_registry::{Direction, PeerId, PeerInfo};
