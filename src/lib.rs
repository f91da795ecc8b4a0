//! UTXO-gated chat relay.
//!
//! A message may enter the network only if it is signed by the owner of an
//! unspent Bitcoin output, and each output authors at most one message until
//! it is spent. Admitted messages are gossiped to peers with an
//! announce / request / deliver protocol.

pub mod admission;
pub mod bitcoin;
pub mod block_watcher;
pub mod config;
pub mod crypto;
pub mod error;
pub mod message;
pub mod network;
pub mod shutdown;
pub mod storage;
pub mod types;

pub use admission::{Admission, AdmissionValidator, Rejection};
pub use error::{AppError, StorageError};
pub use message::{Message, MessageError};
pub use types::Outpoint;
