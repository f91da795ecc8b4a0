//! Admission Validator: decides whether a message may enter the network.
//!
//! A message is admitted when its outpoint has not authored before, the
//! outpoint is an unspent output whose script the claimed key owns, and the
//! signature over the payload verifies. Admission of the same outpoint is
//! serialized through a per-outpoint slot; distinct outpoints run in parallel.

use std::sync::Arc;

use dashmap::DashMap;
use secp256k1::XOnlyPublicKey;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::bitcoin::script::ScriptKind;
use crate::bitcoin::UtxoLookup;
use crate::crypto::{hash160, payload_owner_key, OwnerKey};
use crate::error::StorageError;
use crate::message::Message;
use crate::storage::OutpointStore;
use crate::types::Outpoint;

/// Why a message was not admitted. Never fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("outpoint already authored a message")]
    AlreadySeen,

    #[error("output is absent or spent")]
    UtxoNotFound,

    #[error("output script cannot prove single-key ownership")]
    ScriptUnsupported,

    #[error("claimed key does not own the output")]
    OwnerMismatch,

    #[error("payload does not carry a valid owner key")]
    MissingOwnerKey,

    #[error("signature verification failed")]
    BadSignature,

    #[error("UTXO lookup unavailable: {0}")]
    VerificationUnavailable(String),

    #[error("outpoint store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Outcome of a successful admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub outpoint: Outpoint,
    pub script: ScriptKind,
    pub owner: OwnerKey,
}

type Slot = Arc<Mutex<()>>;

pub struct AdmissionValidator {
    store: Arc<dyn OutpointStore>,
    lookup: Arc<dyn UtxoLookup>,
    slots: DashMap<Outpoint, Slot>,
}

/// Holds the admission slot of one outpoint. The slot entry is dropped from
/// the map once nobody else is waiting on it.
struct SlotGuard<'a> {
    slots: &'a DashMap<Outpoint, Slot>,
    outpoint: Outpoint,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.slots
            .remove_if(&self.outpoint, |_, slot| Arc::strong_count(slot) == 1);
    }
}

impl AdmissionValidator {
    pub fn new(store: Arc<dyn OutpointStore>, lookup: Arc<dyn UtxoLookup>) -> Self {
        Self {
            store,
            lookup,
            slots: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn OutpointStore> {
        &self.store
    }

    /// Outpoints currently being admitted.
    pub fn active_slots(&self) -> usize {
        self.slots.len()
    }

    async fn acquire_slot(&self, outpoint: Outpoint) -> SlotGuard<'_> {
        let slot = self.slots.entry(outpoint).or_default().clone();
        let guard = slot.lock_owned().await;
        SlotGuard {
            slots: &self.slots,
            outpoint,
            guard: Some(guard),
        }
    }

    /// Checks `message` against an owner key supplied by the caller.
    pub async fn validate(
        &self,
        message: &Message,
        claimed_key: &OwnerKey,
    ) -> Result<(), Rejection> {
        self.run(message, Some(claimed_key)).await.map(|_| ())
    }

    /// Checks `message`, taking the owner key from the output script for
    /// Taproot and from the payload prefix for P2PKH.
    pub async fn admit(&self, message: &Message) -> Result<Admission, Rejection> {
        self.run(message, None).await
    }

    async fn run(
        &self,
        message: &Message,
        claimed_key: Option<&OwnerKey>,
    ) -> Result<Admission, Rejection> {
        let outpoint = *message.outpoint();
        let _slot = self.acquire_slot(outpoint).await;

        let seen = self
            .store
            .has(&outpoint)
            .await
            .map_err(|e| Rejection::StoreUnavailable(e.to_string()))?;
        if seen {
            return Err(Rejection::AlreadySeen);
        }

        let output = self
            .lookup
            .get_output(&outpoint)
            .await
            .map_err(|e| Rejection::VerificationUnavailable(e.to_string()))?;
        let output = match output {
            Some(output) if !output.spent => output,
            _ => return Err(Rejection::UtxoNotFound),
        };

        let script = ScriptKind::classify(&output.script_pubkey);
        if script == ScriptKind::Unsupported {
            return Err(Rejection::ScriptUnsupported);
        }

        let owner = match claimed_key {
            Some(key) => *key,
            None => resolve_owner(&script, message.payload())?,
        };
        check_ownership(&script, &owner)?;

        if !owner.verify(message.payload(), message.signature()) {
            return Err(Rejection::BadSignature);
        }

        self.store.add(&outpoint).await.map_err(|e| match e {
            StorageError::AlreadyPresent(_) => Rejection::AlreadySeen,
            other => Rejection::StoreUnavailable(other.to_string()),
        })?;

        debug!("✅ Admitted message for {} ({}, {})", outpoint, script.name(), owner);
        Ok(Admission {
            outpoint,
            script,
            owner,
        })
    }
}

fn resolve_owner(script: &ScriptKind, payload: &[u8]) -> Result<OwnerKey, Rejection> {
    match script {
        ScriptKind::P2pkh(_) => payload_owner_key(payload)
            .map(OwnerKey::Ecdsa)
            .ok_or(Rejection::MissingOwnerKey),
        ScriptKind::TaprootKey(key) => XOnlyPublicKey::from_slice(key)
            .map(OwnerKey::Schnorr)
            .map_err(|_| Rejection::ScriptUnsupported),
        ScriptKind::Unsupported => Err(Rejection::ScriptUnsupported),
    }
}

fn check_ownership(script: &ScriptKind, owner: &OwnerKey) -> Result<(), Rejection> {
    let owns = match (script, owner) {
        // Legacy outputs may commit to either encoding of the key.
        (ScriptKind::P2pkh(hash), OwnerKey::Ecdsa(key)) => {
            hash160(&key.serialize()) == *hash
                || hash160(&key.serialize_uncompressed()) == *hash
        }
        (ScriptKind::TaprootKey(expected), OwnerKey::Schnorr(key)) => key.serialize() == *expected,
        _ => false,
    };
    if owns {
        Ok(())
    } else {
        Err(Rejection::OwnerMismatch)
    }
}
