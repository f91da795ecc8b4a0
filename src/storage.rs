//! Outpoint Store: the set of outpoints that have already authored a message,
//! plus the encoded message cached for gossip replay.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::config::StorageConfig;
use crate::error::{AppError, StorageError};
use crate::types::Outpoint;

#[async_trait::async_trait]
pub trait OutpointStore: Send + Sync {
    async fn has(&self, outpoint: &Outpoint) -> Result<bool, StorageError>;

    /// Atomic check-and-insert. Fails with `StorageError::AlreadyPresent` if
    /// the outpoint is already recorded.
    async fn add(&self, outpoint: &Outpoint) -> Result<(), StorageError>;

    async fn remove(&self, outpoint: &Outpoint) -> Result<(), StorageError>;

    /// Removes every given outpoint with its cached payload. Returns the
    /// outpoints that were actually present, each with the payload it held.
    async fn prune(&self, outpoints: &[Outpoint]) -> Result<Vec<PrunedOutpoint>, StorageError>;

    /// Like `prune`, without handing back the payloads.
    async fn remove_all(&self, outpoints: &[Outpoint]) -> Result<Vec<Outpoint>, StorageError> {
        Ok(self
            .prune(outpoints)
            .await?
            .into_iter()
            .map(|pruned| pruned.outpoint)
            .collect())
    }

    async fn get_payload(&self, outpoint: &Outpoint) -> Result<Option<Vec<u8>>, StorageError>;

    /// Caches `payload` only while `outpoint` is recorded. Returns false when
    /// the outpoint was pruned first.
    async fn put_payload(&self, outpoint: &Outpoint, payload: &[u8]) -> Result<bool, StorageError>;

    async fn outpoints(&self) -> Result<Vec<Outpoint>, StorageError>;
    async fn len(&self) -> Result<usize, StorageError>;

    async fn last_scanned_height(&self) -> Result<Option<u64>, StorageError>;
    async fn set_last_scanned_height(&self, height: u64) -> Result<(), StorageError>;
}

/// An outpoint removed by `prune` and the message it had cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrunedOutpoint {
    pub outpoint: Outpoint,
    pub payload: Option<Vec<u8>>,
}

#[derive(Default)]
struct MemoryState {
    outpoints: HashSet<Outpoint>,
    payloads: HashMap<Outpoint, Vec<u8>>,
    last_scanned_height: Option<u64>,
}

#[derive(Default)]
pub struct InMemoryOutpointStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryOutpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl OutpointStore for InMemoryOutpointStore {
    async fn has(&self, outpoint: &Outpoint) -> Result<bool, StorageError> {
        Ok(self.state.read().await.outpoints.contains(outpoint))
    }

    async fn add(&self, outpoint: &Outpoint) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        if !state.outpoints.insert(*outpoint) {
            return Err(StorageError::AlreadyPresent(*outpoint));
        }
        Ok(())
    }

    async fn remove(&self, outpoint: &Outpoint) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        state.outpoints.remove(outpoint);
        state.payloads.remove(outpoint);
        Ok(())
    }

    async fn prune(&self, outpoints: &[Outpoint]) -> Result<Vec<PrunedOutpoint>, StorageError> {
        let mut state = self.state.write().await;
        let mut removed = Vec::new();
        for outpoint in outpoints {
            let payload = state.payloads.remove(outpoint);
            if state.outpoints.remove(outpoint) {
                removed.push(PrunedOutpoint {
                    outpoint: *outpoint,
                    payload,
                });
            }
        }
        Ok(removed)
    }

    async fn get_payload(&self, outpoint: &Outpoint) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.state.read().await.payloads.get(outpoint).cloned())
    }

    async fn put_payload(&self, outpoint: &Outpoint, payload: &[u8]) -> Result<bool, StorageError> {
        let mut state = self.state.write().await;
        if !state.outpoints.contains(outpoint) {
            return Ok(false);
        }
        state.payloads.insert(*outpoint, payload.to_vec());
        Ok(true)
    }

    async fn outpoints(&self) -> Result<Vec<Outpoint>, StorageError> {
        Ok(self.state.read().await.outpoints.iter().copied().collect())
    }

    async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.state.read().await.outpoints.len())
    }

    async fn last_scanned_height(&self) -> Result<Option<u64>, StorageError> {
        Ok(self.state.read().await.last_scanned_height)
    }

    async fn set_last_scanned_height(&self, height: u64) -> Result<(), StorageError> {
        self.state.write().await.last_scanned_height = Some(height);
        Ok(())
    }
}

const LAST_SCANNED_KEY: &[u8] = b"last_scanned_height";

pub struct SledOutpointStore {
    outpoints: sled::Tree,
    messages: sled::Tree,
    meta: sled::Tree,
}

impl SledOutpointStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let db = sled::Config::new()
            .path(path)
            .mode(sled::Mode::HighThroughput)
            .open()
            .map_err(|e| StorageError::DatabaseOpen {
                name: "outpoints".to_string(),
                source: e,
            })?;
        Self::from_db(&db)
    }

    pub fn from_db(db: &sled::Db) -> Result<Self, StorageError> {
        Ok(Self {
            outpoints: db.open_tree("outpoints")?,
            messages: db.open_tree("messages")?,
            meta: db.open_tree("meta")?,
        })
    }

    pub async fn flush(&self) -> Result<(), StorageError> {
        self.outpoints.flush_async().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl OutpointStore for SledOutpointStore {
    async fn has(&self, outpoint: &Outpoint) -> Result<bool, StorageError> {
        Ok(self.outpoints.contains_key(outpoint.as_bytes())?)
    }

    async fn add(&self, outpoint: &Outpoint) -> Result<(), StorageError> {
        let empty: &[u8] = &[];
        match self
            .outpoints
            .compare_and_swap(outpoint.as_bytes(), None::<&[u8]>, Some(empty))?
        {
            Ok(()) => Ok(()),
            Err(_) => Err(StorageError::AlreadyPresent(*outpoint)),
        }
    }

    async fn remove(&self, outpoint: &Outpoint) -> Result<(), StorageError> {
        self.outpoints.remove(outpoint.as_bytes())?;
        self.messages.remove(outpoint.as_bytes())?;
        Ok(())
    }

    async fn prune(&self, outpoints: &[Outpoint]) -> Result<Vec<PrunedOutpoint>, StorageError> {
        let mut removed = Vec::new();
        let mut payloads = sled::Batch::default();
        for outpoint in outpoints {
            if self.outpoints.remove(outpoint.as_bytes())?.is_some() {
                removed.push(PrunedOutpoint {
                    outpoint: *outpoint,
                    payload: self
                        .messages
                        .get(outpoint.as_bytes())?
                        .map(|value| value.to_vec()),
                });
            }
            payloads.remove(outpoint.as_bytes().as_slice());
        }
        self.messages.apply_batch(payloads)?;
        Ok(removed)
    }

    async fn get_payload(&self, outpoint: &Outpoint) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .messages
            .get(outpoint.as_bytes())?
            .map(|value| value.to_vec()))
    }

    async fn put_payload(&self, outpoint: &Outpoint, payload: &[u8]) -> Result<bool, StorageError> {
        if !self.outpoints.contains_key(outpoint.as_bytes())? {
            return Ok(false);
        }
        self.messages.insert(outpoint.as_bytes(), payload)?;
        // A prune that raced the insert leaves no orphan behind.
        if !self.outpoints.contains_key(outpoint.as_bytes())? {
            self.messages.remove(outpoint.as_bytes())?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn outpoints(&self) -> Result<Vec<Outpoint>, StorageError> {
        self.outpoints
            .iter()
            .keys()
            .map(|key| {
                let key = key?;
                Outpoint::from_slice(&key).ok_or_else(|| {
                    StorageError::Corrupt(format!("outpoint key of {} bytes", key.len()))
                })
            })
            .collect()
    }

    async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.outpoints.len())
    }

    async fn last_scanned_height(&self) -> Result<Option<u64>, StorageError> {
        match self.meta.get(LAST_SCANNED_KEY)? {
            Some(value) => {
                let bytes: [u8; 8] = value.as_ref().try_into().map_err(|_| {
                    StorageError::Corrupt(format!("height record of {} bytes", value.len()))
                })?;
                Ok(Some(u64::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    async fn set_last_scanned_height(&self, height: u64) -> Result<(), StorageError> {
        self.meta
            .insert(LAST_SCANNED_KEY, height.to_be_bytes().to_vec())?;
        Ok(())
    }
}

/// Builds the configured store backend.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn OutpointStore>, AppError> {
    match config.backend.as_str() {
        "memory" => {
            info!("💾 Using in-memory outpoint store");
            Ok(Arc::new(InMemoryOutpointStore::new()))
        }
        "sled" => {
            let store = SledOutpointStore::open(Path::new(&config.path))?;
            info!("💾 Opened sled outpoint store at {}", config.path);
            Ok(Arc::new(store))
        }
        other => Err(AppError::Config(format!(
            "unknown storage backend '{}'",
            other
        ))),
    }
}
