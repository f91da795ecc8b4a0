//! Shared doubles and helpers for integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use tokio_util::sync::CancellationToken;

use utxochat::bitcoin::{
    BlockSource, ChainBlock, ChainError, ChainInput, ChainTransaction, TxOutput, UtxoLookup,
};
use utxochat::config::NetworkConfig;
use utxochat::crypto::{p2pkh_payload, p2pkh_script, sign_ecdsa, sign_schnorr, taproot_script};
use utxochat::message::{Message, MAX_MESSAGE_SIZE};
use utxochat::network::NetworkManager;
use utxochat::storage::{InMemoryOutpointStore, OutpointStore};
use utxochat::{AdmissionValidator, Outpoint};

/// In-memory ledger serving both UTXO lookups and blocks.
#[derive(Default)]
pub struct MockLedger {
    outputs: Mutex<HashMap<Outpoint, TxOutput>>,
    blocks: Mutex<BTreeMap<u64, ChainBlock>>,
}

impl MockLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fund_p2pkh(&self, secret: &SecretKey, outpoint: Outpoint) {
        self.outputs.lock().insert(
            outpoint,
            TxOutput {
                script_pubkey: p2pkh_script(&public(secret)),
                spent: false,
            },
        );
    }

    pub fn fund_taproot(&self, secret: &SecretKey, outpoint: Outpoint) {
        let (xonly, _) = public(secret).x_only_public_key();
        self.outputs.lock().insert(
            outpoint,
            TxOutput {
                script_pubkey: taproot_script(&xonly),
                spent: false,
            },
        );
    }

    /// Appends empty blocks up to `height`.
    pub fn mine_to(&self, height: u64) {
        let mut blocks = self.blocks.lock();
        let start = blocks.keys().next_back().map_or(0, |h| h + 1);
        for h in start..=height {
            blocks.insert(h, block(h, format!("{:064x}", h), &[]));
        }
    }

    /// Appends one block spending `outpoints` and removes them from the UTXO set.
    pub fn mine_spending(&self, outpoints: &[Outpoint]) -> u64 {
        let mut blocks = self.blocks.lock();
        let height = blocks.keys().next_back().map_or(0, |h| h + 1);
        blocks.insert(height, block(height, format!("{:064x}", height), outpoints));
        let mut outputs = self.outputs.lock();
        for outpoint in outpoints {
            outputs.remove(outpoint);
        }
        height
    }
}

fn block(height: u64, hash: String, spends: &[Outpoint]) -> ChainBlock {
    ChainBlock {
        hash,
        height,
        transactions: vec![
            ChainTransaction {
                txid: format!("coinbase-{}", height),
                inputs: vec![ChainInput {
                    previous_outpoint: None,
                }],
            },
            ChainTransaction {
                txid: format!("spend-{}", height),
                inputs: spends
                    .iter()
                    .map(|o| ChainInput {
                        previous_outpoint: Some(*o),
                    })
                    .collect(),
            },
        ],
    }
}

#[async_trait::async_trait]
impl UtxoLookup for MockLedger {
    async fn get_output(&self, outpoint: &Outpoint) -> Result<Option<TxOutput>, ChainError> {
        Ok(self.outputs.lock().get(outpoint).cloned())
    }
}

#[async_trait::async_trait]
impl BlockSource for MockLedger {
    async fn get_height(&self) -> Result<u64, ChainError> {
        Ok(self.blocks.lock().keys().next_back().copied().unwrap_or(0))
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, ChainError> {
        self.blocks
            .lock()
            .get(&height)
            .map(|b| b.hash.clone())
            .ok_or_else(|| ChainError::Rpc {
                code: -8,
                message: "Block height out of range".into(),
            })
    }

    async fn get_block_by_height(&self, height: u64) -> Result<ChainBlock, ChainError> {
        self.blocks
            .lock()
            .get(&height)
            .cloned()
            .ok_or_else(|| ChainError::Rpc {
                code: -8,
                message: "Block height out of range".into(),
            })
    }
}

pub fn secret(byte: u8) -> SecretKey {
    SecretKey::from_slice(&[byte; 32]).unwrap()
}

pub fn public(secret: &SecretKey) -> PublicKey {
    PublicKey::from_secret_key(&Secp256k1::new(), secret)
}

pub fn outpoint(n: u8) -> Outpoint {
    Outpoint::new([n; 32], n as u32)
}

pub fn p2pkh_message(secret: &SecretKey, outpoint: Outpoint, text: &str) -> Message {
    let payload = p2pkh_payload(&public(secret), text.as_bytes());
    let signature = sign_ecdsa(secret, &payload);
    Message::new(outpoint, signature, payload).unwrap()
}

pub fn taproot_message(secret: &SecretKey, outpoint: Outpoint, text: &str) -> Message {
    let signature = sign_schnorr(secret, text.as_bytes());
    Message::new(outpoint, signature, text.as_bytes().to_vec()).unwrap()
}

pub fn test_network_config() -> NetworkConfig {
    NetworkConfig {
        listen_address: "127.0.0.1:0".to_string(),
        known_peers: Vec::new(),
        handshake_timeout_secs: 5,
        max_peers: 8,
        max_message_size: MAX_MESSAGE_SIZE,
        write_timeout_secs: 5,
        shutdown_grace_secs: 2,
    }
}

pub struct TestNode {
    pub network: NetworkManager,
    pub store: Arc<dyn OutpointStore>,
    pub addr: SocketAddr,
    pub shutdown: CancellationToken,
}

pub async fn start_node(ledger: &Arc<MockLedger>) -> TestNode {
    start_node_with(ledger, test_network_config()).await
}

pub async fn start_node_with(ledger: &Arc<MockLedger>, config: NetworkConfig) -> TestNode {
    let store: Arc<dyn OutpointStore> = Arc::new(InMemoryOutpointStore::new());
    let validator = Arc::new(AdmissionValidator::new(store.clone(), ledger.clone()));
    let shutdown = CancellationToken::new();
    let network = NetworkManager::new(config, validator, &shutdown);
    let addr = network.start().await.unwrap();
    TestNode {
        network,
        store,
        addr,
        shutdown,
    }
}

/// Polls `condition` until it holds or five seconds pass.
pub async fn wait_for<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}
