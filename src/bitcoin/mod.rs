//! Ledger collaborators: UTXO lookup and block source.
//!
//! The admission validator and the block watcher only see these traits.
//! `rpc::BitcoinRpcClient` implements both against a Bitcoin Core node.

pub mod rpc;
pub mod script;

use crate::types::Outpoint;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("Unexpected RPC response: {0}")]
    Decode(String),
}

/// An output as currently seen by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub script_pubkey: Vec<u8>,
    pub spent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInput {
    /// `None` for coinbase inputs.
    pub previous_outpoint: Option<Outpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub txid: String,
    pub inputs: Vec<ChainInput>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBlock {
    pub hash: String,
    pub height: u64,
    pub transactions: Vec<ChainTransaction>,
}

impl ChainBlock {
    /// Every outpoint consumed by a non-coinbase input of this block.
    pub fn spent_outpoints(&self) -> Vec<Outpoint> {
        self.transactions
            .iter()
            .flat_map(|tx| tx.inputs.iter())
            .filter_map(|input| input.previous_outpoint)
            .collect()
    }
}

#[async_trait::async_trait]
pub trait UtxoLookup: Send + Sync {
    /// `Ok(None)` when the output does not exist or is no longer in the UTXO set.
    async fn get_output(&self, outpoint: &Outpoint) -> Result<Option<TxOutput>, ChainError>;
}

#[async_trait::async_trait]
pub trait BlockSource: Send + Sync {
    async fn get_height(&self) -> Result<u64, ChainError>;
    async fn get_block_hash(&self, height: u64) -> Result<String, ChainError>;
    async fn get_block_by_height(&self, height: u64) -> Result<ChainBlock, ChainError>;
}
