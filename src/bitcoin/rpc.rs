//! Bitcoin Core JSON-RPC client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{
    BlockSource, ChainBlock, ChainError, ChainInput, ChainTransaction, TxOutput, UtxoLookup,
};
use crate::config::BitcoinConfig;
use crate::types::Outpoint;

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize, Debug)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize, Debug)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize, Debug)]
struct TxOutResult {
    #[serde(rename = "scriptPubKey")]
    script_pub_key: ScriptPubKey,
}

#[derive(Deserialize, Debug)]
struct ScriptPubKey {
    hex: String,
}

#[derive(Deserialize, Debug)]
struct VerboseBlock {
    hash: String,
    height: u64,
    tx: Vec<VerboseTx>,
}

#[derive(Deserialize, Debug)]
struct VerboseTx {
    txid: String,
    vin: Vec<VerboseInput>,
}

#[derive(Deserialize, Debug)]
struct VerboseInput {
    coinbase: Option<String>,
    txid: Option<String>,
    vout: Option<u32>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct BlockchainInfo {
    pub chain: String,
    pub blocks: u64,
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: String,
}

pub struct BitcoinRpcClient {
    client: Client,
    url: String,
    user: String,
    password: String,
    next_id: AtomicU64,
}

impl BitcoinRpcClient {
    pub fn new(config: &BitcoinConfig) -> Result<Self, ChainError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: config.rpc_url.clone(),
            user: config.rpc_user.clone(),
            password: config.rpc_password.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let request = RpcRequest {
            jsonrpc: "1.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if !self.user.is_empty() {
            builder = builder.basic_auth(&self.user, Some(&self.password));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ChainError::Transport(format!("{}: {}", method, e)))?;

        // Bitcoin Core reports RPC errors with HTTP 500 and a JSON body, so the
        // body is parsed before the status is considered.
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ChainError::Transport(format!("{}: {}", method, e)))?;

        let rpc_response: RpcResponse = serde_json::from_str(&body).map_err(|_| {
            ChainError::Transport(format!("{}: HTTP {} with non-JSON body", method, status))
        })?;

        if let Some(error) = rpc_response.error {
            return Err(ChainError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(rpc_response.result.unwrap_or(Value::Null))
    }

    pub async fn get_blockchain_info(&self) -> Result<BlockchainInfo, ChainError> {
        let value = self.call("getblockchaininfo", json!([])).await?;
        serde_json::from_value(value).map_err(|e| ChainError::Decode(e.to_string()))
    }
}

#[async_trait::async_trait]
impl UtxoLookup for BitcoinRpcClient {
    async fn get_output(&self, outpoint: &Outpoint) -> Result<Option<TxOutput>, ChainError> {
        // Mempool spends are ignored: only confirmed spends make an output
        // ineligible, matching what the block watcher prunes.
        let value = self
            .call(
                "gettxout",
                json!([outpoint.display_txid(), outpoint.vout(), false]),
            )
            .await?;

        if value.is_null() {
            return Ok(None);
        }

        let result: TxOutResult =
            serde_json::from_value(value).map_err(|e| ChainError::Decode(e.to_string()))?;
        let script_pubkey = hex::decode(&result.script_pub_key.hex)
            .map_err(|e| ChainError::Decode(format!("scriptPubKey hex: {}", e)))?;

        Ok(Some(TxOutput {
            script_pubkey,
            spent: false,
        }))
    }
}

#[async_trait::async_trait]
impl BlockSource for BitcoinRpcClient {
    async fn get_height(&self) -> Result<u64, ChainError> {
        let value = self.call("getblockcount", json!([])).await?;
        value
            .as_u64()
            .ok_or_else(|| ChainError::Decode(format!("getblockcount returned {}", value)))
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, ChainError> {
        let value = self.call("getblockhash", json!([height])).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ChainError::Decode(format!("getblockhash returned {}", value)))
    }

    async fn get_block_by_height(&self, height: u64) -> Result<ChainBlock, ChainError> {
        let hash = self.get_block_hash(height).await?;
        let value = self.call("getblock", json!([hash, 2])).await?;
        let block: VerboseBlock =
            serde_json::from_value(value).map_err(|e| ChainError::Decode(e.to_string()))?;
        convert_block(block)
    }
}

fn convert_block(block: VerboseBlock) -> Result<ChainBlock, ChainError> {
    let mut transactions = Vec::with_capacity(block.tx.len());
    for tx in block.tx {
        let mut inputs = Vec::with_capacity(tx.vin.len());
        for input in tx.vin {
            let previous_outpoint = match (input.coinbase, input.txid, input.vout) {
                (Some(_), _, _) => None,
                (None, Some(txid), Some(vout)) => Some(
                    Outpoint::from_display_txid(&txid, vout)
                        .map_err(|e| ChainError::Decode(format!("input txid {}: {}", txid, e)))?,
                ),
                _ => {
                    return Err(ChainError::Decode(format!(
                        "input of {} has neither coinbase nor prevout",
                        tx.txid
                    )))
                }
            };
            inputs.push(ChainInput { previous_outpoint });
        }
        transactions.push(ChainTransaction {
            txid: tx.txid,
            inputs,
        });
    }

    Ok(ChainBlock {
        hash: block.hash,
        height: block.height,
        transactions,
    })
}
