//! Blockchain Watcher: prunes outpoints from the store once they are spent in
//! a confirmed block, so the owner may author again with a fresh UTXO.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bitcoin::{BlockSource, ChainError, UtxoLookup};
use crate::config::BlockchainConfig;
use crate::error::StorageError;
use crate::storage::{OutpointStore, PrunedOutpoint};

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A scanned block kept for reorg detection.
#[derive(Debug, Clone)]
struct ProcessedBlock {
    height: u64,
    hash: String,
    pruned: Vec<PrunedOutpoint>,
}

/// What one poll did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub tip: u64,
    pub blocks_scanned: u64,
    pub pruned: usize,
    pub restored: usize,
}

pub struct BlockWatcher {
    store: Arc<dyn OutpointStore>,
    blocks: Arc<dyn BlockSource>,
    lookup: Arc<dyn UtxoLookup>,
    config: BlockchainConfig,
    last_known_height: Option<u64>,
    recent: VecDeque<ProcessedBlock>,
}

impl BlockWatcher {
    pub fn new(
        store: Arc<dyn OutpointStore>,
        blocks: Arc<dyn BlockSource>,
        lookup: Arc<dyn UtxoLookup>,
        config: BlockchainConfig,
    ) -> Self {
        Self {
            store,
            blocks,
            lookup,
            config,
            last_known_height: None,
            recent: VecDeque::new(),
        }
    }

    pub fn last_known_height(&self) -> Option<u64> {
        self.last_known_height
    }

    /// Polls until `shutdown` fires. Poll failures are logged and retried on
    /// the next tick.
    pub async fn run(mut self, shutdown: CancellationToken) {
        if self.config.notifications_enabled {
            warn!("⚠️ Block notifications are not available, falling back to polling");
        }
        info!(
            "⛓️ Block watcher started (poll every {}s, {} mode)",
            self.config.poll_interval_secs,
            if self.config.scan_full_blocks {
                "full-block"
            } else {
                "headers-only"
            }
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!("⚠️ Block poll failed: {}", e);
                    }
                }
            }
        }
        info!("🛑 Block watcher stopped");
    }

    pub async fn poll_once(&mut self) -> Result<PollSummary, WatcherError> {
        let tip = self.blocks.get_height().await?;
        let mut summary = PollSummary {
            tip,
            ..Default::default()
        };

        let last = match self.last_known_height {
            Some(height) => height,
            None => {
                let start = match self.store.last_scanned_height().await? {
                    Some(height) => height,
                    None => tip.saturating_sub(self.config.max_reorg_depth),
                };
                info!("⛓️ Starting block scan after height {} (tip {})", start, tip);
                self.last_known_height = Some(start);
                start
            }
        };

        if self.config.scan_full_blocks {
            summary.restored = self.reconcile_reorg(tip).await?;
            let last = self.last_known_height.unwrap_or(last);
            self.scan_range(last, tip, &mut summary).await?;
        } else if tip > last {
            summary.pruned = self.recheck_stored_outpoints().await?;
            self.advance_to(tip).await?;
        }

        if summary.pruned > 0 || summary.restored > 0 {
            info!(
                "🧹 Height {}: pruned {} outpoint(s), restored {}",
                tip, summary.pruned, summary.restored
            );
        }
        Ok(summary)
    }

    /// Scans `(last, tip]` in order, stopping at the first failing height so
    /// the watermark only covers contiguous successes.
    async fn scan_range(
        &mut self,
        last: u64,
        tip: u64,
        summary: &mut PollSummary,
    ) -> Result<(), WatcherError> {
        for height in last.saturating_add(1)..=tip {
            let block = match self.blocks.get_block_by_height(height).await {
                Ok(block) => block,
                Err(e) => {
                    warn!("⚠️ Failed to fetch block {}: {} (will retry)", height, e);
                    break;
                }
            };

            let spent = block.spent_outpoints();
            let pruned = self.store.prune(&spent).await?;
            debug!(
                "Block {} ({}): {} input(s), pruned {}",
                height,
                block.hash,
                spent.len(),
                pruned.len()
            );

            summary.blocks_scanned += 1;
            summary.pruned += pruned.len();
            self.remember(ProcessedBlock {
                height,
                hash: block.hash,
                pruned,
            });
            self.advance_to(height).await?;
        }
        Ok(())
    }

    fn remember(&mut self, block: ProcessedBlock) {
        self.recent.push_back(block);
        while self.recent.len() as u64 > self.config.max_reorg_depth {
            self.recent.pop_front();
        }
    }

    async fn advance_to(&mut self, height: u64) -> Result<(), WatcherError> {
        self.last_known_height = Some(height);
        self.store.set_last_scanned_height(height).await?;
        Ok(())
    }

    /// Rolls back remembered blocks that are no longer on the best chain and
    /// re-adds the outpoints they pruned, cached messages included. Returns
    /// the number restored.
    async fn reconcile_reorg(&mut self, tip: u64) -> Result<usize, WatcherError> {
        let mut orphaned = Vec::new();
        while let Some(block) = self.recent.back() {
            if block.height <= tip && self.blocks.get_block_hash(block.height).await? == block.hash
            {
                break;
            }
            if let Some(block) = self.recent.pop_back() {
                orphaned.push(block);
            }
        }

        let Some(fork_child) = orphaned.last() else {
            return Ok(0);
        };
        let fork_height = fork_child.height.saturating_sub(1);

        if self.recent.is_empty() {
            error!(
                "❌ Reorg reaches past the last {} tracked block(s); outpoints pruned below height {} are not restored",
                self.config.max_reorg_depth,
                fork_child.height
            );
        }
        warn!(
            "🔀 Chain reorganization: rolling back {} block(s) to height {}",
            orphaned.len(),
            fork_height
        );

        let mut restored = 0;
        for block in &orphaned {
            for pruned in &block.pruned {
                match self.store.add(&pruned.outpoint).await {
                    Ok(()) => restored += 1,
                    Err(StorageError::AlreadyPresent(_)) => continue,
                    Err(e) => return Err(e.into()),
                }
                if let Some(payload) = &pruned.payload {
                    self.store.put_payload(&pruned.outpoint, payload).await?;
                }
            }
        }

        self.advance_to(fork_height).await?;
        Ok(restored)
    }

    /// Headers-only mode: asks the ledger about every stored outpoint and
    /// prunes those no longer unspent.
    async fn recheck_stored_outpoints(&self) -> Result<usize, WatcherError> {
        let mut gone = Vec::new();
        for outpoint in self.store.outpoints().await? {
            match self.lookup.get_output(&outpoint).await? {
                Some(output) if !output.spent => {}
                _ => gone.push(outpoint),
            }
        }
        Ok(self.store.remove_all(&gone).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcoin::{ChainBlock, ChainInput, ChainTransaction, TxOutput};
    use crate::storage::InMemoryOutpointStore;
    use crate::types::Outpoint;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, HashSet};

    #[derive(Default)]
    struct MockChain {
        blocks: Mutex<BTreeMap<u64, ChainBlock>>,
        failing: Mutex<HashSet<u64>>,
        unspent: Mutex<HashSet<Outpoint>>,
    }

    impl MockChain {
        fn set_block(&self, height: u64, hash: &str, spends: &[Outpoint]) {
            let inputs = spends
                .iter()
                .map(|o| ChainInput {
                    previous_outpoint: Some(*o),
                })
                .collect();
            self.blocks.lock().insert(
                height,
                ChainBlock {
                    hash: hash.to_string(),
                    height,
                    transactions: vec![
                        ChainTransaction {
                            txid: format!("coinbase-{}", height),
                            inputs: vec![ChainInput {
                                previous_outpoint: None,
                            }],
                        },
                        ChainTransaction {
                            txid: format!("tx-{}", height),
                            inputs,
                        },
                    ],
                },
            );
        }

        fn extend_to(&self, tip: u64) {
            let start = self.blocks.lock().keys().next_back().map_or(0, |h| h + 1);
            for height in start..=tip {
                self.set_block(height, &format!("h{}", height), &[]);
            }
        }
    }

    #[async_trait::async_trait]
    impl BlockSource for MockChain {
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
            if self.failing.lock().contains(&height) {
                return Err(ChainError::Transport("timeout".into()));
            }
            self.blocks
                .lock()
                .get(&height)
                .cloned()
                .ok_or_else(|| ChainError::Decode("missing block".into()))
        }
    }

    #[async_trait::async_trait]
    impl UtxoLookup for MockChain {
        async fn get_output(&self, outpoint: &Outpoint) -> Result<Option<TxOutput>, ChainError> {
            Ok(self.unspent.lock().contains(outpoint).then(|| TxOutput {
                script_pubkey: vec![],
                spent: false,
            }))
        }
    }

    fn op(n: u8) -> Outpoint {
        Outpoint::new([n; 32], 0)
    }

    fn watcher(
        chain: &Arc<MockChain>,
        store: &Arc<InMemoryOutpointStore>,
        full: bool,
    ) -> BlockWatcher {
        BlockWatcher::new(
            store.clone(),
            chain.clone(),
            chain.clone(),
            BlockchainConfig {
                notifications_enabled: false,
                poll_interval_secs: 1,
                max_reorg_depth: 6,
                scan_full_blocks: full,
            },
        )
    }

    #[tokio::test]
    async fn test_first_poll_scans_reorg_window() {
        let chain = Arc::new(MockChain::default());
        let store = Arc::new(InMemoryOutpointStore::new());
        chain.extend_to(100);
        // Height 90 is below the initial window (tip - 6 = 94)
        chain.set_block(90, "h90", &[op(1)]);
        chain.set_block(97, "h97", &[op(2)]);
        store.add(&op(1)).await.unwrap();
        store.add(&op(2)).await.unwrap();

        let mut watcher = watcher(&chain, &store, true);
        let summary = watcher.poll_once().await.unwrap();
        assert_eq!(summary.blocks_scanned, 6);
        assert_eq!(summary.pruned, 1);
        assert!(store.has(&op(1)).await.unwrap());
        assert!(!store.has(&op(2)).await.unwrap());
        assert_eq!(watcher.last_known_height(), Some(100));
        assert_eq!(store.last_scanned_height().await.unwrap(), Some(100));

        // Nothing new
        assert_eq!(watcher.poll_once().await.unwrap().blocks_scanned, 0);
    }

    #[tokio::test]
    async fn test_resumes_from_store_watermark() {
        let chain = Arc::new(MockChain::default());
        let store = Arc::new(InMemoryOutpointStore::new());
        chain.extend_to(100);
        chain.set_block(60, "h60", &[op(3)]);
        store.add(&op(3)).await.unwrap();
        store.set_last_scanned_height(50).await.unwrap();

        let mut watcher = watcher(&chain, &store, true);
        let summary = watcher.poll_once().await.unwrap();
        assert_eq!(summary.blocks_scanned, 50);
        assert!(!store.has(&op(3)).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_height_is_retried() {
        let chain = Arc::new(MockChain::default());
        let store = Arc::new(InMemoryOutpointStore::new());
        chain.extend_to(10);
        let mut watcher = watcher(&chain, &store, true);
        watcher.poll_once().await.unwrap();

        chain.extend_to(15);
        chain.set_block(14, "h14", &[op(4)]);
        store.add(&op(4)).await.unwrap();
        chain.failing.lock().insert(13);

        let summary = watcher.poll_once().await.unwrap();
        assert_eq!(summary.blocks_scanned, 2);
        assert_eq!(watcher.last_known_height(), Some(12));
        assert!(store.has(&op(4)).await.unwrap());

        chain.failing.lock().clear();
        let summary = watcher.poll_once().await.unwrap();
        assert_eq!(summary.blocks_scanned, 3);
        assert_eq!(watcher.last_known_height(), Some(15));
        assert!(!store.has(&op(4)).await.unwrap());
    }

    #[tokio::test]
    async fn test_reorg_restores_orphaned_prunes() {
        let chain = Arc::new(MockChain::default());
        let store = Arc::new(InMemoryOutpointStore::new());
        chain.extend_to(20);
        let mut watcher = watcher(&chain, &store, true);
        watcher.poll_once().await.unwrap();

        chain.set_block(21, "h21", &[op(5)]);
        chain.set_block(22, "h22", &[op(6)]);
        store.add(&op(5)).await.unwrap();
        store.add(&op(6)).await.unwrap();
        store.put_payload(&op(5), b"message five").await.unwrap();
        watcher.poll_once().await.unwrap();
        assert_eq!(store.get_payload(&op(5)).await.unwrap(), None);
        assert!(!store.has(&op(5)).await.unwrap());
        assert!(!store.has(&op(6)).await.unwrap());

        // Competing branch from 21: only op(6) is spent, later
        chain.set_block(21, "h21b", &[]);
        chain.set_block(22, "h22b", &[]);
        chain.set_block(23, "h23b", &[op(6)]);

        let summary = watcher.poll_once().await.unwrap();
        assert_eq!(summary.restored, 2);
        assert_eq!(summary.blocks_scanned, 3);
        assert!(store.has(&op(5)).await.unwrap());
        assert_eq!(
            store.get_payload(&op(5)).await.unwrap(),
            Some(b"message five".to_vec())
        );
        assert!(!store.has(&op(6)).await.unwrap());
        assert_eq!(watcher.last_known_height(), Some(23));
    }

    #[tokio::test]
    async fn test_headers_only_rechecks_store() {
        let chain = Arc::new(MockChain::default());
        let store = Arc::new(InMemoryOutpointStore::new());
        chain.extend_to(10);
        store.add(&op(7)).await.unwrap();
        store.add(&op(8)).await.unwrap();
        chain.unspent.lock().insert(op(7));
        chain.unspent.lock().insert(op(8));

        let mut watcher = watcher(&chain, &store, false);
        // Tip advanced past the initial window start
        let summary = watcher.poll_once().await.unwrap();
        assert_eq!(summary.pruned, 0);

        chain.unspent.lock().remove(&op(8));
        chain.extend_to(11);
        let summary = watcher.poll_once().await.unwrap();
        assert_eq!(summary.pruned, 1);
        assert_eq!(summary.blocks_scanned, 0);
        assert!(store.has(&op(7)).await.unwrap());
        assert!(!store.has(&op(8)).await.unwrap());
        assert_eq!(watcher.last_known_height(), Some(11));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let chain = Arc::new(MockChain::default());
        let store = Arc::new(InMemoryOutpointStore::new());
        chain.extend_to(3);
        let token = CancellationToken::new();
        let handle = tokio::spawn(watcher(&chain, &store, true).run(token.clone()));
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
