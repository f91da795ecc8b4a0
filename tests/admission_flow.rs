//! Admission against a durable store, and the spend / prune lifecycle.

mod common;

use std::sync::Arc;

use common::*;
use utxochat::bitcoin::{BlockSource, UtxoLookup};
use utxochat::block_watcher::BlockWatcher;
use utxochat::config::BlockchainConfig;
use utxochat::storage::{OutpointStore, SledOutpointStore};
use utxochat::{AdmissionValidator, Rejection};

fn sled_store() -> Arc<dyn OutpointStore> {
    let db = sled::Config::new().temporary(true).open().unwrap();
    Arc::new(SledOutpointStore::from_db(&db).unwrap())
}

fn blockchain_config() -> BlockchainConfig {
    BlockchainConfig {
        notifications_enabled: false,
        poll_interval_secs: 1,
        max_reorg_depth: 6,
        scan_full_blocks: true,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_admission_under_concurrency_with_sled() {
    let ledger = MockLedger::new();
    let store = sled_store();
    let validator = Arc::new(AdmissionValidator::new(store.clone(), ledger.clone()));

    // Several outpoints raced at once, each by many tasks.
    let mut handles = Vec::new();
    for n in 1..=4u8 {
        let sk = secret(n);
        ledger.fund_p2pkh(&sk, outpoint(n));
        let message = p2pkh_message(&sk, outpoint(n), "race");
        for _ in 0..16 {
            let validator = validator.clone();
            let message = message.clone();
            handles.push(tokio::spawn(async move { validator.admit(&message).await }));
        }
    }

    let mut admitted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(rejection) => assert_eq!(rejection, Rejection::AlreadySeen),
        }
    }
    assert_eq!(admitted, 4);
    assert_eq!(store.len().await.unwrap(), 4);
    assert_eq!(validator.active_slots(), 0);
}

#[tokio::test]
async fn test_spent_outpoint_is_pruned_and_cannot_author_again() {
    let ledger = MockLedger::new();
    ledger.mine_to(100);
    let store = sled_store();
    let validator = AdmissionValidator::new(store.clone(), ledger.clone());

    let sk = secret(7);
    let op = outpoint(7);
    ledger.fund_p2pkh(&sk, op);
    validator
        .admit(&p2pkh_message(&sk, op, "one message per utxo"))
        .await
        .unwrap();
    store.put_payload(&op, b"cached").await.unwrap();

    let blocks: Arc<dyn BlockSource> = ledger.clone();
    let lookup: Arc<dyn UtxoLookup> = ledger.clone();
    let mut watcher = BlockWatcher::new(store.clone(), blocks, lookup, blockchain_config());
    watcher.poll_once().await.unwrap();
    assert!(store.has(&op).await.unwrap());

    let height = ledger.mine_spending(&[op]);
    let summary = watcher.poll_once().await.unwrap();
    assert_eq!(summary.tip, height);
    assert_eq!(summary.pruned, 1);
    assert!(!store.has(&op).await.unwrap());
    assert_eq!(store.get_payload(&op).await.unwrap(), None);
    assert_eq!(store.last_scanned_height().await.unwrap(), Some(height));

    // Pruning again is a no-op.
    assert_eq!(store.remove_all(&[op]).await.unwrap(), vec![]);

    // The output is gone from the ledger, so the gate stays closed.
    assert_eq!(
        validator
            .admit(&p2pkh_message(&sk, op, "second try"))
            .await,
        Err(Rejection::UtxoNotFound)
    );
}

#[tokio::test]
async fn test_fresh_utxo_authors_after_spend() {
    let ledger = MockLedger::new();
    ledger.mine_to(10);
    let store = sled_store();
    let validator = AdmissionValidator::new(store.clone(), ledger.clone());

    let sk = secret(8);
    ledger.fund_taproot(&sk, outpoint(8));
    validator
        .admit(&taproot_message(&sk, outpoint(8), "first"))
        .await
        .unwrap();

    // The owner spends to a new output they also control.
    ledger.mine_spending(&[outpoint(8)]);
    ledger.fund_taproot(&sk, outpoint(9));
    validator
        .admit(&taproot_message(&sk, outpoint(9), "second"))
        .await
        .unwrap();
    assert_eq!(store.len().await.unwrap(), 2);
}
