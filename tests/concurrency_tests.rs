use std::sync::Arc;

use doctx::{MemoryStore, Store, Transaction, TxError};
use serde_json::json;
use uuid::Uuid;

const NUM_ACCOUNTS: usize = 10;
const NUM_ITERATIONS: usize = 100;
const NUM_WORKERS: usize = 10;

async fn create_accounts(store: Arc<dyn Store>) -> Vec<String> {
    let mut ids = Vec::with_capacity(NUM_ACCOUNTS);
    let mut tx = Transaction::begin(store).await.unwrap();
    for i in 0..NUM_ACCOUNTS {
        let key = Uuid::new_v4().to_string();
        tx.table("accounts")
            .put(&key, json!({"index": i, "balance": 0}))
            .await
            .unwrap();
        ids.push(key);
    }
    tx.commit().await.unwrap();
    ids
}

async fn total_balance(store: Arc<dyn Store>, ids: &[String]) -> i64 {
    let mut tx = Transaction::begin(store).await.unwrap();
    let mut total = 0;
    for id in ids {
        let doc = tx.table("accounts").get(id).await.unwrap();
        total += doc["balance"].as_i64().unwrap();
    }
    tx.commit().await.unwrap();
    total
}

async fn perform_work(store: Arc<dyn Store>, ids: Vec<String>) {
    for _ in 0..NUM_ITERATIONS {
        let from = &ids[fastrand_index(ids.len())];
        let mut to = &ids[fastrand_index(ids.len())];
        while to == from {
            to = &ids[fastrand_index(ids.len())];
        }

        let result = Transaction::run(store.clone(), |tx| {
            let from = from.clone();
            let to = to.clone();
            Box::pin(async move {
                let mut accounts = tx.table("accounts");
                let mut acct_from = accounts.get(&from).await?;
                let mut acct_to = accounts.get(&to).await?;
                let from_balance = acct_from["balance"].as_i64().unwrap() - 10;
                let to_balance = acct_to["balance"].as_i64().unwrap() + 10;
                acct_from["balance"] = json!(from_balance);
                acct_to["balance"] = json!(to_balance);
                accounts.put(&from, acct_from).await?;
                accounts.put(&to, acct_to).await?;
                Ok(())
            })
        })
        .await;

        match result {
            Ok(()) | Err(TxError::OptimisticLockFailure(_)) => {}
            Err(other) => panic!("unexpected error from worker: {other}"),
        }
    }
}

// Deterministic, dependency-free pseudo-randomness: the stress test only
// needs "pick two distinct accounts", not a real RNG.
fn fastrand_index(len: usize) -> usize {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    // A cheap LCG step keeps this from degenerating into a fixed pattern
    // across calls within the same worker.
    (n.wrapping_mul(2654435761).wrapping_add(0x9E3779B9)) % len
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn bank_transfer_conserves_total_balance() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let account_ids = create_accounts(store.clone()).await;

    let mut workers = Vec::with_capacity(NUM_WORKERS);
    for _ in 0..NUM_WORKERS {
        let store = store.clone();
        let ids = account_ids.clone();
        workers.push(tokio::spawn(perform_work(store, ids)));
    }
    for worker in workers {
        worker.await.unwrap();
    }

    assert_eq!(0, total_balance(store, &account_ids).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn disjoint_concurrent_writers_all_commit() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

    let mut handles = Vec::new();
    for i in 0..20 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut tx = Transaction::begin(store).await.unwrap();
            tx.table("t1")
                .put(&format!("key-{i}"), json!(i))
                .await
                .unwrap();
            tx.commit().await.unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let mut tx = Transaction::begin(store).await.unwrap();
    for i in 0..20 {
        assert_eq!(
            tx.table("t1").get(&format!("key-{i}")).await.unwrap(),
            json!(i)
        );
    }
    tx.commit().await.unwrap();
}
