// ============================================================================
// In-memory reference Store
// ============================================================================
//
// A single-process stand-in for a real document store, used by this crate's
// own tests and suitable for callers who only need one process. Each table
// is guarded by its own lock, mirroring how a real adapter would hand out
// per-document atomicity without serializing unrelated tables behind one
// global lock.
//
// ============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::store::{
    InsertOutcome, ReturnChanges, Store, TxMutation, TxPredicate, TxRecord, TxStatus,
    UpdateOutcome, UserMutation, UserPredicate, UserRecord,
};

type UserTable = HashMap<String, UserRecord>;
type TxTable = HashMap<String, TxRecord>;

/// In-memory implementation of [`Store`].
///
/// Not persistent, not distributed — a reference implementation for tests
/// and single-process use, not a production store.
pub struct MemoryStore {
    #[allow(dead_code)]
    config: StoreConfig,
    tables: RwLock<HashMap<String, Arc<RwLock<UserTable>>>>,
    transactions: RwLock<TxTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            config,
            tables: RwLock::new(HashMap::new()),
            transactions: RwLock::new(HashMap::new()),
        }
    }

    async fn table(&self, name: &str) -> Arc<RwLock<UserTable>> {
        if let Some(table) = self.tables.read().await.get(name) {
            return table.clone();
        }
        let mut tables = self.tables.write().await;
        tables
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(HashMap::new())))
            .clone()
    }

    fn apply_user_mutation(record: &mut UserRecord, mutation: &UserMutation) {
        match mutation {
            UserMutation::SetIntent { xid, intent } => {
                record.xid = xid.clone();
                record.intent = Some(intent.clone());
            }
            UserMutation::ClearIntent => {
                record.intent = None;
            }
            UserMutation::PromoteIntent => {
                if let Some(intent) = record.intent.take() {
                    record.value = Some(intent);
                }
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn get(&self, table: &str, key: &str) -> Result<Option<UserRecord>> {
        let table = self.table(table).await;
        let table = table.read().await;
        Ok(table.get(key).cloned())
    }

    async fn insert_user(&self, table: &str, record: UserRecord) -> Result<InsertOutcome> {
        let table = self.table(table).await;
        let mut table = table.write().await;
        if table.contains_key(&record.id) {
            return Ok(InsertOutcome::conflict());
        }
        table.insert(record.id.clone(), record);
        Ok(InsertOutcome::ok())
    }

    async fn update_user(
        &self,
        table: &str,
        key: &str,
        predicate: UserPredicate,
        mutation: UserMutation,
        return_changes: ReturnChanges,
    ) -> Result<UpdateOutcome<UserRecord>> {
        let table_handle = self.table(table).await;
        let mut table = table_handle.write().await;

        let Some(existing) = table.get(key) else {
            return Ok(UpdateOutcome::skipped_absent());
        };

        // write()'s CAS predicate is "xid == prior_xid"; a mismatch is a
        // genuine write conflict, surfaced as OptimisticLockFailure.
        //
        // The lazy resolution updates and the best-effort sweep predicate
        // is "xid == rxid && intent != null"; a mismatch there (or an
        // intent another resolver already cleared) is a harmless no-op,
        // never an error — some concurrent reader beat us to it.
        let (predicate_holds, mismatch_is_conflict) = match mutation {
            UserMutation::SetIntent { .. } => (existing.xid == predicate.expected_xid, true),
            UserMutation::ClearIntent | UserMutation::PromoteIntent => (
                existing.xid == predicate.expected_xid && existing.intent.is_some(),
                false,
            ),
        };

        if !predicate_holds {
            if mismatch_is_conflict {
                return Ok(UpdateOutcome::conflict());
            }
            let current = existing.clone();
            return Ok(if return_changes == ReturnChanges::Always {
                UpdateOutcome::unchanged_with(current)
            } else {
                UpdateOutcome {
                    replaced: 0,
                    skipped: 0,
                    unchanged: 1,
                    errors: 0,
                    new_val: None,
                }
            });
        }

        let mut new_record = existing.clone();
        Self::apply_user_mutation(&mut new_record, &mutation);
        table.insert(key.to_string(), new_record.clone());

        Ok(match return_changes {
            ReturnChanges::False => UpdateOutcome {
                replaced: 1,
                skipped: 0,
                unchanged: 0,
                errors: 0,
                new_val: None,
            },
            ReturnChanges::True | ReturnChanges::Always => {
                UpdateOutcome::replaced_with(new_record)
            }
        })
    }

    async fn get_tx(&self, xid: &str) -> Result<Option<TxRecord>> {
        Ok(self.transactions.read().await.get(xid).cloned())
    }

    async fn insert_tx(&self, record: TxRecord) -> Result<InsertOutcome> {
        let mut transactions = self.transactions.write().await;
        if transactions.contains_key(&record.id) {
            return Ok(InsertOutcome::conflict());
        }
        transactions.insert(record.id.clone(), record);
        Ok(InsertOutcome::ok())
    }

    async fn update_tx(
        &self,
        xid: &str,
        predicate: TxPredicate,
        mutation: TxMutation,
        return_changes: ReturnChanges,
    ) -> Result<UpdateOutcome<TxRecord>> {
        let mut transactions = self.transactions.write().await;

        let Some(existing) = transactions.get(xid) else {
            return Ok(UpdateOutcome::skipped_absent());
        };

        if existing.status != predicate.expected_status {
            let current = existing.clone();
            return Ok(if return_changes == ReturnChanges::Always {
                UpdateOutcome::unchanged_with(current)
            } else {
                UpdateOutcome::conflict()
            });
        }

        let TxMutation::SetStatus { status, changes } = mutation;
        let mut new_record = existing.clone();
        new_record.status = status;
        if changes.is_some() {
            new_record.changes = changes;
        }
        transactions.insert(xid.to_string(), new_record.clone());

        Ok(match return_changes {
            ReturnChanges::False => UpdateOutcome {
                replaced: 1,
                skipped: 0,
                unchanged: 0,
                errors: 0,
                new_val: None,
            },
            ReturnChanges::True | ReturnChanges::Always => {
                UpdateOutcome::replaced_with(new_record)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{TRANSACTIONS_TABLE, TxStatus};

    #[tokio::test]
    async fn insert_tx_conflict_on_duplicate_id() {
        let store = MemoryStore::new();
        let record = TxRecord {
            id: "xid-1".into(),
            status: TxStatus::Pending,
            timestamp: store.now().await,
            changes: None,
        };
        assert!(store.insert_tx(record.clone()).await.unwrap().succeeded());
        assert!(!store.insert_tx(record).await.unwrap().succeeded());
    }

    #[tokio::test]
    async fn update_tx_cas_fails_when_status_mismatched() {
        let store = MemoryStore::new();
        let record = TxRecord {
            id: "xid-1".into(),
            status: TxStatus::Committed,
            timestamp: store.now().await,
            changes: None,
        };
        store.insert_tx(record).await.unwrap();

        let outcome = store
            .update_tx(
                "xid-1",
                TxPredicate {
                    expected_status: TxStatus::Pending,
                },
                TxMutation::SetStatus {
                    status: TxStatus::Aborted,
                    changes: None,
                },
                ReturnChanges::False,
            )
            .await
            .unwrap();
        assert!(!outcome.succeeded());
    }

    #[tokio::test]
    async fn tables_are_independent() {
        let store = MemoryStore::new();
        assert!(store.get("t1", "k").await.unwrap().is_none());
        assert!(store.get(TRANSACTIONS_TABLE, "k").await.unwrap().is_none());
    }
}
