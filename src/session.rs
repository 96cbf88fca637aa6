// ============================================================================
// Transaction session
// ============================================================================
//
// A Transaction is a single logical actor: one xid, one store handle, one
// read/write cache. It never shares its cache and never hands it to the
// protocol primitives — those operate purely against the store.
//
// ============================================================================

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value as Document;
use tracing::debug;

use crate::error::{Result, TxError};
use crate::protocol;
use crate::store::Store;
use crate::table::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Pending,
    Committed,
    Aborted,
}

/// A cached (table, key) entry: the xid observed when it was last read or
/// written, and the document itself.
pub(crate) type CacheEntry = (Option<String>, Document);

/// A boxed future, used by [`Transaction::run`] to accept async closures
/// that borrow the `&mut Transaction` they're handed — plain
/// `FnOnce(&mut Transaction) -> impl Future` can't express that borrow
/// without this indirection.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

pub struct Transaction {
    xid: String,
    store: Arc<dyn Store>,
    state: TxState,
    pub(crate) cache: HashMap<String, HashMap<String, CacheEntry>>,
}

impl Transaction {
    /// Begin a new transaction against `store`.
    pub async fn begin(store: Arc<dyn Store>) -> Result<Self> {
        let xid = protocol::create_tx(store.as_ref()).await?;
        Ok(Self {
            xid,
            store,
            state: TxState::Pending,
            cache: HashMap::new(),
        })
    }

    pub fn xid(&self) -> &str {
        &self.xid
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub(crate) fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// Borrow a table-scoped view bound to this transaction.
    pub fn table<'a>(&'a mut self, name: &str) -> Table<'a> {
        Table::new(self, name.to_string())
    }

    pub(crate) fn require_pending(&self) -> Result<()> {
        if self.state != TxState::Pending {
            return Err(TxError::UsageError(format!(
                "transaction {} is {:?}, not pending",
                self.xid, self.state
            )));
        }
        Ok(())
    }

    /// Keys this transaction itself wrote, grouped by table — the ones
    /// whose cached observed-xid equals our own.
    fn own_writes(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut writes = BTreeMap::new();
        for (table, entries) in &self.cache {
            let keys: BTreeSet<String> = entries
                .iter()
                .filter(|(_, (observed_xid, _))| observed_xid.as_deref() == Some(self.xid.as_str()))
                .map(|(key, _)| key.clone())
                .collect();
            if !keys.is_empty() {
                writes.insert(table.clone(), keys);
            }
        }
        writes
    }

    /// Commit this transaction.
    ///
    /// On success the transaction becomes `Committed` and its written
    /// intents are swept into `value`. On a lost commit-tx CAS (a resolver
    /// raced us to aborted), this calls `abort` and surfaces
    /// `OptimisticLockFailure`.
    pub async fn commit(&mut self) -> Result<()> {
        self.require_pending()?;

        let writes = self.own_writes();
        debug!(xid = %self.xid, ?writes, "committing transaction");

        if protocol::commit_tx(self.store(), &self.xid, writes.clone()).await? {
            self.state = TxState::Committed;
            for (table, keys) in &writes {
                let keys: Vec<String> = keys.iter().cloned().collect();
                protocol::clear(self.store(), &self.xid, true, table, &keys).await;
            }
            Ok(())
        } else {
            self.abort_internal().await?;
            Err(TxError::OptimisticLockFailure(self.xid.clone()))
        }
    }

    /// Abort this transaction, clearing every intent it may have installed.
    pub async fn abort(&mut self) -> Result<()> {
        self.require_pending()?;
        self.abort_internal().await
    }

    async fn abort_internal(&mut self) -> Result<()> {
        debug!(xid = %self.xid, "aborting transaction");
        if protocol::abort_tx(self.store(), &self.xid).await? {
            self.state = TxState::Aborted;
            for (table, entries) in &self.cache {
                let keys: Vec<String> = entries.keys().cloned().collect();
                protocol::clear(self.store(), &self.xid, false, table, &keys).await;
            }
            Ok(())
        } else {
            Err(TxError::OptimisticLockFailure(self.xid.clone()))
        }
    }

    /// Scoped-acquisition helper: begin a transaction, run `f` against it,
    /// commit on `Ok`, abort on `Err`. This is the guaranteed-release idiom
    /// adapted to Rust — there is no implicit unwinding-based context
    /// manager, so callers that need panic safety should additionally rely
    /// on `Transaction`'s `Drop` impl, which aborts a still-pending
    /// transaction rather than leaking it.
    pub async fn run<F, T>(store: Arc<dyn Store>, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a mut Transaction) -> BoxFuture<'a, T>,
    {
        let mut tx = Transaction::begin(store).await?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if tx.state() == TxState::Pending {
                    // Preserve the original error; a failure to abort here
                    // would itself be an OptimisticLockFailure, which is
                    // less informative than what actually went wrong.
                    let _ = tx.abort().await;
                }
                Err(err)
            }
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TxState::Pending {
            debug!(xid = %self.xid, "transaction dropped while pending, best-effort abort");
            // Dropping can't await; fire-and-forget a detached abort so a
            // caller that forgot to commit/abort doesn't leave the
            // registry record pending forever. Intents are still cleaned
            // up lazily by the next reader regardless.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let store = self.store.clone();
                let xid = self.xid.clone();
                handle.spawn(async move {
                    let _ = protocol::abort_tx(store.as_ref(), &xid).await;
                });
            }
        }
    }
}
