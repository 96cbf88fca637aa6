// ============================================================================
// Table view
// ============================================================================
//
// A convenience surface scoped to one table name within a transaction. All
// operations populate the transaction's cache and enforce that the
// transaction is still pending.
//
// ============================================================================

use serde_json::{Map, Value as Document};

use crate::error::{Result, TxError};
use crate::protocol;
use crate::session::Transaction;

/// A table-scoped handle bound to a [`Transaction`].
pub struct Table<'a> {
    tx: &'a mut Transaction,
    name: String,
}

impl<'a> Table<'a> {
    pub(crate) fn new(tx: &'a mut Transaction, name: String) -> Self {
        Self { tx, name }
    }

    /// Populate the cache for `key` if it isn't already cached, returning
    /// the observed xid (`None` if the key has never been written) and
    /// `None` if the key is absent — distinct from the document itself
    /// being JSON `null`. Only successful (non-missing) reads are cached.
    async fn read_cached(&mut self, key: &str) -> Result<(Option<String>, Option<Document>)> {
        self.tx.require_pending()?;

        if let Some((observed_xid, doc)) = self
            .tx
            .cache
            .get(&self.name)
            .and_then(|table| table.get(key))
        {
            return Ok((observed_xid.clone(), Some(doc.clone())));
        }

        const MISSING: &str = "\0doctx-missing\0";
        let sentinel = Document::String(MISSING.to_string());
        let (observed_xid, doc) =
            protocol::read(self.tx.store(), &self.name, key, sentinel.clone()).await?;

        if doc == sentinel {
            return Ok((observed_xid, None));
        }

        self.tx
            .cache
            .entry(self.name.clone())
            .or_default()
            .insert(key.to_string(), (observed_xid.clone(), doc.clone()));

        Ok((observed_xid, Some(doc)))
    }

    /// Get `key`, returning `NotFound` if it is absent.
    pub async fn get(&mut self, key: &str) -> Result<Document> {
        let (_, doc) = self.read_cached(key).await?;
        doc.ok_or_else(|| TxError::NotFound(key.to_string()))
    }

    /// Get `key`, returning `default` if it is absent instead of erroring.
    pub async fn get_or(&mut self, key: &str, default: Document) -> Result<Document> {
        let (_, doc) = self.read_cached(key).await?;
        Ok(doc.unwrap_or(default))
    }

    /// Write `doc` to `key`. Requires a prior cache-populating read (done
    /// internally) so the write CASes against the xid this transaction
    /// actually observed.
    pub async fn put(&mut self, key: &str, doc: Document) -> Result<()> {
        self.tx.require_pending()?;

        // A key this transaction already wrote is cached under our own
        // xid; re-reading would be a wasted round trip, and CASing against
        // our own xid always succeeds unless a concurrent resolver already
        // aborted us (caught by the write() call itself).
        let (prior_xid, _) = self.read_cached(key).await?;

        protocol::write(
            self.tx.store(),
            self.tx.xid(),
            &self.name,
            key,
            prior_xid.as_deref(),
            doc.clone(),
        )
        .await?;

        self.tx
            .cache
            .entry(self.name.clone())
            .or_default()
            .insert(key.to_string(), (Some(self.tx.xid().to_string()), doc));

        Ok(())
    }

    /// Shallow-merge `partial` into the current document at `key`.
    /// `NotFound` if the key is absent.
    pub async fn update(&mut self, key: &str, partial: Map<String, Document>) -> Result<()> {
        let current = self.get(key).await?;
        let mut merged = match current {
            Document::Object(map) => map,
            other => {
                return Err(TxError::UsageError(format!(
                    "cannot shallow-merge into a non-object document at '{key}': {other}"
                )));
            }
        };
        for (k, v) in partial {
            merged.insert(k, v);
        }
        self.put(key, Document::Object(merged)).await
    }
}
