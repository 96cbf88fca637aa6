// ============================================================================
// Protocol primitives
// ============================================================================
//
// Stateless operations against a Store. Every reader here must be able to
// finalize any other client's abandoned transaction — that's what makes the
// protocol safe against a client crashing mid-commit.
//
// ============================================================================

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value as Document;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, TxError};
use crate::store::{
    ReturnChanges, Store, TxMutation, TxPredicate, TxRecord, TxStatus, UserMutation,
    UserPredicate, UserRecord, TRANSACTIONS_TABLE,
};

/// Generate a fresh xid and insert its pending registry record.
pub async fn create_tx(store: &dyn Store) -> Result<String> {
    let xid = Uuid::new_v4().to_string();
    let record = TxRecord {
        id: xid.clone(),
        status: TxStatus::Pending,
        timestamp: store.now().await,
        changes: None,
    };
    let outcome = store.insert_tx(record).await?;
    if !outcome.succeeded() {
        return Err(TxError::DatabaseError(format!(
            "error creating transaction record for {xid}"
        )));
    }
    debug!(xid, "created transaction");
    Ok(xid)
}

/// Install a tentative write under `xid`, CAS'd against `prior_xid`.
pub async fn write(
    store: &dyn Store,
    xid: &str,
    table: &str,
    key: &str,
    prior_xid: Option<&str>,
    new_doc: Document,
) -> Result<()> {
    let outcome = match prior_xid {
        None => {
            let record = UserRecord {
                id: key.to_string(),
                xid: xid.to_string(),
                intent: Some(new_doc),
                value: None,
            };
            store.insert_user(table, record).await?
        }
        Some(prior_xid) => {
            store
                .update_user(
                    table,
                    key,
                    UserPredicate {
                        expected_xid: prior_xid.to_string(),
                    },
                    UserMutation::SetIntent {
                        xid: xid.to_string(),
                        intent: new_doc,
                    },
                    ReturnChanges::False,
                )
                .await?
        }
    };

    if !outcome.succeeded() {
        return Err(TxError::OptimisticLockFailure(xid.to_string()));
    }
    Ok(())
}

/// Read a key, resolving any outstanding foreign intent along the way.
///
/// Returns the observed xid (`None` if the key has never been written) and
/// the value, or `default` if the key is absent.
pub async fn read(
    store: &dyn Store,
    table: &str,
    key: &str,
    default: Document,
) -> Result<(Option<String>, Document)> {
    let Some(mut record) = store.get(table, key).await? else {
        return Ok((None, default));
    };

    while record.intent.is_some() {
        let rxid = record.xid.clone();
        let tx_status = match store.get_tx(&rxid).await? {
            Some(tx) => tx.status,
            // Invariant 1's exception: an absent registry record is
            // authoritative for "this transaction never gets to commit".
            None => TxStatus::Aborted,
        };

        let tx_status = if tx_status == TxStatus::Pending {
            if abort_tx(store, &rxid).await? {
                TxStatus::Aborted
            } else {
                // Lost the race to a concurrent committer; re-read and loop.
                record = store
                    .get(table, key)
                    .await?
                    .ok_or_else(|| TxError::DatabaseError(format!("record {key} vanished")))?;
                continue;
            }
        } else {
            tx_status
        };

        let mutation = match tx_status {
            TxStatus::Aborted => UserMutation::ClearIntent,
            TxStatus::Committed => UserMutation::PromoteIntent,
            TxStatus::Pending => unreachable!("resolved above"),
        };

        debug!(xid = %rxid, ?tx_status, "resolving foreign intent");

        let outcome = store
            .update_user(
                table,
                key,
                UserPredicate {
                    expected_xid: rxid.clone(),
                },
                mutation,
                ReturnChanges::Always,
            )
            .await?;

        record = outcome
            .new_val
            .ok_or_else(|| TxError::DatabaseError(format!("resolution of {key} lost its record")))?;
    }

    Ok((Some(record.xid), record.value.unwrap_or(default)))
}

/// Flip the registry record to committed, recording the changes map.
///
/// Returns `true` iff this call actually performed the transition; `false`
/// means a concurrent resolver already finalized it (necessarily as
/// aborted).
pub async fn commit_tx(
    store: &dyn Store,
    xid: &str,
    changes: BTreeMap<String, BTreeSet<String>>,
) -> Result<bool> {
    let outcome = store
        .update_tx(
            xid,
            TxPredicate {
                expected_status: TxStatus::Pending,
            },
            TxMutation::SetStatus {
                status: TxStatus::Committed,
                changes: Some(changes),
            },
            ReturnChanges::False,
        )
        .await?;
    Ok(outcome.succeeded() && outcome.replaced == 1)
}

/// Flip the registry record to aborted, unless it already reached a
/// terminal state.
///
/// Returns `true` if the record is now (or already was) aborted, or if it
/// was absent entirely (absence counts as aborted). Returns `false` only
/// when the observed terminal status is committed.
pub async fn abort_tx(store: &dyn Store, xid: &str) -> Result<bool> {
    let outcome = store
        .update_tx(
            xid,
            TxPredicate {
                expected_status: TxStatus::Pending,
            },
            TxMutation::SetStatus {
                status: TxStatus::Aborted,
                changes: None,
            },
            ReturnChanges::Always,
        )
        .await?;

    if outcome.skipped == 1 {
        return Ok(true);
    }
    if outcome.replaced == 1 {
        return Ok(true);
    }
    match outcome.new_val {
        Some(tx) => Ok(tx.status == TxStatus::Aborted),
        None => Ok(true),
    }
}

/// Best-effort sweep of resolved intents into their final shape. Safe to
/// call multiple times or skip entirely — every reader performs the same
/// finalization lazily in [`read`].
pub async fn clear(store: &dyn Store, xid: &str, committed: bool, table: &str, keys: &[String]) {
    let mutation = if committed {
        UserMutation::PromoteIntent
    } else {
        UserMutation::ClearIntent
    };

    for key in keys {
        let result = store
            .update_user(
                table,
                key,
                UserPredicate {
                    expected_xid: xid.to_string(),
                },
                mutation.clone(),
                ReturnChanges::False,
            )
            .await;
        if let Err(err) = result {
            warn!(xid, table, key, %err, "intent sweep failed, leaving it for a lazy resolver");
        }
    }
}
