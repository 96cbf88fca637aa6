// ============================================================================
// Store capability trait
// ============================================================================
//
// This is the seam between the transaction protocol and whatever document
// store actually holds the bytes. It is deliberately small: get, conditional
// insert, conditional update, each over a single document. Everything this
// crate needs from "majority read mode" is implicit — there is no read-mode
// parameter because the protocol never wants anything weaker.
//
// ============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Document;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;

/// Status of a transaction registry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Committed,
    Aborted,
}

/// A record in the reserved `transactions` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRecord {
    pub id: String,
    pub status: TxStatus,
    pub timestamp: DateTime<Utc>,
    /// table name -> keys written, recorded at commit time for forensic use
    /// only. No code path in this crate reads it back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<BTreeMap<String, BTreeSet<String>>>,
}

/// A record in a user table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub xid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Document>,
}

/// How much of the post-update document the store hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnChanges {
    /// Don't bother returning the document.
    False,
    /// Return it only when the update actually replaced something.
    True,
    /// Return it even when the conditional predicate made the update a
    /// no-op (the `skipped`/`unchanged` cases). The read-side resolver
    /// depends on this to observe the record without a second round trip.
    Always,
}

/// Result of a conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: u32,
    pub errors: u32,
}

impl InsertOutcome {
    pub fn ok() -> Self {
        Self {
            inserted: 1,
            errors: 0,
        }
    }

    pub fn conflict() -> Self {
        Self {
            inserted: 0,
            errors: 1,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.inserted == 1 && self.errors == 0
    }
}

/// Result of a conditional update, mirroring the store's
/// replaced/skipped/unchanged/errors counters plus an optional returned
/// document when `return_changes` asked for one.
#[derive(Debug, Clone)]
pub struct UpdateOutcome<T> {
    pub replaced: u32,
    pub skipped: u32,
    pub unchanged: u32,
    pub errors: u32,
    pub new_val: Option<T>,
}

impl<T> UpdateOutcome<T> {
    pub fn replaced_with(new_val: T) -> Self {
        Self {
            replaced: 1,
            skipped: 0,
            unchanged: 0,
            errors: 0,
            new_val: Some(new_val),
        }
    }

    pub fn skipped_absent() -> Self {
        Self {
            replaced: 0,
            skipped: 1,
            unchanged: 0,
            errors: 0,
            new_val: None,
        }
    }

    pub fn unchanged_with(current: T) -> Self {
        Self {
            replaced: 0,
            skipped: 0,
            unchanged: 1,
            errors: 0,
            new_val: Some(current),
        }
    }

    pub fn conflict() -> Self {
        Self {
            replaced: 0,
            skipped: 0,
            unchanged: 0,
            errors: 1,
            new_val: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.errors == 0
    }
}

/// Conditional predicate for a user-record update: "CAS against the xid I
/// last observed".
#[derive(Debug, Clone)]
pub struct UserPredicate {
    pub expected_xid: String,
}

/// The mutation a user-record update applies once its predicate holds.
#[derive(Debug, Clone)]
pub enum UserMutation {
    /// Install a new tentative write under a fresh xid.
    SetIntent { xid: String, intent: Document },
    /// Clear a resolved intent without touching `value` (the aborted case).
    ClearIntent,
    /// Clear a resolved intent and promote it to `value` (the committed
    /// case).
    PromoteIntent,
}

/// Conditional predicate for a registry-record update: "CAS against status
/// == pending".
#[derive(Debug, Clone, Copy)]
pub struct TxPredicate {
    pub expected_status: TxStatus,
}

#[derive(Debug, Clone)]
pub enum TxMutation {
    SetStatus {
        status: TxStatus,
        changes: Option<BTreeMap<String, BTreeSet<String>>>,
    },
}

pub const TRANSACTIONS_TABLE: &str = "transactions";

/// The capability this crate requires of a document store.
///
/// Implementors must guarantee: `get` observes the effects of any
/// previously-completed `insert_user`/`update_user` on the same key
/// (majority read mode); `insert_*` and `update_*` are executed atomically
/// by the store with respect to concurrent callers on the same document.
#[async_trait]
pub trait Store: Send + Sync {
    async fn now(&self) -> DateTime<Utc>;

    async fn get(&self, table: &str, key: &str) -> Result<Option<UserRecord>>;

    /// Insert `record` under conflict policy "error": fails (an
    /// `InsertOutcome` with `errors == 1`) if `record.id` already exists.
    async fn insert_user(&self, table: &str, record: UserRecord) -> Result<InsertOutcome>;

    async fn update_user(
        &self,
        table: &str,
        key: &str,
        predicate: UserPredicate,
        mutation: UserMutation,
        return_changes: ReturnChanges,
    ) -> Result<UpdateOutcome<UserRecord>>;

    async fn get_tx(&self, xid: &str) -> Result<Option<TxRecord>>;

    async fn insert_tx(&self, record: TxRecord) -> Result<InsertOutcome>;

    async fn update_tx(
        &self,
        xid: &str,
        predicate: TxPredicate,
        mutation: TxMutation,
        return_changes: ReturnChanges,
    ) -> Result<UpdateOutcome<TxRecord>>;
}
