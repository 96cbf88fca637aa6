// ============================================================================
// doctx — optimistic multi-document transactions over a conditional-update
// document store
// ============================================================================
//
// Layers multi-key, multi-table optimistic transactions with snapshot reads
// and atomic commit on top of a store that only natively guarantees
// per-document linearizable writes with conditional updates and majority
// reads. There is no native multi-document transaction support in the
// store; this crate synthesizes it through a reserved transaction registry,
// a per-record intent field, and a cooperative recovery protocol that any
// client can run against any other client's abandoned transaction.
//
// ============================================================================

extern crate self as doctx;

pub mod config;
pub mod error;
pub mod memory_store;
pub mod protocol;
pub mod session;
pub mod store;
pub mod table;

pub use config::StoreConfig;
pub use error::{Result, TxError};
pub use memory_store::MemoryStore;
pub use session::{BoxFuture, Transaction, TxState};
pub use store::{Store, TxRecord, TxStatus, UserRecord};
pub use table::Table;
