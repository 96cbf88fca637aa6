use thiserror::Error;

/// Error taxonomy for the transaction protocol.
///
/// `OptimisticLockFailure` is the only conflict outcome this crate ever
/// surfaces — there is no deadlock detection, because there are no locks to
/// deadlock on.
#[derive(Error, Debug)]
pub enum TxError {
    #[error("key '{0}' not found")]
    NotFound(String),

    #[error("optimistic lock failure for transaction {0}")]
    OptimisticLockFailure(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("usage error: {0}")]
    UsageError(String),
}

pub type Result<T> = std::result::Result<T, TxError>;

impl<T> From<std::sync::PoisonError<T>> for TxError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::DatabaseError(err.to_string())
    }
}
