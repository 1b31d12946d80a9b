//! Error types for all keyloom operations.

use thiserror::Error;

use crate::store::CancellationReason;

/// Top-level error type for keyloom operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error(transparent)]
    Transaction(#[from] TxnError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    /// True for the recoverable conditional-write failure, whether it came
    /// from a single-item write or a cancelled multi-item transaction.
    pub fn is_conditional_check_failed(&self) -> bool {
        matches!(self, Error::Transaction(TxnError::ConditionalCheckFailed(_)))
    }
}

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("cannot encode a {0} as a sortable key value")]
    UnsupportedType(&'static str),

    #[error("non-finite numbers cannot be encoded as key values")]
    NonFiniteNumber,

    #[error("missing key value: {0}")]
    MissingKeyValue(String),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("partition key field '{0}' must be given a literal value")]
    InvalidPartitionValue(String),

    #[error("cannot query on {0} after a range query or missing a previous parameter value")]
    InvalidKeyProgression(String),

    #[error("'{0}' is not a key field of this collection")]
    UnknownKeyField(String),

    #[error("unknown condition for field '{field}': {value}")]
    UnknownCondition { field: String, value: String },
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("unknown update operator for field '{field}': {value}")]
    UnknownUpdateOperator { field: String, value: String },

    #[error("invalid attribute path: {0}")]
    InvalidPath(String),

    #[error("conflicting updates for field '{0}'")]
    ConflictingUpdate(String),

    #[error("cannot update key field '{0}'")]
    KeyFieldUpdate(String),
}

#[derive(Debug, Error)]
pub enum TxnError {
    #[error("conditional check failed: {0}")]
    ConditionalCheckFailed(String),

    #[error("error handler must either retry or return an error")]
    InvalidErrorHandlerResponse,

    #[error("transaction retried the maximum of {0} times")]
    MaxRetriesExceeded(u32),

    #[error("transaction failed: [{}]", format_reasons(reasons))]
    TransactionFailed { reasons: Vec<CancellationReason> },

    #[error("primary operation must be {expected}, got {actual}")]
    InvalidPrimaryOperationType {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("transaction has {actual} operations, maximum is {max}")]
    TooManyOperations { max: usize, actual: usize },

    #[error("committed item could not be read back")]
    MissingReturnItem,
}

fn format_reasons(reasons: &[CancellationReason]) -> String {
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("entity was deleted while it was being migrated")]
    Cancelled,

    #[error("entity still requires migration after all upgrades were applied")]
    DidNotConverge,
}

/// Errors reported by the backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("the conditional request failed")]
    ConditionalCheckFailed,

    #[error("transaction cancelled: [{}]", format_reasons(reasons))]
    TransactionCanceled { reasons: Vec<CancellationReason> },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;
