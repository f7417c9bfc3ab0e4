use crate::types::Cents;
use thiserror::Error;

/// Failures raised by a [`crate::storage::LedgerStore`] backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate entry for idempotency key {0}")]
    Duplicate(String),

    #[error("Balance guard failed: needed {needed}, available {available}")]
    BalanceGuard { needed: Cents, available: Cents },

    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".to_string()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Ledger-level failures surfaced to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Developer wallet cannot cover a task reservation.
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Cents, available: Cents },

    /// Wallet cannot cover a payout.
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Cents, available: Cents },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => LedgerError::NotFound(what),
            StoreError::Duplicate(key) => LedgerError::DuplicateEntry(key),
            StoreError::InvalidEntry(msg) => LedgerError::InvalidAmount(msg),
            StoreError::BalanceGuard { needed, available } => LedgerError::InsufficientBalance {
                required: needed,
                available,
            },
            StoreError::Backend(msg) | StoreError::Serialization(msg) => LedgerError::Storage(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
