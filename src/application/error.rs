use thiserror::Error;

use crate::domain::Amount;

/// Every way a ledger operation can fail. Caller errors are terminal and
/// never retried; `LockTimeout` and `Storage` are transient and safe to
/// retry under an idempotency key.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid amount: {0} (must be strictly positive)")]
    InvalidAmount(Amount),

    #[error("Invalid currency: {0}")]
    InvalidCurrency(String),

    #[error("Self-transfer forbidden: {0}")]
    SelfTransferForbidden(String),

    #[error("Recipient not found: {0}")]
    RecipientNotFound(String),

    #[error("Insufficient funds for {owner_id}: balance {balance}, required {required}")]
    InsufficientFunds {
        owner_id: String,
        balance: Amount,
        required: Amount,
    },

    #[error("Owner already exists: {0}")]
    OwnerAlreadyExists(String),

    #[error("Timed out waiting for account locks")]
    LockTimeout,

    #[error("Idempotency key {0} was already used with a different payload")]
    IdempotencyConflict(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl LedgerError {
    /// The status class the boundary layer reports for this outcome.
    pub fn status_code(&self) -> u16 {
        match self {
            LedgerError::InvalidAmount(_) | LedgerError::InvalidCurrency(_) => 400,
            LedgerError::SelfTransferForbidden(_) | LedgerError::InsufficientFunds { .. } => 403,
            LedgerError::RecipientNotFound(_) => 404,
            LedgerError::OwnerAlreadyExists(_) | LedgerError::IdempotencyConflict(_) => 409,
            LedgerError::LockTimeout | LedgerError::Storage(_) => 503,
        }
    }

    /// Whether the caller may retry the identical request (with its
    /// idempotency key) after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::LockTimeout | LedgerError::Storage(_))
    }
}
