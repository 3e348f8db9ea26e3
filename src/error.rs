use rust_decimal::Decimal;
use thiserror::Error;

/// Caller-facing classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    StateConflict,
    InsufficientFunds,
    Authorization,
    NotFound,
    Internal,
}

#[derive(Debug, Error)]
pub enum BetError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    StateConflict(String),

    #[error("Insufficient credits: available {available}, required {required}")]
    InsufficientCredits { available: Decimal, required: Decimal },

    #[error("Insufficient frozen credits: frozen {frozen}, required {required}")]
    InsufficientFrozenCredits { frozen: Decimal, required: Decimal },

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Pool desync: {0}")]
    PoolDesync(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BetError>;

impl BetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BetError::Validation(_) => ErrorKind::Validation,
            BetError::StateConflict(_) => ErrorKind::StateConflict,
            BetError::InsufficientCredits { .. } | BetError::InsufficientFrozenCredits { .. } => {
                ErrorKind::InsufficientFunds
            }
            BetError::Authorization(_) => ErrorKind::Authorization,
            BetError::NotFound(_) => ErrorKind::NotFound,
            BetError::PoolDesync(_)
            | BetError::Storage(_)
            | BetError::Serialization(_)
            | BetError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// 4xx-equivalent failures the caller can act on.
    pub fn is_client_error(&self) -> bool {
        self.kind() != ErrorKind::Internal
    }

    /// Message safe to show a user; internal failures stay generic.
    pub fn public_message(&self) -> String {
        if self.is_client_error() {
            self.to_string()
        } else {
            "Internal error, please retry later".to_string()
        }
    }
}

impl From<sled::transaction::TransactionError<BetError>> for BetError {
    fn from(err: sled::transaction::TransactionError<BetError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => BetError::Storage(e),
        }
    }
}
