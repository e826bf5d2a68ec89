use crate::types::Purpose;
use avs_types::{TaskIndex, TxHash, TypesError};
use thiserror::Error;

/// Typed rejection returned by the ledger when a transaction is broadcast.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("transaction underpriced")]
    Underpriced,

    #[error("nonce too low")]
    NonceTooLow,

    #[error("transaction already known")]
    AlreadyKnown,

    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// How a failure should be handled by whoever observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network trouble or congestion; retried with backoff and re-pricing.
    Transient,
    /// Nonce already consumed or superseded; resolved by reconciling.
    Stale,
    /// Bad input from a peer or a late action; never retried.
    ProtocolViolation,
    /// Terminal for the transaction; needs operator attention.
    Fatal,
}

#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Nonce reconciliation failed: {0}")]
    NonceReconciliation(String),

    #[error("{purpose} transaction rejected: {reason}")]
    Rejected { purpose: Purpose, reason: String },

    #[error("{purpose} transaction {tx_hash} reverted: {reason}")]
    Reverted {
        purpose: Purpose,
        tx_hash: TxHash,
        reason: String,
    },

    #[error("{purpose} transaction abandoned after {attempts} attempts: {last_error}")]
    Abandoned {
        purpose: Purpose,
        attempts: u32,
        last_error: String,
    },

    #[error("Receipt for recorded transaction {0} is not available")]
    MissingReceipt(TxHash),

    #[error("Task {0} does not exist on the ledger")]
    UnknownTask(TaskIndex),

    #[error("Conflicting state already recorded: {0}")]
    Conflict(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Encoding failed: {0}")]
    Encoding(String),

    #[error(transparent)]
    Types(#[from] TypesError),
}

impl LedgerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LedgerError::Unavailable(_) | LedgerError::MissingReceipt(_) => ErrorClass::Transient,
            LedgerError::NonceReconciliation(_) => ErrorClass::Stale,
            LedgerError::UnknownTask(_) | LedgerError::Conflict(_) | LedgerError::Types(_) => {
                ErrorClass::ProtocolViolation
            }
            LedgerError::Rejected { .. }
            | LedgerError::Reverted { .. }
            | LedgerError::Abandoned { .. }
            | LedgerError::Signing(_)
            | LedgerError::Encoding(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl SendError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SendError::Underpriced | SendError::AlreadyKnown | SendError::Unavailable(_) => {
                ErrorClass::Transient
            }
            SendError::NonceTooLow => ErrorClass::Stale,
            SendError::Rejected(_) => ErrorClass::Fatal,
        }
    }
}

impl From<bincode::Error> for LedgerError {
    fn from(e: bincode::Error) -> Self {
        LedgerError::Encoding(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
