//! Ledger client for the task response and fraud-challenge writer.
//!
//! - [`Ledger`]: the consumed ledger boundary (submit, receipts, state reads)
//! - [`SubmissionEngine`]: per-identity nonce gate, gas pricing, broadcast
//!   and bounded polling with re-pricing on the same nonce
//! - [`Writer`] / [`LedgerWriter`]: the exposed writer API with idempotent
//!   retries detected through ledger state
//! - [`MemoryLedger`]: deterministic in-memory ledger used by tests and the
//!   local simulation

pub mod engine;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod signer;
pub mod types;
pub mod writer;

pub use engine::{PendingTransaction, SubmissionConfig, SubmissionEngine};
pub use error::{ErrorClass, LedgerError, Result, SendError};
pub use ledger::Ledger;
pub use memory::{Broadcast, MemoryLedger, MemoryLedgerConfig};
pub use signer::{LocalSigner, TxSigner};
pub use types::{
    Call, Event, OperatorStatus, Purpose, Receipt, ReceiptStatus, RecordedChallenge,
    RecordedResponse, SignedTransaction, TaskFacts, TxStatus, UnsignedTransaction,
};
pub use writer::{LedgerWriter, Writer};
