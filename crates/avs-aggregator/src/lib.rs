//! Stake-weighted aggregation of operator signature shares.
//!
//! For each open task the aggregator keeps the operator set snapshot taken at
//! dispatch, at most one accepted share per operator, and a running signed
//! stake per response digest. `finalize` sums the shares behind the
//! leading digest into one aggregate signature, verifiable against the summed
//! keys of exactly those signers, once they hold the task's quorum threshold
//! of the snapshot's total stake.

pub mod aggregator;
pub mod error;
pub mod types;

pub use aggregator::SignatureAggregator;
pub use error::{AggregationError, Result};
pub use types::{AggregatorConfig, Finalization, QuorumStatus};
